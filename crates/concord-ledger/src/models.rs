//! # Core Data Models for the Transparency Ledger
//!
//! This module defines the types every other part of the ledger is built on:
//! the block itself, its typed hash, the closed set of event kinds, and the
//! report produced by chain verification.
//!
//! ## Integrity Model
//!
//! The types in this module help enforce:
//!
//! - **Type Safety**: `BlockHash` cannot be confused with arbitrary byte arrays.
//! - **Closed Vocabulary**: `EventType` keeps audit consumers from seeing ad-hoc labels.
//! - **Explicit Outcomes**: `VerificationReport` names the first broken link instead of a bare bool.
//!
//! ## References
//!
//! - NIST FIPS 180-4 for hash size (SHA-256 = 32 bytes)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// SHA-256 hash output size in bytes.
pub const HASH_SIZE: usize = 32;

/// Opaque key-value payload attached to a block.
///
/// String keys, JSON-compatible values. Key order is irrelevant: the
/// canonical serialization sorts keys before hashing.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// A 32-byte SHA-256 digest identifying a block's canonical content.
///
/// Serializes as a 64-character lowercase hex string so that the ledger read
/// API stays readable for audit consumers.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockHash([u8; HASH_SIZE]);

impl BlockHash {
    /// Sentinel used as `previous_hash` of the genesis block.
    pub const GENESIS: BlockHash = BlockHash([0u8; HASH_SIZE]);

    /// Wraps raw digest bytes.
    pub const fn from_bytes(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }

    /// Returns the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    /// Returns the lowercase hex encoding.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Returns true for the all-zero genesis sentinel.
    pub fn is_genesis(&self) -> bool {
        self.0 == [0u8; HASH_SIZE]
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash({})", self.to_hex())
    }
}

impl FromStr for BlockHash {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(s)
            .map_err(|e| LedgerError::Corrupt(format!("invalid block hash '{}': {}", s, e)))?;
        let bytes: [u8; HASH_SIZE] = bytes
            .try_into()
            .map_err(|_| LedgerError::Corrupt(format!("block hash '{}' is not 32 bytes", s)))?;
        Ok(Self(bytes))
    }
}

impl Serialize for BlockHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for BlockHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Kind of event a block records.
///
/// This is a closed set. Adding a kind is a schema change for every
/// consumer of the ledger read API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A question entered the system.
    DataCollection,
    /// A pipeline stage started, completed, or was retried.
    PipelineStep,
    /// The question's ledger trail was verified.
    Verification,
    /// Processing failed.
    Failure,
    /// Processing was cancelled by a caller.
    Cancellation,
}

impl EventType {
    /// Returns the wire name used in canonical serialization.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::DataCollection => "data_collection",
            EventType::PipelineStep => "pipeline_step",
            EventType::Verification => "verification",
            EventType::Failure => "failure",
            EventType::Cancellation => "cancellation",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable, hash-linked audit record.
///
/// Created exactly once by [`LedgerStore::append`](crate::LedgerStore::append)
/// and never mutated afterwards.
///
/// # Fields
///
/// - `sequence`: position in the chain, starting at 0
/// - `timestamp`: creation instant, truncated to microseconds
/// - `event_type`: what kind of step this block records
/// - `payload`: event description (question hash, model list, scores, ...)
/// - `previous_hash`: content hash of the preceding block, or [`BlockHash::GENESIS`]
/// - `current_hash`: content hash of this block's other five fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerBlock {
    /// Position in the chain.
    pub sequence: u64,

    /// Creation instant (UTC, microsecond precision).
    pub timestamp: DateTime<Utc>,

    /// Event kind.
    pub event_type: EventType,

    /// Event description.
    pub payload: Payload,

    /// Hash of the preceding block.
    pub previous_hash: BlockHash,

    /// Hash of this block's canonical content.
    pub current_hash: BlockHash,
}

/// Why verification stopped at a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakKind {
    /// `previous_hash` does not match the recomputed hash of the predecessor.
    BrokenLink,
    /// The genesis block does not carry the genesis sentinel.
    GenesisMismatch,
    /// Sequence numbers are not contiguous.
    SequenceGap,
    /// The last block's content no longer matches its own `current_hash`.
    ContentMismatch,
}

impl fmt::Display for BreakKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BreakKind::BrokenLink => "broken link",
            BreakKind::GenesisMismatch => "genesis mismatch",
            BreakKind::SequenceGap => "sequence gap",
            BreakKind::ContentMismatch => "content mismatch",
        };
        f.write_str(s)
    }
}

/// Outcome of walking a range of the chain.
///
/// `ok == true` implies `first_break == None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    /// True if no break was found.
    pub ok: bool,

    /// Sequence of the first block at which verification failed.
    pub first_break: Option<u64>,

    /// Reason for the break, if any.
    pub break_kind: Option<BreakKind>,

    /// Number of blocks examined before stopping.
    pub checked: u64,
}

impl VerificationReport {
    /// Report for a range with no breaks.
    pub fn intact(checked: u64) -> Self {
        Self {
            ok: true,
            first_break: None,
            break_kind: None,
            checked,
        }
    }

    /// Report for a range that broke at `sequence`.
    pub fn broken(sequence: u64, kind: BreakKind, checked: u64) -> Self {
        Self {
            ok: false,
            first_break: Some(sequence),
            break_kind: Some(kind),
            checked,
        }
    }
}

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// A payload could not be canonicalized. Payloads built internally never
    /// hit this, so it indicates a programming error.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// No block exists at the requested sequence.
    #[error("Block not found: {0}")]
    NotFound(u64),

    /// The requested range does not lie within the chain.
    #[error("Invalid range {from}..={to} (chain length {len})")]
    InvalidRange {
        /// Requested start.
        from: u64,
        /// Requested end (inclusive).
        to: u64,
        /// Current chain length.
        len: u64,
    },

    /// Verification found a break. Never expected in normal operation.
    #[error("Chain integrity violated at block {sequence}: {kind}")]
    ChainIntegrity {
        /// First broken block.
        sequence: u64,
        /// What was broken.
        kind: BreakKind,
    },

    /// Failed to open or write the block database.
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    /// Failed to serialize or deserialize a stored block.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stored data is inconsistent with the chain layout.
    #[error("Corrupt ledger: {0}")]
    Corrupt(String),

    /// The ledger lock was poisoned by a panicking writer.
    #[error("Ledger lock poisoned")]
    LockPoisoned,
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_hash_hex_round_trip() {
        let hash = BlockHash::from_bytes([0xab; HASH_SIZE]);
        let hex = hash.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(hex.parse::<BlockHash>().unwrap(), hash);
    }

    #[test]
    fn test_block_hash_rejects_bad_hex() {
        assert!("zz".parse::<BlockHash>().is_err());
        assert!("abcd".parse::<BlockHash>().is_err());
    }

    #[test]
    fn test_genesis_sentinel() {
        assert!(BlockHash::GENESIS.is_genesis());
        assert!(!BlockHash::from_bytes([1u8; HASH_SIZE]).is_genesis());
    }

    #[test]
    fn test_event_type_wire_names_match_serde() {
        for event in [
            EventType::DataCollection,
            EventType::PipelineStep,
            EventType::Verification,
            EventType::Failure,
            EventType::Cancellation,
        ] {
            let json = serde_json::to_string(&event).unwrap();
            assert_eq!(json, format!("\"{}\"", event.as_str()));
        }
    }

    #[test]
    fn test_block_hash_serializes_as_string() {
        let json = serde_json::to_string(&BlockHash::GENESIS).unwrap();
        assert_eq!(json, format!("\"{}\"", "0".repeat(64)));
    }

    #[test]
    fn test_chain_integrity_display() {
        let err = LedgerError::ChainIntegrity {
            sequence: 4,
            kind: BreakKind::BrokenLink,
        };
        assert!(err.to_string().contains("block 4"));
        assert!(err.to_string().contains("broken link"));
    }
}
