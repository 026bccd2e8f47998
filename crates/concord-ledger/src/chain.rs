//! # Hash Chain
//!
//! Deterministic hashing of a block's logical content and validation of the
//! links between consecutive blocks.
//!
//! ## How the Chain Works
//!
//! ```text
//!   ┌────────────┐      ┌────────────┐      ┌────────────┐
//!   │  block 0   │      │  block 1   │      │  block 2   │
//!   │ prev: 000… │ ◄─── │ prev: H(0) │ ◄─── │ prev: H(1) │
//!   │ hash: H(0) │      │ hash: H(1) │      │ hash: H(2) │
//!   └────────────┘      └────────────┘      └────────────┘
//! ```
//!
//! `H(i)` is the SHA-256 of the RFC 8785 canonical JSON of
//! `{sequence, timestamp, event_type, payload, previous_hash}`. Editing any
//! field of block `i` changes `H(i)`, which no longer matches the
//! `previous_hash` stored in block `i + 1`.
//!
//! This is a single-writer integrity log, not a consensus protocol: there is
//! no fork choice and no proof of work, only ordered links.

use crate::canonicalize::{canonicalize, hash_bytes};
use crate::models::{
    BlockHash, BreakKind, EventType, LedgerBlock, Payload, Result, VerificationReport,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

/// The hashed fields of a block, borrowed.
///
/// `current_hash` is deliberately absent: it is the output of hashing these.
#[derive(Debug, Clone, Copy)]
pub struct BlockFields<'a> {
    /// Position in the chain.
    pub sequence: u64,
    /// Creation instant.
    pub timestamp: &'a DateTime<Utc>,
    /// Event kind.
    pub event_type: EventType,
    /// Event description.
    pub payload: &'a Payload,
    /// Hash of the preceding block.
    pub previous_hash: &'a BlockHash,
}

impl<'a> BlockFields<'a> {
    /// Borrows the hashed fields of an existing block.
    pub fn of(block: &'a LedgerBlock) -> Self {
        Self {
            sequence: block.sequence,
            timestamp: &block.timestamp,
            event_type: block.event_type,
            payload: &block.payload,
            previous_hash: &block.previous_hash,
        }
    }
}

#[derive(Serialize)]
struct CanonicalFields<'a> {
    sequence: u64,
    timestamp: String,
    event_type: &'static str,
    payload: &'a Payload,
    previous_hash: String,
}

/// Produces the canonical byte serialization of a block's hashed fields.
///
/// Timestamps are rendered as RFC 3339 with microsecond precision and a `Z`
/// suffix, so the bytes do not depend on the local timezone or on how the
/// block was deserialized.
///
/// # Errors
///
/// Returns [`LedgerError::Encoding`](crate::LedgerError::Encoding) if the
/// payload cannot be canonicalized.
pub fn canonicalize_fields(fields: &BlockFields<'_>) -> Result<Vec<u8>> {
    let canonical = CanonicalFields {
        sequence: fields.sequence,
        timestamp: fields
            .timestamp
            .to_rfc3339_opts(SecondsFormat::Micros, true),
        event_type: fields.event_type.as_str(),
        payload: fields.payload,
        previous_hash: fields.previous_hash.to_hex(),
    };
    let value = serde_json::to_value(&canonical)
        .map_err(|e| crate::LedgerError::Encoding(e.to_string()))?;
    Ok(canonicalize(&value)?.into_bytes())
}

/// Hashes a block's logical content.
pub fn hash_fields(fields: &BlockFields<'_>) -> Result<BlockHash> {
    Ok(hash_bytes(&canonicalize_fields(fields)?))
}

/// Recomputes the content hash of a stored block, ignoring its `current_hash`.
pub fn content_hash(block: &LedgerBlock) -> Result<BlockHash> {
    hash_fields(&BlockFields::of(block))
}

/// Returns true iff `next.previous_hash` equals the recomputed content hash
/// of `prev`.
///
/// The predecessor is re-hashed rather than trusting its stored
/// `current_hash`, so tampering with `prev` breaks this link even if the
/// tamperer also rewrote `prev.current_hash`.
pub fn verify_link(prev: &LedgerBlock, next: &LedgerBlock) -> bool {
    match content_hash(prev) {
        Ok(hash) => hash == next.previous_hash,
        Err(_) => false,
    }
}

/// Walks a contiguous slice of the chain starting at sequence `from`.
///
/// Checks, in order, for each block: sequence continuity, the genesis
/// sentinel (only for block 0), and the link from its predecessor within the
/// slice. The last block in the slice is finally re-hashed against its own
/// `current_hash`, since no successor in the slice vouches for it.
pub fn verify_slice(blocks: &[LedgerBlock], from: u64) -> VerificationReport {
    let mut checked = 0u64;

    for (i, block) in blocks.iter().enumerate() {
        let expected = from + i as u64;
        if block.sequence != expected {
            return VerificationReport::broken(expected, BreakKind::SequenceGap, checked);
        }
        if block.sequence == 0 && !block.previous_hash.is_genesis() {
            return VerificationReport::broken(0, BreakKind::GenesisMismatch, checked);
        }
        if i > 0 && !verify_link(&blocks[i - 1], block) {
            return VerificationReport::broken(block.sequence, BreakKind::BrokenLink, checked);
        }
        checked += 1;
    }

    if let Some(last) = blocks.last() {
        let intact = matches!(content_hash(last), Ok(hash) if hash == last.current_hash);
        if !intact {
            return VerificationReport::broken(
                last.sequence,
                BreakKind::ContentMismatch,
                checked.saturating_sub(1),
            );
        }
    }

    VerificationReport::intact(checked)
}
