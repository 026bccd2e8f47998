//! # Persistent Block Storage
//!
//! Durable backing for the ledger using Sled, an embedded database. Blocks
//! are stored one per key so the chain survives restarts and can be
//! re-verified from disk.
//!
//! ## Storage Structure
//!
//! | Tree | Key | Value |
//! |------|-----|-------|
//! | `blocks` | sequence as 8 big-endian bytes | JSON-serialized [`LedgerBlock`] |
//!
//! Big-endian keys make Sled's lexicographic iteration order equal to
//! sequence order.
//!
//! ## Append-Only Writes
//!
//! Every write goes through `compare_and_swap(None -> Some)`. A sequence that
//! already holds a block is never overwritten through this API; an attempt
//! surfaces as [`LedgerError::Corrupt`].
//!
//! ## Security Notes
//!
//! - The database directory should only be writable by the concord process
//! - Append-only here protects against bugs, not against someone with raw
//!   file access; the hash chain is what detects that
//!
//! ## References
//!
//! - Sled documentation: <https://sled.rs/>

use crate::models::{LedgerBlock, LedgerError, Result};
use std::path::Path;

/// Tree name for storing blocks.
const BLOCK_TREE: &str = "blocks";

/// Encodes a sequence number as a Sled key.
pub fn sequence_key(sequence: u64) -> [u8; 8] {
    sequence.to_be_bytes()
}

/// Sled-backed append-only block store.
///
/// # Example
///
/// ```rust,no_run
/// use concord_ledger::storage::BlockStorage;
///
/// let storage = BlockStorage::open("./data/ledger").unwrap();
/// for block in storage.load_all().unwrap() {
///     println!("{} {}", block.sequence, block.current_hash);
/// }
/// ```
#[derive(Clone)]
pub struct BlockStorage {
    db: sled::Db,
    blocks: sled::Tree,
}

impl BlockStorage {
    /// Opens or creates a block database at the given path.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Database` if the path is unusable or the
    /// database cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_db(sled::open(path)?)
    }

    /// Uses the `blocks` tree of a database the caller already opened.
    ///
    /// Sled locks its directory per process, so code that needs a second view
    /// of the same ledger shares one handle instead of reopening the path.
    pub fn from_db(db: sled::Db) -> Result<Self> {
        let blocks = db.open_tree(BLOCK_TREE)?;
        Ok(Self { db, blocks })
    }

    /// Creates a temporary database that is discarded on drop.
    pub fn temporary() -> Result<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    /// Writes a block under its sequence key, refusing to overwrite.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Corrupt` if a block already exists at that
    /// sequence, `LedgerError::Serialization` or `LedgerError::Database`
    /// on write failure.
    pub fn append(&self, block: &LedgerBlock) -> Result<()> {
        let bytes = serde_json::to_vec(block)?;
        let outcome = self.blocks.compare_and_swap(
            sequence_key(block.sequence),
            None as Option<&[u8]>,
            Some(bytes),
        )?;
        outcome.map_err(|_| {
            LedgerError::Corrupt(format!(
                "block {} already exists in storage",
                block.sequence
            ))
        })
    }

    /// Loads a single block by sequence.
    pub fn load(&self, sequence: u64) -> Result<Option<LedgerBlock>> {
        match self.blocks.get(sequence_key(sequence))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Loads every stored block in sequence order.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Corrupt` if a key is malformed or does not match
    /// the sequence recorded inside its block.
    pub fn load_all(&self) -> Result<Vec<LedgerBlock>> {
        let mut out = Vec::with_capacity(self.blocks.len());
        for entry in self.blocks.iter() {
            let (key, value) = entry?;
            let key: [u8; 8] = key
                .as_ref()
                .try_into()
                .map_err(|_| LedgerError::Corrupt("malformed block key".to_string()))?;
            let block: LedgerBlock = serde_json::from_slice(&value)?;
            let keyed = u64::from_be_bytes(key);
            if keyed != block.sequence {
                return Err(LedgerError::Corrupt(format!(
                    "key {} holds block {}",
                    keyed, block.sequence
                )));
            }
            out.push(block);
        }
        Ok(out)
    }

    /// Returns the number of stored blocks.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Returns true if no blocks are stored.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Flushes pending writes to disk, returning the number of bytes flushed.
    pub fn flush(&self) -> Result<usize> {
        Ok(self.db.flush()?)
    }
}

impl std::fmt::Debug for BlockStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockStorage")
            .field("blocks", &self.len())
            .finish()
    }
}
