//! # Ledger Store - Main Facade
//!
//! The one shared mutable resource of the system: an append-only, lock-guarded
//! arena of hash-linked blocks with an optional durable backend.
//!
//! ## Concurrency
//!
//! `append` runs "read tail, compute next block, store it" as a single
//! critical section. Two concurrent appends can never observe the same tail,
//! so the chain cannot fork and no sequence number is handed out twice.
//!
//! ```text
//!   writer A ──┐
//!   writer B ──┼──▶ Mutex<Vec<LedgerBlock>> ──▶ BlockStorage (sled, optional)
//!   writer C ──┘         │
//!                        └─ readers: get / tail / blocks / verify_chain
//! ```
//!
//! ## Atomicity
//!
//! A block is canonicalized and hashed before anything is stored. When a
//! backend is configured the block is written there first, and only then
//! pushed to the in-memory arena. A failed append leaves no partial block.
//!
//! ## References
//!
//! - Crosby, S. A. & Wallach, D. S. (2009) - "Efficient Data Structures for
//!   Tamper-Evident Logging". USENIX Security.

use crate::canonicalize::to_payload;
use crate::chain::{hash_fields, verify_slice, BlockFields};
use crate::models::{
    BlockHash, EventType, LedgerBlock, LedgerError, Payload, Result, VerificationReport,
};
use crate::storage::BlockStorage;
use chrono::{SubsecRound, Utc};
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info};

/// Append-only, hash-chained block store.
///
/// Construct one per process (or per test) and share it behind an `Arc`.
///
/// # Example
///
/// ```rust
/// use concord_ledger::{EventType, LedgerStore, Payload};
/// use serde_json::json;
///
/// let ledger = LedgerStore::in_memory();
///
/// let mut payload = Payload::new();
/// payload.insert("description".into(), json!("question received"));
/// let block = ledger.append(EventType::DataCollection, payload).unwrap();
///
/// assert_eq!(block.sequence, 0);
/// assert!(block.previous_hash.is_genesis());
/// assert!(ledger.verify_chain(0, None).unwrap().ok);
/// ```
pub struct LedgerStore {
    inner: Mutex<Vec<LedgerBlock>>,
    backend: Option<BlockStorage>,
    flush_on_append: bool,
}

impl LedgerStore {
    /// Creates an empty store that lives only in memory.
    pub fn in_memory() -> Self {
        Self {
            inner: Mutex::new(Vec::new()),
            backend: None,
            flush_on_append: false,
        }
    }

    /// Opens or creates a durable store at `path`, reloading existing blocks.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Database` if the database cannot be opened, and
    /// `LedgerError::Corrupt` if the stored sequence numbers are not
    /// contiguous from 0.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::with_storage(BlockStorage::open(path)?)
    }

    /// Builds a store on top of an already opened backend.
    pub fn with_storage(storage: BlockStorage) -> Result<Self> {
        let blocks = storage.load_all()?;
        for (expected, block) in blocks.iter().enumerate() {
            if block.sequence != expected as u64 {
                return Err(LedgerError::Corrupt(format!(
                    "expected block {} but found {}",
                    expected, block.sequence
                )));
            }
        }

        info!(blocks = blocks.len(), "Ledger loaded from storage");

        Ok(Self {
            inner: Mutex::new(blocks),
            backend: Some(storage),
            flush_on_append: false,
        })
    }

    /// The durable backend, if any.
    pub fn storage(&self) -> Option<&BlockStorage> {
        self.backend.as_ref()
    }

    /// Flush the backend after every append.
    pub fn with_flush_on_append(mut self, flush: bool) -> Self {
        self.flush_on_append = flush;
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<LedgerBlock>>> {
        self.inner.lock().map_err(|_| LedgerError::LockPoisoned)
    }

    /// Appends a new block and returns it.
    ///
    /// The timestamp is the current time truncated to microseconds, clamped
    /// so it is never earlier than the tail's timestamp.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Encoding` if the payload cannot be canonicalized,
    /// or a storage error if the durable write fails. In both cases nothing
    /// is stored.
    pub fn append(&self, event_type: EventType, payload: Payload) -> Result<LedgerBlock> {
        let mut blocks = self.lock()?;

        let sequence = blocks.len() as u64;
        let (previous_hash, floor) = match blocks.last() {
            Some(tail) => (tail.current_hash, Some(tail.timestamp)),
            None => (BlockHash::GENESIS, None),
        };

        let now = Utc::now().trunc_subsecs(6);
        let timestamp = match floor {
            Some(floor) if floor > now => floor,
            _ => now,
        };

        let current_hash = hash_fields(&BlockFields {
            sequence,
            timestamp: &timestamp,
            event_type,
            payload: &payload,
            previous_hash: &previous_hash,
        })?;

        let block = LedgerBlock {
            sequence,
            timestamp,
            event_type,
            payload,
            previous_hash,
            current_hash,
        };

        if let Some(backend) = &self.backend {
            backend.append(&block)?;
            if self.flush_on_append {
                backend.flush()?;
            }
        }

        blocks.push(block.clone());

        debug!(
            sequence,
            event_type = %event_type,
            hash = %block.current_hash,
            "Appended ledger block"
        );

        Ok(block)
    }

    /// Serializes `event` into a payload object and appends it.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Encoding` if `event` does not serialize to a
    /// JSON object.
    pub fn append_event<T: Serialize + ?Sized>(
        &self,
        event_type: EventType,
        event: &T,
    ) -> Result<LedgerBlock> {
        self.append(event_type, to_payload(event)?)
    }

    /// Returns the block at `sequence`.
    pub fn get(&self, sequence: u64) -> Result<LedgerBlock> {
        let blocks = self.lock()?;
        usize::try_from(sequence)
            .ok()
            .and_then(|i| blocks.get(i))
            .cloned()
            .ok_or(LedgerError::NotFound(sequence))
    }

    /// Returns the most recent block, if any.
    pub fn tail(&self) -> Result<Option<LedgerBlock>> {
        Ok(self.lock()?.last().cloned())
    }

    /// Returns the number of blocks.
    pub fn len(&self) -> Result<u64> {
        Ok(self.lock()?.len() as u64)
    }

    /// Returns true if no block has been appended.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.lock()?.is_empty())
    }

    /// Returns copies of the blocks in `from..=to` (`to` defaults to the tail).
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InvalidRange` if the range is empty or reaches
    /// past the tail.
    pub fn blocks(&self, from: u64, to: Option<u64>) -> Result<Vec<LedgerBlock>> {
        let blocks = self.lock()?;
        let (start, end) = resolve_range(blocks.len() as u64, from, to)?;
        Ok(blocks[start..=end].to_vec())
    }

    /// Walks `from..=to` (`to` defaults to the tail) and reports the first
    /// broken link.
    ///
    /// An empty ledger verifies trivially when no explicit range is given.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InvalidRange` for a range outside the chain. A
    /// broken chain is not an error here; it is reported in the
    /// [`VerificationReport`].
    pub fn verify_chain(&self, from: u64, to: Option<u64>) -> Result<VerificationReport> {
        let blocks = self.lock()?;
        if blocks.is_empty() && from == 0 && to.is_none() {
            return Ok(VerificationReport::intact(0));
        }
        let (start, end) = resolve_range(blocks.len() as u64, from, to)?;
        Ok(verify_slice(&blocks[start..=end], from))
    }

    /// Like [`verify_chain`](Self::verify_chain), but a break is an error.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::ChainIntegrity` naming the first broken block.
    pub fn ensure_integrity(&self, from: u64, to: Option<u64>) -> Result<VerificationReport> {
        let report = self.verify_chain(from, to)?;
        match (report.first_break, report.break_kind) {
            (Some(sequence), Some(kind)) => {
                error!(sequence, kind = %kind, "Ledger chain integrity violated");
                Err(LedgerError::ChainIntegrity { sequence, kind })
            }
            _ => Ok(report),
        }
    }

    /// Flushes the durable backend, if any.
    pub fn flush(&self) -> Result<()> {
        if let Some(backend) = &self.backend {
            backend.flush()?;
        }
        Ok(())
    }

    /// Rewrites a block in place, bypassing every invariant.
    #[cfg(test)]
    pub(crate) fn tamper_with<F: FnOnce(&mut LedgerBlock)>(&self, sequence: u64, f: F) {
        let mut blocks = self.inner.lock().unwrap();
        f(&mut blocks[sequence as usize]);
    }
}

fn resolve_range(len: u64, from: u64, to: Option<u64>) -> Result<(usize, usize)> {
    let to = match to {
        Some(to) => to,
        None if len > 0 => len - 1,
        None => return Err(LedgerError::InvalidRange { from, to: 0, len }),
    };
    if from > to || to >= len {
        return Err(LedgerError::InvalidRange { from, to, len });
    }
    Ok((from as usize, to as usize))
}

impl std::fmt::Debug for LedgerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = self.inner.lock().map(|b| b.len()).ok();
        f.debug_struct("LedgerStore")
            .field("blocks", &len)
            .field("durable", &self.backend.is_some())
            .finish()
    }
}
