//! # Concord Ledger - Transparency Ledger
//!
//! An append-only, hash-chained audit log that gives every processing step
//! of a question a verifiable provenance trail.
//!
//! ## Purpose
//!
//! This crate implements three capabilities:
//!
//! 1. **RFC 8785 Canonicalization** - Deterministic JSON serialization so that
//!    the same logical block content always hashes to the same digest.
//!
//! 2. **Hash Chaining** - Each block carries the SHA-256 of its predecessor's
//!    canonical content, so any post-hoc edit breaks the next link.
//!
//! 3. **Durable Storage** - An optional Sled backend that persists blocks one
//!    key per sequence and refuses to overwrite them.
//!
//! ## Integrity Model
//!
//! | Threat | Description | Defense |
//! |--------|-------------|---------|
//! | Payload Edit | A stored block's payload is rewritten | Successor link no longer matches |
//! | Tail Edit | The newest block is rewritten | Re-hash against its own `current_hash` |
//! | Block Removal | A block is deleted from storage | Sequence gap detection |
//! | Forked Chain | Two writers extend the same tail | Single critical section in `append` |
//! | Key Reordering | Same payload, different key order | RFC 8785 canonicalization |
//!
//! The ledger is a single-process integrity log. It does not defend against
//! an attacker who can rewrite every block and every hash from the genesis
//! onward; anchoring the tail hash elsewhere is what covers that case.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                       LEDGER STORE                        │
//! │                                                           │
//! │   append(event_type, payload)                             │
//! │        │                                                  │
//! │        ▼                                                  │
//! │   ┌──────────────┐   bytes   ┌──────────┐   digest        │
//! │   │ CANONICALIZE │ ────────▶ │ SHA-256  │ ──────────┐     │
//! │   └──────────────┘           └──────────┘           │     │
//! │                                                     ▼     │
//! │   ┌─────────────────────────┐         ┌─────────────────┐ │
//! │   │ Mutex<Vec<LedgerBlock>> │ ◀────── │  SLED "blocks"  │ │
//! │   │   (in-memory arena)     │  push   │  (optional)     │ │
//! │   └─────────────────────────┘  after  └─────────────────┘ │
//! │                                write                      │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! ## References
//!
//! - **RFC 8785 (2020)** - "JSON Canonicalization Scheme (JCS)"
//!   <https://www.rfc-editor.org/rfc/rfc8785>
//!
//! - **Haber, S. & Stornetta, W. S. (1991)** - "How to Time-Stamp a Digital
//!   Document". Journal of Cryptology 3(2).
//!
//! - **NIST FIPS 180-4** - "Secure Hash Standard (SHS)" - SHA-256 specification.
//!   <https://csrc.nist.gov/publications/detail/fips/180/4/final>
//!
//! - **Sled Documentation** - <https://sled.rs/>
//!
//! ## Usage
//!
//! ```rust,no_run
//! use concord_ledger::{EventType, LedgerStore};
//! use serde_json::json;
//!
//! let ledger = LedgerStore::open("./data/ledger").unwrap();
//!
//! let block = ledger
//!     .append_event(
//!         EventType::DataCollection,
//!         &json!({"description": "question received", "question_id": "q-1"}),
//!     )
//!     .unwrap();
//! println!("appended block {} ({})", block.sequence, block.current_hash);
//!
//! let report = ledger.verify_chain(0, None).unwrap();
//! if !report.ok {
//!     println!("chain broken at {:?}", report.first_break);
//! }
//! ```

pub mod canonicalize;
pub mod chain;
pub mod models;
pub mod storage;
pub mod store;

pub use models::{
    BlockHash, BreakKind, EventType, LedgerBlock, LedgerError, Payload, Result,
    VerificationReport,
};
pub use store::LedgerStore;
