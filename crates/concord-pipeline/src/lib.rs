//! # Concord Pipeline - Question Lifecycle
//!
//! Tracks each question through `received → processing → completed →
//! ledger_verified`, with an `error` state and optional retry. Every
//! transition is recorded as a block in the transparency ledger.
//!
//! ## Guarantees
//!
//! - **Totality**: every state answers every transition call, either with a
//!   new ledger block or with a named error. Nothing is silently ignored.
//! - **No skipped stages**: `completed` is only reachable from `processing`.
//! - **Ledger parity**: `ledger_block_refs.len()` equals the number of
//!   transitions executed, creation included.
//! - **Monotonic time**: transition timestamps never decrease, even if the
//!   wall clock steps back.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │            PipelineStateMachine              │
//! │  ┌──────────────┐        ┌────────────────┐  │
//! │  │  Transition  │        │ QuestionRecord │  │
//! │  │    table     │        │  (per caller)  │  │
//! │  └──────┬───────┘        └───────▲────────┘  │
//! │         │ validate               │ commit    │
//! │         ▼                        │           │
//! │  ┌──────────────────────────────────────┐    │
//! │  │        LedgerStore::append_event     │    │
//! │  └──────────────────────────────────────┘    │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Error Policy
//!
//! | Error | Meaning | Caller action |
//! |-------|---------|---------------|
//! | `InvalidTransition` | State machine misuse | Fix the caller |
//! | `NonRetryable` | Error is terminal | Report, never auto-retry |
//! | `MalformedInput` | Rejected before `received` | Fix the input |
//! | `Ledger(ChainIntegrity)` | Provenance broken | Alert, do not repair |

mod error;
mod machine;
mod record;
mod state;

pub use error::{PipelineError, Result};
pub use machine::{PipelineConfig, PipelineStateMachine};
pub use record::{Analysis, FailureKind, FailureReason, PipelineFailure, QuestionRecord};
pub use state::{PipelineState, Transition};
