//! Error types for the pipeline state machine.

use crate::state::{PipelineState, Transition};
use concord_ledger::LedgerError;
use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors returned by transition calls.
///
/// A returned error means the record was left exactly as it was.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The current state does not permit the requested transition.
    #[error("invalid transition '{transition}': cannot move from {current} to {requested}")]
    InvalidTransition {
        /// State the record is in.
        current: PipelineState,
        /// State the transition would lead to.
        requested: PipelineState,
        /// The call that was rejected.
        transition: Transition,
    },

    /// `retry()` on an error that is not retryable, or past the retry bound.
    #[error("question {id} cannot be retried: {reason}")]
    NonRetryable {
        /// Question identifier.
        id: String,
        /// Why the retry was refused.
        reason: String,
    },

    /// The question was rejected before a record was created.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// The ledger append or verification failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl PipelineError {
    /// True if the ledger reported a broken chain.
    pub fn is_integrity_violation(&self) -> bool {
        matches!(self, PipelineError::Ledger(LedgerError::ChainIntegrity { .. }))
    }
}
