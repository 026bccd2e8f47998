//! Error types for Concord Core.

use concord_ledger::LedgerError;
use concord_pipeline::PipelineError;
use concord_synthesis::SynthesisError;
use thiserror::Error;

/// Core error type for orchestrator operations.
///
/// Collaborator failures during processing never surface here: they are
/// recorded as a ledgered `fail()` and reported through the process outcome.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// No record exists for the question id.
    #[error("Question not found: {0}")]
    NotFound(String),

    /// `submit` was called with an id that is already taken.
    #[error("Question already exists: {0}")]
    AlreadyExists(String),

    /// The persistence collaborator failed.
    #[error("Question store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file is not valid JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Pipeline error passthrough.
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Ledger error passthrough.
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Synthesis error passthrough.
    #[error("Synthesis error: {0}")]
    Synthesis(#[from] SynthesisError),
}

impl OrchestratorError {
    /// True if the ledger chain was found broken, directly or through the
    /// pipeline.
    pub fn is_integrity_violation(&self) -> bool {
        match self {
            OrchestratorError::Ledger(LedgerError::ChainIntegrity { .. }) => true,
            OrchestratorError::Pipeline(e) => e.is_integrity_violation(),
            _ => false,
        }
    }
}

/// Failure of the question store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The backing store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A stored record could not be decoded.
    #[error("record '{id}' is corrupt: {message}")]
    Corrupt {
        /// Question id of the record.
        id: String,
        /// Decoder message.
        message: String,
    },
}

/// Failure of a single model call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvocationError {
    /// The model did not answer within the call timeout.
    #[error("Model '{model_id}' timed out after {timeout_ms}ms")]
    Timeout {
        /// Model that timed out.
        model_id: String,
        /// Timeout that was applied.
        timeout_ms: u64,
    },

    /// The model call or feature extraction returned an error.
    #[error("Model '{model_id}' failed: {message}")]
    Failed {
        /// Model that failed.
        model_id: String,
        /// Error reported by the collaborator.
        message: String,
    },
}

impl InvocationError {
    /// Shorthand for [`InvocationError::Failed`].
    pub fn failed(model_id: impl Into<String>, message: impl Into<String>) -> Self {
        InvocationError::Failed {
            model_id: model_id.into(),
            message: message.into(),
        }
    }

    /// The model this error concerns.
    pub fn model_id(&self) -> &str {
        match self {
            InvocationError::Timeout { model_id, .. } | InvocationError::Failed { model_id, .. } => {
                model_id
            }
        }
    }

    /// True for [`InvocationError::Timeout`].
    pub fn is_timeout(&self) -> bool {
        matches!(self, InvocationError::Timeout { .. })
    }
}
