//! The per-question record and the failure descriptors it carries.

use crate::state::PipelineState;
use chrono::{DateTime, Utc};
use concord_ledger::Payload;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of a processing failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A model did not answer within its call timeout.
    ModelTimeout,
    /// A model call returned an error.
    ModelInvocation,
    /// Too few models answered to compare anything.
    InsufficientResponses,
    /// The analysis step produced no result.
    AnalysisUnavailable,
    /// Synthesis rejected the collected responses.
    Synthesis,
    /// A caller cancelled processing.
    Cancelled,
    /// Anything else reported by a collaborator.
    Other,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::ModelTimeout => "model_timeout",
            FailureKind::ModelInvocation => "model_invocation",
            FailureKind::InsufficientResponses => "insufficient_responses",
            FailureKind::AnalysisUnavailable => "analysis_unavailable",
            FailureKind::Synthesis => "synthesis",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Other => "other",
        };
        f.write_str(s)
    }
}

/// What went wrong, as passed to `fail()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    /// Failure category.
    pub kind: FailureKind,
    /// Human-readable detail.
    pub message: String,
    /// Whether `retry()` may resume processing.
    pub retryable: bool,
}

impl FailureReason {
    /// A failure that `retry()` may recover from.
    pub fn retryable(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: true,
        }
    }

    /// A terminal failure.
    pub fn fatal(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: false,
        }
    }
}

/// Error descriptor stored on a record while it is in `error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineFailure {
    /// The reported reason.
    #[serde(flatten)]
    pub reason: FailureReason,
    /// State the record was in when it failed.
    pub failed_from: PipelineState,
    /// When the failure was recorded.
    pub failed_at: DateTime<Utc>,
}

/// Outcome of the analysis step handed to `mark_completed`.
#[derive(Debug, Clone, PartialEq)]
pub enum Analysis {
    /// Analysis finished; the summary is ledgered with the completion.
    Ready(Payload),
    /// The analysis step could not produce a result. Moves the record to
    /// `error` with a retryable failure.
    Unavailable {
        /// Why no result was produced.
        reason: String,
    },
}

/// Lifecycle record of one question.
///
/// Mutated only through [`PipelineStateMachine`](crate::PipelineStateMachine)
/// calls. Fields are public for reading and for persistence round-trips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionRecord {
    /// Opaque identifier assigned by the persistence layer.
    pub id: String,
    /// The question text.
    pub question: String,
    /// SHA-256 of the question text, hex encoded.
    pub question_hash: String,
    /// Current state.
    pub state: PipelineState,
    /// Set by `receive`.
    pub created_at: DateTime<Utc>,
    /// Set the first time processing starts.
    pub processing_started_at: Option<DateTime<Utc>>,
    /// Set once, on completion.
    pub completed_at: Option<DateTime<Utc>>,
    /// Set once, on verification.
    pub verified_at: Option<DateTime<Utc>>,
    /// Timestamp of the most recent transition.
    pub updated_at: DateTime<Utc>,
    /// Ledger sequences of this question's blocks, in causal order.
    pub ledger_block_refs: Vec<u64>,
    /// Present only while `state == error`.
    pub last_error: Option<PipelineFailure>,
    /// Number of successful `retry()` calls.
    pub retry_count: u32,
    /// Summary recorded by the last successful `mark_completed`.
    pub analysis: Option<Payload>,
}

impl QuestionRecord {
    /// True in `ledger_verified`, or in `error` with a non-retryable failure.
    pub fn is_terminal(&self) -> bool {
        match self.state {
            PipelineState::LedgerVerified => true,
            PipelineState::Error => self
                .last_error
                .as_ref()
                .map_or(true, |e| !e.reason.retryable),
            _ => false,
        }
    }

    /// True if `retry()` is permitted by the stored failure.
    pub fn is_retryable(&self) -> bool {
        self.state == PipelineState::Error
            && self.last_error.as_ref().is_some_and(|e| e.reason.retryable)
    }

    /// Number of transitions executed so far, including creation.
    pub fn transition_count(&self) -> usize {
        self.ledger_block_refs.len()
    }
}
