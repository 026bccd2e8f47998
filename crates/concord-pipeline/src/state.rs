//! Pipeline states and the transition table.
//!
//! ```text
//!   received ──start_processing──▶ processing ──mark_completed──▶ completed ──verify──▶ ledger_verified
//!      │                            │    ▲  │                        │
//!      │ fail                  fail │    │  │ cancel                 │ fail
//!      ▼                            ▼    │  ▼                        ▼
//!      └──────────────────────────▶ error ◀──────────────────────────┘
//!                                    │
//!                                    └──retry──▶ processing
//! ```
//!
//! `ledger_verified` accepts no transition. `error` accepts only `retry`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stage of a question's processing lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Question accepted, nothing started.
    Received,
    /// Models are being queried and their answers reconciled.
    Processing,
    /// Analysis finished, provenance not yet verified.
    Completed,
    /// Final state: the question's ledger trail verified.
    LedgerVerified,
    /// Processing stopped. Terminal unless retried.
    Error,
}

impl PipelineState {
    /// Every state, in lifecycle order.
    pub const ALL: [PipelineState; 5] = [
        PipelineState::Received,
        PipelineState::Processing,
        PipelineState::Completed,
        PipelineState::LedgerVerified,
        PipelineState::Error,
    ];

    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Received => "received",
            PipelineState::Processing => "processing",
            PipelineState::Completed => "completed",
            PipelineState::LedgerVerified => "ledger_verified",
            PipelineState::Error => "error",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An explicit transition request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    /// `received -> processing`
    StartProcessing,
    /// `processing -> completed`
    MarkCompleted,
    /// `completed -> ledger_verified`
    Verify,
    /// `received | processing | completed -> error`
    Fail,
    /// `error -> processing`
    Retry,
    /// `processing -> error`, never retryable
    Cancel,
}

impl Transition {
    /// Every transition call.
    pub const ALL: [Transition; 6] = [
        Transition::StartProcessing,
        Transition::MarkCompleted,
        Transition::Verify,
        Transition::Fail,
        Transition::Retry,
        Transition::Cancel,
    ];

    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::StartProcessing => "start_processing",
            Transition::MarkCompleted => "mark_completed",
            Transition::Verify => "verify",
            Transition::Fail => "fail",
            Transition::Retry => "retry",
            Transition::Cancel => "cancel",
        }
    }

    /// The state this transition normally leads to.
    pub fn requested_state(&self) -> PipelineState {
        match self {
            Transition::StartProcessing | Transition::Retry => PipelineState::Processing,
            Transition::MarkCompleted => PipelineState::Completed,
            Transition::Verify => PipelineState::LedgerVerified,
            Transition::Fail | Transition::Cancel => PipelineState::Error,
        }
    }

    /// Returns the target state if `from` permits this transition.
    pub fn target(&self, from: PipelineState) -> Option<PipelineState> {
        use PipelineState::*;
        let allowed = match self {
            Transition::StartProcessing => from == Received,
            Transition::MarkCompleted => from == Processing,
            Transition::Verify => from == Completed,
            Transition::Fail => matches!(from, Received | Processing | Completed),
            Transition::Retry => from == Error,
            Transition::Cancel => from == Processing,
        };
        allowed.then(|| self.requested_state())
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_verified_is_final() {
        for t in Transition::ALL {
            assert_eq!(t.target(PipelineState::LedgerVerified), None, "{}", t);
        }
    }

    #[test]
    fn test_error_only_accepts_retry() {
        for t in Transition::ALL {
            let expected = (t == Transition::Retry).then_some(PipelineState::Processing);
            assert_eq!(t.target(PipelineState::Error), expected, "{}", t);
        }
    }

    #[test]
    fn test_completed_never_reached_from_received() {
        assert_eq!(Transition::MarkCompleted.target(PipelineState::Received), None);
    }

    #[test]
    fn test_serde_names_match_display() {
        for s in PipelineState::ALL {
            assert_eq!(serde_json::to_string(&s).unwrap(), format!("\"{}\"", s));
        }
        for t in Transition::ALL {
            assert_eq!(serde_json::to_string(&t).unwrap(), format!("\"{}\"", t));
        }
    }
}
