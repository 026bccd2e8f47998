//! Result of processing one question.

use concord_pipeline::{PipelineState, QuestionRecord};
use concord_synthesis::{DebateOutcome, Exclusion, ModelResponse, SynthesisResult};
use serde::{Deserialize, Serialize};

/// What the analysis of a question produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    /// Responses that went into the initial synthesis, sorted by model id.
    pub responses: Vec<ModelResponse>,
    /// Models whose call failed or timed out.
    pub excluded: Vec<Exclusion>,
    /// Synthesis before any debate.
    pub initial_synthesis: SynthesisResult,
    /// Debate, when one was triggered.
    pub debate: Option<DebateOutcome>,
}

impl AnalysisReport {
    /// The synthesis the question was completed with: the debate's final
    /// synthesis if one ran, the initial one otherwise.
    pub fn final_synthesis(&self) -> &SynthesisResult {
        self.debate
            .as_ref()
            .map_or(&self.initial_synthesis, |d| &d.final_synthesis)
    }
}

/// Outcome of [`Orchestrator::process`](crate::Orchestrator::process).
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// The question completed and its ledger trail verified.
    Verified {
        /// Record in `ledger_verified`.
        record: QuestionRecord,
        /// The analysis it was completed with.
        report: Box<AnalysisReport>,
    },
    /// A collaborator failed; the failure is ledgered and the record is in
    /// `error`.
    Failed {
        /// Record in `error`.
        record: QuestionRecord,
    },
    /// Processing was cancelled; the record is in `error` and cannot be
    /// retried.
    Cancelled {
        /// Record in `error`.
        record: QuestionRecord,
    },
}

impl ProcessOutcome {
    /// The record after processing.
    pub fn record(&self) -> &QuestionRecord {
        match self {
            ProcessOutcome::Verified { record, .. }
            | ProcessOutcome::Failed { record }
            | ProcessOutcome::Cancelled { record } => record,
        }
    }

    /// State the record ended in.
    pub fn state(&self) -> PipelineState {
        self.record().state
    }

    /// The analysis report, for verified questions.
    pub fn report(&self) -> Option<&AnalysisReport> {
        match self {
            ProcessOutcome::Verified { report, .. } => Some(report),
            _ => None,
        }
    }
}

/// Outcome of [`Orchestrator::cancel`](crate::Orchestrator::cancel).
#[derive(Debug, Clone, PartialEq)]
pub enum CancelOutcome {
    /// A running `process` call was signalled and will record the
    /// cancellation itself.
    Signalled,
    /// No `process` call was running; the cancellation was recorded directly.
    Recorded(QuestionRecord),
}
