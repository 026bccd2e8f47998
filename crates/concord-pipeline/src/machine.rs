//! # Pipeline State Machine
//!
//! Drives a [`QuestionRecord`] through its lifecycle and records every
//! transition in the transparency ledger.
//!
//! ## Transition Protocol
//!
//! Every call follows the same order:
//!
//! 1. Validate that the current state permits the transition
//!    (else [`PipelineError::InvalidTransition`], naming both states).
//! 2. Append a ledger block summarizing the transition.
//! 3. Update the record: state, timestamps, and the block's sequence in
//!    `ledger_block_refs`.
//!
//! The record is only touched after the append succeeded, so a failing
//! ledger leaves it unchanged. As a consequence
//! `ledger_block_refs.len()` always equals the number of transitions the
//! record went through, creation included.
//!
//! ## Concurrency
//!
//! The machine itself holds no per-question state and can be shared. The
//! caller serializes calls for the same question id; the ledger serializes
//! appends across questions.
//!
//! ## Example
//!
//! ```rust
//! use concord_ledger::{LedgerStore, Payload};
//! use concord_pipeline::{Analysis, PipelineState, PipelineStateMachine};
//! use std::sync::Arc;
//!
//! let ledger = Arc::new(LedgerStore::in_memory());
//! let machine = PipelineStateMachine::new(ledger);
//!
//! let mut record = machine.receive("q-1", "Is nuclear power safe?")?;
//! machine.start_processing(&mut record)?;
//! machine.mark_completed(&mut record, Analysis::Ready(Payload::new()))?;
//! machine.verify(&mut record)?;
//!
//! assert_eq!(record.state, PipelineState::LedgerVerified);
//! assert_eq!(record.ledger_block_refs.len(), 4);
//! # Ok::<(), concord_pipeline::PipelineError>(())
//! ```

use crate::error::{PipelineError, Result};
use crate::record::{Analysis, FailureKind, FailureReason, PipelineFailure, QuestionRecord};
use crate::state::{PipelineState, Transition};
use chrono::{DateTime, Utc};
use concord_ledger::canonicalize::hash_bytes;
use concord_ledger::{EventType, LedgerBlock, LedgerStore, Payload};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Configuration for [`PipelineStateMachine`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Upper bound on `retry()` calls per question. `None` means unbounded.
    pub max_retries: Option<u32>,
}

impl PipelineConfig {
    /// Creates a config with no retry bound.
    #[must_use]
    pub const fn new() -> Self {
        Self { max_retries: None }
    }

    /// Sets the retry bound.
    #[must_use]
    pub const fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = Some(max);
        self
    }
}

#[derive(Serialize)]
struct TransitionEvent<'a> {
    description: String,
    question_id: &'a str,
    question_hash: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    transition: Option<Transition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    from: Option<PipelineState>,
    to: PipelineState,
    timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a PipelineFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    analysis: Option<&'a Payload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_count: Option<u32>,
}

/// Ledger-backed state machine for question records.
#[derive(Debug, Clone)]
pub struct PipelineStateMachine {
    ledger: Arc<LedgerStore>,
    config: PipelineConfig,
}

impl PipelineStateMachine {
    /// Creates a machine with the default configuration.
    pub fn new(ledger: Arc<LedgerStore>) -> Self {
        Self::with_config(ledger, PipelineConfig::new())
    }

    /// Creates a machine with a custom configuration.
    pub fn with_config(ledger: Arc<LedgerStore>, config: PipelineConfig) -> Self {
        Self { ledger, config }
    }

    /// The ledger transitions are recorded in.
    pub fn ledger(&self) -> &Arc<LedgerStore> {
        &self.ledger
    }

    /// Active configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Creates a record in `received` and ledgers its arrival.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::MalformedInput`] for an empty id or a blank
    /// question. No record and no ledger block exist in that case.
    pub fn receive(&self, id: impl Into<String>, question: &str) -> Result<QuestionRecord> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(PipelineError::MalformedInput(
                "question id is empty".to_string(),
            ));
        }
        if question.trim().is_empty() {
            return Err(PipelineError::MalformedInput(format!(
                "question {} has no text",
                id
            )));
        }

        let question_hash = hash_bytes(question.as_bytes()).to_hex();
        let now = Utc::now();

        let block = self.ledger.append_event(
            EventType::DataCollection,
            &TransitionEvent {
                description: "question received".to_string(),
                question_id: &id,
                question_hash: &question_hash,
                transition: None,
                from: None,
                to: PipelineState::Received,
                timestamp: now,
                error: None,
                analysis: None,
                retry_count: None,
            },
        )?;

        info!(
            question_id = %id,
            to = %PipelineState::Received,
            sequence = block.sequence,
            "Question received"
        );

        Ok(QuestionRecord {
            id,
            question: question.to_string(),
            question_hash,
            state: PipelineState::Received,
            created_at: now,
            processing_started_at: None,
            completed_at: None,
            verified_at: None,
            updated_at: now,
            ledger_block_refs: vec![block.sequence],
            last_error: None,
            retry_count: 0,
            analysis: None,
        })
    }

    /// `received -> processing`
    pub fn start_processing(&self, record: &mut QuestionRecord) -> Result<LedgerBlock> {
        let to = self.check(record, Transition::StartProcessing)?;
        let at = next_timestamp(record);
        let block = self.record_transition(
            record,
            EventType::PipelineStep,
            Transition::StartProcessing,
            to,
            at,
            "processing started",
            None,
            None,
        )?;

        record.processing_started_at.get_or_insert(at);
        self.commit(record, to, at, &block);
        Ok(block)
    }

    /// `processing -> completed`, or `processing -> error` when the analysis
    /// is unavailable.
    ///
    /// An unavailable analysis is a transient failure: the record moves to
    /// `error` with `retryable = true`.
    pub fn mark_completed(
        &self,
        record: &mut QuestionRecord,
        analysis: Analysis,
    ) -> Result<LedgerBlock> {
        self.check(record, Transition::MarkCompleted)?;

        match analysis {
            Analysis::Ready(summary) => {
                let at = next_timestamp(record);
                let block = self.record_transition(
                    record,
                    EventType::PipelineStep,
                    Transition::MarkCompleted,
                    PipelineState::Completed,
                    at,
                    "analysis completed",
                    None,
                    Some(&summary),
                )?;
                record.completed_at.get_or_insert(at);
                record.analysis = Some(summary);
                self.commit(record, PipelineState::Completed, at, &block);
                Ok(block)
            }
            Analysis::Unavailable { reason } => self.enter_error(
                record,
                Transition::MarkCompleted,
                EventType::Failure,
                FailureReason::retryable(FailureKind::AnalysisUnavailable, reason),
            ),
        }
    }

    /// `completed -> ledger_verified`
    ///
    /// Verifies the chain over this question's blocks before recording the
    /// verification.
    ///
    /// # Errors
    ///
    /// A broken chain propagates as `LedgerError::ChainIntegrity` and the
    /// record stays in `completed`.
    pub fn verify(&self, record: &mut QuestionRecord) -> Result<LedgerBlock> {
        let to = self.check(record, Transition::Verify)?;

        let first = record.ledger_block_refs.first().copied().unwrap_or(0);
        let last = record.ledger_block_refs.last().copied();
        let report = self.ledger.ensure_integrity(first, last)?;

        let at = next_timestamp(record);
        let block = self.record_transition(
            record,
            EventType::Verification,
            Transition::Verify,
            to,
            at,
            &format!("ledger trail verified ({} blocks)", report.checked),
            None,
            None,
        )?;

        record.verified_at.get_or_insert(at);
        self.commit(record, to, at, &block);
        Ok(block)
    }

    /// `received | processing | completed -> error`
    pub fn fail(&self, record: &mut QuestionRecord, reason: FailureReason) -> Result<LedgerBlock> {
        self.check(record, Transition::Fail)?;
        self.enter_error(record, Transition::Fail, EventType::Failure, reason)
    }

    /// `processing -> error` with a non-retryable `cancelled` failure.
    ///
    /// Cancellation is honoured only while processing; any other state
    /// returns [`PipelineError::InvalidTransition`].
    pub fn cancel(&self, record: &mut QuestionRecord, reason: &str) -> Result<LedgerBlock> {
        self.check(record, Transition::Cancel)?;
        self.enter_error(
            record,
            Transition::Cancel,
            EventType::Cancellation,
            FailureReason::fatal(FailureKind::Cancelled, reason),
        )
    }

    /// `error -> processing`
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NonRetryable`] if the stored failure is not
    /// retryable or the configured retry bound is reached.
    pub fn retry(&self, record: &mut QuestionRecord) -> Result<LedgerBlock> {
        let to = self.check(record, Transition::Retry)?;

        match &record.last_error {
            Some(failure) if failure.reason.retryable => {}
            Some(failure) => {
                return Err(PipelineError::NonRetryable {
                    id: record.id.clone(),
                    reason: format!("{}: {}", failure.reason.kind, failure.reason.message),
                })
            }
            None => {
                return Err(PipelineError::NonRetryable {
                    id: record.id.clone(),
                    reason: "no failure recorded".to_string(),
                })
            }
        }

        if let Some(max) = self.config.max_retries {
            if record.retry_count >= max {
                return Err(PipelineError::NonRetryable {
                    id: record.id.clone(),
                    reason: format!("retry limit of {} reached", max),
                });
            }
        }

        let at = next_timestamp(record);
        let attempt = record.retry_count + 1;
        let block = self.record_transition_with_retry(record, to, at, attempt)?;

        record.last_error = None;
        record.retry_count = attempt;
        self.commit(record, to, at, &block);
        Ok(block)
    }

    fn check(&self, record: &QuestionRecord, transition: Transition) -> Result<PipelineState> {
        transition
            .target(record.state)
            .ok_or(PipelineError::InvalidTransition {
                current: record.state,
                requested: transition.requested_state(),
                transition,
            })
    }

    fn enter_error(
        &self,
        record: &mut QuestionRecord,
        transition: Transition,
        event_type: EventType,
        reason: FailureReason,
    ) -> Result<LedgerBlock> {
        let at = next_timestamp(record);
        let failure = PipelineFailure {
            reason,
            failed_from: record.state,
            failed_at: at,
        };
        let description = format!("{}: {}", failure.reason.kind, failure.reason.message);
        let block = self.record_transition(
            record,
            event_type,
            transition,
            PipelineState::Error,
            at,
            &description,
            Some(&failure),
            None,
        )?;

        warn!(
            question_id = %record.id,
            kind = %failure.reason.kind,
            retryable = failure.reason.retryable,
            "Question moved to error"
        );

        record.last_error = Some(failure);
        self.commit(record, PipelineState::Error, at, &block);
        Ok(block)
    }

    #[allow(clippy::too_many_arguments)]
    fn record_transition(
        &self,
        record: &QuestionRecord,
        event_type: EventType,
        transition: Transition,
        to: PipelineState,
        at: DateTime<Utc>,
        description: &str,
        error: Option<&PipelineFailure>,
        analysis: Option<&Payload>,
    ) -> Result<LedgerBlock> {
        Ok(self.ledger.append_event(
            event_type,
            &TransitionEvent {
                description: description.to_string(),
                question_id: &record.id,
                question_hash: &record.question_hash,
                transition: Some(transition),
                from: Some(record.state),
                to,
                timestamp: at,
                error,
                analysis,
                retry_count: None,
            },
        )?)
    }

    fn record_transition_with_retry(
        &self,
        record: &QuestionRecord,
        to: PipelineState,
        at: DateTime<Utc>,
        attempt: u32,
    ) -> Result<LedgerBlock> {
        Ok(self.ledger.append_event(
            EventType::PipelineStep,
            &TransitionEvent {
                description: format!("retry attempt {}", attempt),
                question_id: &record.id,
                question_hash: &record.question_hash,
                transition: Some(Transition::Retry),
                from: Some(record.state),
                to,
                timestamp: at,
                error: None,
                analysis: None,
                retry_count: Some(attempt),
            },
        )?)
    }

    fn commit(
        &self,
        record: &mut QuestionRecord,
        to: PipelineState,
        at: DateTime<Utc>,
        block: &LedgerBlock,
    ) {
        let from = record.state;
        record.state = to;
        record.updated_at = at;
        record.ledger_block_refs.push(block.sequence);

        info!(
            question_id = %record.id,
            from = %from,
            to = %to,
            sequence = block.sequence,
            "Pipeline transition"
        );
    }
}

/// Current time, clamped so it never precedes the record's last transition.
fn next_timestamp(record: &QuestionRecord) -> DateTime<Utc> {
    Utc::now().max(record.updated_at)
}
