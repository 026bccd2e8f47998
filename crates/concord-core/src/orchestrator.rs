//! The question orchestrator.
//!
//! [`Orchestrator`] is the integration point: it moves each question through
//! the pipeline state machine, fans the question out to every configured
//! model, hands the answers to the synthesis engine, runs a consensus debate
//! when agreement is poor, and verifies the question's ledger trail.
//!
//! ## Processing
//!
//! ```text
//!   submit ─▶ received
//!                │ process
//!                ▼
//!           processing ──┬─ fan-out ─▶ model₁ … modelₙ   (per-call timeout)
//!                │       ├─ extract features
//!                │       ├─ synthesize
//!                │       └─ debate rounds (fan-out again)
//!                ▼
//!           completed ─▶ ledger_verified
//!
//!   collaborator failure ─▶ fail()   ─▶ error (retryable)
//!   cancel               ─▶ cancel() ─▶ error (not retryable)
//! ```
//!
//! ## Concurrency
//!
//! Distinct questions are processed concurrently. Calls for the same
//! question id are serialized by a per-question lock, with one exception:
//! [`Orchestrator::cancel`] signals a running `process` call through its
//! cancellation token instead of waiting for the lock.

use crate::collaborators::{FeatureExtractor, ModelInvoker, QuestionStore};
use crate::config::ConcordConfig;
use crate::error::{InvocationError, OrchestratorError};
use crate::outcome::{AnalysisReport, CancelOutcome, ProcessOutcome};
use crate::Result;

use concord_ledger::canonicalize::to_payload;
use concord_ledger::{LedgerBlock, LedgerStore, VerificationReport};
use concord_pipeline::{
    Analysis, FailureKind, FailureReason, PipelineState, PipelineStateMachine, QuestionRecord,
};
use concord_synthesis::{
    ConclusionReason, DebateCoordinator, DebatePrompt, Exclusion, ModelResponse,
    ParticipantReply, SynthesisEngine, SynthesisError, SynthesisResult, VoteTally,
};

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Reason recorded when a caller cancels processing.
const CANCEL_REASON: &str = "cancelled by caller";

/// Ledger summary of a completed analysis.
#[derive(Serialize)]
struct CompletionSummary<'a> {
    models: Vec<&'a str>,
    excluded: &'a [Exclusion],
    consensus_index: f64,
    synthesis_digest: String,
    synthesis: &'a SynthesisResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    debate: Option<DebateSummary<'a>>,
}

#[derive(Serialize)]
struct DebateSummary<'a> {
    initial_consensus: f64,
    rounds: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    conclusion: Option<ConclusionReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    vote: Option<&'a VoteTally>,
}

type LockMap = std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>;

/// Holds a question's lock. On release the lock's map entry is dropped
/// once no other call holds or waits for it.
struct QuestionGuard<'a> {
    locks: &'a LockMap,
    id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for QuestionGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks
            .get(&self.id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.id);
        }
    }
}

/// Removes a question's cancellation token when processing ends, including
/// when the `process` future is dropped.
struct ActiveToken<'a> {
    active: &'a std::sync::Mutex<HashMap<String, CancellationToken>>,
    id: String,
}

impl Drop for ActiveToken<'_> {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.remove(&self.id);
    }
}

/// Drives questions from submission to a verified ledger trail.
///
/// # Example
///
/// ```rust,ignore
/// let orchestrator = Orchestrator::new(config, ledger, store, invoker, extractor)?;
///
/// orchestrator.submit("q-1", "Who benefits from tariffs?").await?;
/// match orchestrator.process("q-1").await? {
///     ProcessOutcome::Verified { report, .. } => publish(report.final_synthesis()),
///     ProcessOutcome::Failed { record } if record.is_retryable() => schedule_retry(record),
///     other => report_terminal(other.record()),
/// }
/// ```
pub struct Orchestrator {
    config: ConcordConfig,
    machine: PipelineStateMachine,
    engine: SynthesisEngine,
    coordinator: DebateCoordinator,
    store: Arc<dyn QuestionStore>,
    invoker: Arc<dyn ModelInvoker>,
    extractor: Arc<dyn FeatureExtractor>,
    locks: LockMap,
    active: std::sync::Mutex<HashMap<String, CancellationToken>>,
}

impl Orchestrator {
    /// Creates an orchestrator.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Config`] if the configuration is invalid.
    pub fn new(
        config: ConcordConfig,
        ledger: Arc<LedgerStore>,
        store: Arc<dyn QuestionStore>,
        invoker: Arc<dyn ModelInvoker>,
        extractor: Arc<dyn FeatureExtractor>,
    ) -> Result<Self> {
        config.validate()?;

        let machine = PipelineStateMachine::with_config(ledger, config.pipeline.clone());
        let engine = SynthesisEngine::new(config.synthesis.clone());
        let coordinator = DebateCoordinator::new(engine.clone(), config.debate.clone());

        info!(
            models = config.models.model_ids.len(),
            call_timeout_ms = config.models.call_timeout_ms,
            debate = config.debate.enabled,
            "Orchestrator initialized"
        );

        Ok(Self {
            config,
            machine,
            engine,
            coordinator,
            store,
            invoker,
            extractor,
            locks: std::sync::Mutex::new(HashMap::new()),
            active: std::sync::Mutex::new(HashMap::new()),
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &ConcordConfig {
        &self.config
    }

    /// The shared ledger.
    pub fn ledger(&self) -> &Arc<LedgerStore> {
        self.machine.ledger()
    }

    // ------------------------------------------------------------------
    // Lifecycle operations
    // ------------------------------------------------------------------

    /// Registers a new question in `received`.
    ///
    /// # Errors
    ///
    /// - [`OrchestratorError::AlreadyExists`] if the id is taken
    /// - `PipelineError::MalformedInput` for an empty id or question
    pub async fn submit(&self, id: impl Into<String>, question: &str) -> Result<QuestionRecord> {
        let id = id.into();
        let _guard = self.lock_question(&id).await;

        if self.store.load(&id).await?.is_some() {
            return Err(OrchestratorError::AlreadyExists(id));
        }

        let record = self.machine.receive(id, question)?;
        self.save(&record).await?;
        Ok(record)
    }

    /// Processes a question in `received`, or resumes one left in
    /// `processing` by [`Orchestrator::retry`].
    ///
    /// Collaborator failures are ledgered through `fail()` and returned as
    /// [`ProcessOutcome::Failed`], not as errors.
    ///
    /// # Errors
    ///
    /// - [`OrchestratorError::NotFound`] for an unknown id
    /// - `PipelineError::InvalidTransition` if the question is in any other
    ///   state
    /// - a chain integrity error if the question's ledger trail is broken;
    ///   the record is left in `completed`
    pub async fn process(&self, id: &str) -> Result<ProcessOutcome> {
        let _guard = self.lock_question(id).await;
        let token = CancellationToken::new();
        let active = self.register(id, token.clone());

        let mut record = self.load(id).await?;
        if record.state != PipelineState::Processing {
            self.machine.start_processing(&mut record)?;
            self.save(&record).await?;
        }

        let analysis = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            result = self.analyze(&record.question) => Some(result),
        };

        // A cancel that got the token before it was unregistered must win.
        drop(active);
        let analysis = if token.is_cancelled() { None } else { analysis };

        match analysis {
            None => {
                self.machine.cancel(&mut record, CANCEL_REASON)?;
                self.save(&record).await?;
                info!(question_id = %id, "Processing cancelled");
                Ok(ProcessOutcome::Cancelled { record })
            }
            Some(Err(reason)) => {
                warn!(question_id = %id, kind = %reason.kind, reason = %reason.message, "Processing failed");
                self.machine.fail(&mut record, reason)?;
                self.save(&record).await?;
                Ok(ProcessOutcome::Failed { record })
            }
            Some(Ok(report)) => {
                let summary = completion_summary(&report)?;
                self.machine
                    .mark_completed(&mut record, Analysis::Ready(summary))?;
                self.save(&record).await?;

                if let Err(e) = self.machine.verify(&mut record) {
                    if e.is_integrity_violation() {
                        error!(question_id = %id, error = %e, "Ledger trail failed verification");
                    }
                    return Err(e.into());
                }
                self.save(&record).await?;

                info!(
                    question_id = %id,
                    consensus_index = report.final_synthesis().consensus_index,
                    debated = report.debate.is_some(),
                    "Question verified"
                );
                Ok(ProcessOutcome::Verified {
                    record,
                    report: Box::new(report),
                })
            }
        }
    }

    /// Moves a question in `error` back to `processing`. Call
    /// [`Orchestrator::process`] to resume it.
    ///
    /// # Errors
    ///
    /// `PipelineError::NonRetryable` if the failure was not retryable or the
    /// retry bound is reached.
    pub async fn retry(&self, id: &str) -> Result<QuestionRecord> {
        let _guard = self.lock_question(id).await;
        let mut record = self.load(id).await?;
        self.machine.retry(&mut record)?;
        self.save(&record).await?;
        Ok(record)
    }

    /// Cancels a question in `processing`.
    ///
    /// A running [`Orchestrator::process`] call is signalled and records the
    /// cancellation itself. Once its analysis has finished the call is no
    /// longer cancellable: this waits for it and then fails with
    /// `InvalidTransition`. Otherwise the cancellation is recorded here.
    ///
    /// # Errors
    ///
    /// `PipelineError::InvalidTransition` if the question is not processing.
    pub async fn cancel(&self, id: &str) -> Result<CancelOutcome> {
        if self.signal(id) {
            info!(question_id = %id, "Cancellation signalled");
            return Ok(CancelOutcome::Signalled);
        }

        let _guard = self.lock_question(id).await;
        let mut record = self.load(id).await?;
        self.machine.cancel(&mut record, CANCEL_REASON)?;
        self.save(&record).await?;
        Ok(CancelOutcome::Recorded(record))
    }

    /// Verifies a question left in `completed`, for example after an earlier
    /// verification found a broken trail.
    pub async fn verify(&self, id: &str) -> Result<QuestionRecord> {
        let _guard = self.lock_question(id).await;
        let mut record = self.load(id).await?;
        self.machine.verify(&mut record)?;
        self.save(&record).await?;
        Ok(record)
    }

    // ------------------------------------------------------------------
    // Read API
    // ------------------------------------------------------------------

    /// Current record of a question.
    pub async fn record(&self, id: &str) -> Result<QuestionRecord> {
        self.load(id).await
    }

    /// One ledger block.
    pub fn block(&self, sequence: u64) -> Result<LedgerBlock> {
        Ok(self.ledger().get(sequence)?)
    }

    /// Verifies a range of the ledger. `to = None` means up to the tail.
    pub fn verify_chain(&self, from: u64, to: Option<u64>) -> Result<VerificationReport> {
        Ok(self.ledger().verify_chain(from, to)?)
    }

    // ------------------------------------------------------------------
    // Analysis
    // ------------------------------------------------------------------

    async fn analyze(&self, question: &str) -> std::result::Result<AnalysisReport, FailureReason> {
        let (responses, failures) = self.collect_responses(question).await;

        let required = self.config.models.min_responses;
        if responses.len() < required {
            return Err(insufficient_responses(responses.len(), required, &failures));
        }

        let excluded: Vec<Exclusion> = failures
            .iter()
            .map(|e| Exclusion {
                model_id: e.model_id().to_string(),
                reason: e.to_string(),
            })
            .collect();

        let initial = self.engine.synthesize(&responses).map_err(synthesis_failure)?;
        debug!(
            consensus_index = initial.consensus_index,
            responses = responses.len(),
            "Initial synthesis"
        );

        let mut session = self
            .coordinator
            .begin(question, responses.clone(), initial.clone());
        let debate = if session.is_active() {
            while session.is_active() {
                let prompts = self
                    .coordinator
                    .prepare_round(&session)
                    .map_err(synthesis_failure)?;
                let replies = self.deliberate(prompts).await;
                match self.coordinator.complete_round(&mut session, replies) {
                    Ok(_) | Err(SynthesisError::InsufficientParticipants { .. }) => {}
                    Err(e) => return Err(synthesis_failure(e)),
                }
            }
            Some(self.coordinator.conclude(session))
        } else {
            None
        };

        Ok(AnalysisReport {
            responses,
            excluded,
            initial_synthesis: initial,
            debate,
        })
    }

    /// Asks every configured model concurrently. Responses come back sorted
    /// by model id; failures in configuration order.
    async fn collect_responses(&self, question: &str) -> (Vec<ModelResponse>, Vec<InvocationError>) {
        let timeout = self.config.models.call_timeout();
        let mut join_set = JoinSet::new();

        for model_id in &self.config.models.model_ids {
            let invoker = Arc::clone(&self.invoker);
            let extractor = Arc::clone(&self.extractor);
            let question = question.to_string();
            let model_id = model_id.clone();
            join_set.spawn(async move {
                let result =
                    call_model(invoker.as_ref(), extractor.as_ref(), &question, &model_id, timeout)
                        .await;
                (model_id, result)
            });
        }

        let mut results = HashMap::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((model_id, result)) => {
                    results.insert(model_id, result);
                }
                Err(e) => warn!(error = %e, "Model task panicked"),
            }
        }

        let mut responses = Vec::new();
        let mut failures = Vec::new();
        for model_id in &self.config.models.model_ids {
            match results.remove(model_id) {
                Some(Ok(response)) => responses.push(response),
                Some(Err(e)) => {
                    warn!(model = %model_id, error = %e, "Model excluded");
                    failures.push(e);
                }
                None => failures.push(InvocationError::failed(model_id, "task aborted")),
            }
        }
        responses.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        (responses, failures)
    }

    /// Delivers one round of debate prompts concurrently.
    async fn deliberate(&self, prompts: Vec<DebatePrompt>) -> Vec<ParticipantReply> {
        let timeout = self.config.models.call_timeout();
        let mut join_set = JoinSet::new();
        let expected: Vec<String> = prompts.iter().map(|p| p.model_id.clone()).collect();

        for prompt in prompts {
            let invoker = Arc::clone(&self.invoker);
            join_set.spawn(async move {
                let outcome = match tokio::time::timeout(timeout, invoker.deliberate(&prompt, timeout)).await {
                    Ok(Ok(text)) => Ok(text),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => Err(timeout_error(&prompt.model_id, timeout).to_string()),
                };
                ParticipantReply {
                    model_id: prompt.model_id,
                    outcome,
                }
            });
        }

        let mut replies = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(reply) => replies.push(reply),
                Err(e) => warn!(error = %e, "Debate task panicked"),
            }
        }
        for model_id in expected {
            if !replies.iter().any(|r| r.model_id == model_id) {
                replies.push(ParticipantReply::failed(model_id, "task aborted"));
            }
        }
        replies.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        replies
    }

    // ------------------------------------------------------------------
    // Plumbing
    // ------------------------------------------------------------------

    async fn lock_question(&self, id: &str) -> QuestionGuard<'_> {
        let mut held = QuestionGuard {
            locks: &self.locks,
            id: id.to_string(),
            guard: None,
        };
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(
                locks
                    .entry(id.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };
        held.guard = Some(lock.lock_owned().await);
        held
    }

    fn register(&self, id: &str, token: CancellationToken) -> ActiveToken<'_> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.insert(id.to_string(), token);
        ActiveToken {
            active: &self.active,
            id: id.to_string(),
        }
    }

    /// Cancels the running `process` call for `id`, if any. The map lock is
    /// held across the cancel so it cannot interleave with unregistering.
    fn signal(&self, id: &str) -> bool {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        match active.get(id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    async fn load(&self, id: &str) -> Result<QuestionRecord> {
        self.store
            .load(id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))
    }

    async fn save(&self, record: &QuestionRecord) -> Result<()> {
        Ok(self.store.save(record).await?)
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("machine", &self.machine)
            .finish_non_exhaustive()
    }
}

/// One model call plus feature extraction, each bounded by `timeout`.
///
/// Extracted features are merged over any the invoker attached.
async fn call_model(
    invoker: &dyn ModelInvoker,
    extractor: &dyn FeatureExtractor,
    question: &str,
    model_id: &str,
    timeout: Duration,
) -> std::result::Result<ModelResponse, InvocationError> {
    let mut response = tokio::time::timeout(timeout, invoker.invoke(question, model_id, timeout))
        .await
        .map_err(|_| timeout_error(model_id, timeout))??;
    response.model_id = model_id.to_string();

    let features = tokio::time::timeout(timeout, extractor.extract(model_id, &response.text))
        .await
        .map_err(|_| timeout_error(model_id, timeout))??;
    response.features.extend(features);
    Ok(response)
}

fn timeout_error(model_id: &str, timeout: Duration) -> InvocationError {
    InvocationError::Timeout {
        model_id: model_id.to_string(),
        timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
    }
}

fn insufficient_responses(
    responded: usize,
    required: usize,
    failures: &[InvocationError],
) -> FailureReason {
    let kind = if !failures.is_empty() && failures.iter().all(InvocationError::is_timeout) {
        FailureKind::ModelTimeout
    } else if !failures.is_empty() && !failures.iter().any(InvocationError::is_timeout) {
        FailureKind::ModelInvocation
    } else {
        FailureKind::InsufficientResponses
    };
    let detail = failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    FailureReason::retryable(
        kind,
        format!("{} of {} required models responded: {}", responded, required, detail),
    )
}

fn synthesis_failure(e: SynthesisError) -> FailureReason {
    FailureReason::retryable(FailureKind::Synthesis, e.to_string())
}

fn completion_summary(report: &AnalysisReport) -> Result<concord_ledger::Payload> {
    let synthesis = report.final_synthesis();
    let summary = CompletionSummary {
        models: synthesis.model_ids.iter().map(String::as_str).collect(),
        excluded: &report.excluded,
        consensus_index: synthesis.consensus_index,
        synthesis_digest: synthesis.digest()?,
        synthesis,
        debate: report.debate.as_ref().map(|d| DebateSummary {
            initial_consensus: d.initial_consensus,
            rounds: d.rounds.len(),
            conclusion: d.reason(),
            vote: d.vote.as_ref(),
        }),
    };
    Ok(to_payload(&summary)?)
}
