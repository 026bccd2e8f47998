//! # Concord Core Integration Tests
//!
//! End-to-end runs of the orchestrator against in-process collaborator
//! fakes.
//!
//! ## Coverage
//!
//! | Scenario | Test |
//! |----------|------|
//! | Agreeing panel, full ledger trail | `test_agreeing_panel_is_verified` |
//! | Failed and slow models excluded | `test_partial_failures_are_excluded` |
//! | Too few answers, then retry | `test_insufficient_responses_then_retry` |
//! | Disagreement triggers a debate | `test_disagreement_triggers_debate` |
//! | Debate aborted by silent models | `test_silent_debaters_abort_debate` |
//! | Cancellation mid-flight | `test_cancel_running_process` |
//! | Cancellation after analysis | `test_cancel_after_analysis_is_rejected` |
//! | Concurrent questions, one ledger | `test_concurrent_questions_share_one_chain` |
//! | Durable ledger across restart | `test_durable_ledger_survives_restart` |

use async_trait::async_trait;
use concord_core::{
    CancelOutcome, ConcordConfig, DebatePrompt, EventType, FailureKind, FeatureExtractor,
    Features, InvocationError, LedgerConfig, LedgerError, LedgerStore, MemoryQuestionStore,
    ModelInvoker, ModelResponse, Orchestrator, OrchestratorError, PassthroughExtractor,
    PipelineError, PipelineState, ProcessOutcome, QuestionRecord, QuestionStore, StoreError,
};
use concord_synthesis::{ConclusionReason, FeatureValue};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

// =============================================================================
// FAKES
// =============================================================================

#[derive(Clone)]
enum Behavior {
    Answer(ModelResponse),
    Fail(&'static str),
    Hang,
}

/// Scripted model provider.
struct FakeInvoker {
    behaviors: Mutex<HashMap<String, Behavior>>,
    debate_replies: Mutex<HashMap<String, String>>,
    started: Notify,
    calls: AtomicUsize,
}

impl FakeInvoker {
    fn new() -> Self {
        Self {
            behaviors: Mutex::new(HashMap::new()),
            debate_replies: Mutex::new(HashMap::new()),
            started: Notify::new(),
            calls: AtomicUsize::new(0),
        }
    }

    fn with(self, model: &str, behavior: Behavior) -> Self {
        self.set(model, behavior);
        self
    }

    fn with_debate_reply(self, model: &str, reply: serde_json::Value) -> Self {
        self.debate_replies
            .lock()
            .unwrap()
            .insert(model.to_string(), reply.to_string());
        self
    }

    fn set(&self, model: &str, behavior: Behavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(model.to_string(), behavior);
    }
}

#[async_trait]
impl ModelInvoker for FakeInvoker {
    async fn invoke(
        &self,
        _question: &str,
        model_id: &str,
        _timeout: Duration,
    ) -> Result<ModelResponse, InvocationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self.behaviors.lock().unwrap().get(model_id).cloned();
        self.started.notify_one();
        match behavior {
            Some(Behavior::Answer(response)) => Ok(response),
            Some(Behavior::Fail(message)) => Err(InvocationError::failed(model_id, message)),
            Some(Behavior::Hang) | None => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(InvocationError::failed(model_id, "woke up"))
            }
        }
    }

    async fn deliberate(
        &self,
        prompt: &DebatePrompt,
        _timeout: Duration,
    ) -> Result<String, InvocationError> {
        let reply = self
            .debate_replies
            .lock()
            .unwrap()
            .get(&prompt.model_id)
            .cloned();
        reply.ok_or_else(|| InvocationError::failed(&prompt.model_id, "no debate reply"))
    }
}

/// Reads tone from the answer text.
struct KeywordExtractor;

#[async_trait]
impl FeatureExtractor for KeywordExtractor {
    async fn extract(&self, _model_id: &str, text: &str) -> Result<Features, InvocationError> {
        let mut features = Features::new();
        let sentiment = if text.contains("optimistic") { 0.8 } else { 0.2 };
        features.insert("sentiment_score".into(), FeatureValue::Score(sentiment));
        features.insert("topics".into(), FeatureValue::set(["energy"]));
        Ok(features)
    }
}

/// Pauses the save of a completed record until released.
struct PausingStore {
    inner: MemoryQuestionStore,
    paused: Notify,
    release: Notify,
}

impl PausingStore {
    fn new() -> Self {
        Self {
            inner: MemoryQuestionStore::new(),
            paused: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl QuestionStore for PausingStore {
    async fn load(&self, id: &str) -> Result<Option<QuestionRecord>, StoreError> {
        self.inner.load(id).await
    }

    async fn save(&self, record: &QuestionRecord) -> Result<(), StoreError> {
        if record.state == PipelineState::Completed {
            self.paused.notify_one();
            self.release.notified().await;
        }
        self.inner.save(record).await
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn config(models: &[&str], timeout_ms: u64) -> ConcordConfig {
    let mut config = ConcordConfig::default().with_models(models.iter().copied());
    config.models.call_timeout_ms = timeout_ms;
    config
}

fn answer(text: &str) -> Behavior {
    Behavior::Answer(ModelResponse::new("ignored", text))
}

fn scored(score: f64) -> Behavior {
    Behavior::Answer(ModelResponse::new("ignored", "...").with_score("sentiment_score", score))
}

fn orchestrator(
    config: ConcordConfig,
    invoker: FakeInvoker,
    extractor: Arc<dyn FeatureExtractor>,
) -> (Orchestrator, Arc<FakeInvoker>) {
    let invoker = Arc::new(invoker);
    let orchestrator = Orchestrator::new(
        config,
        Arc::new(LedgerStore::in_memory()),
        Arc::new(MemoryQuestionStore::new()),
        invoker.clone(),
        extractor,
    )
    .unwrap();
    (orchestrator, invoker)
}

fn event_types(o: &Orchestrator, refs: &[u64]) -> Vec<EventType> {
    refs.iter().map(|s| o.block(*s).unwrap().event_type).collect()
}

// =============================================================================
// HAPPY PATH
// =============================================================================

#[tokio::test]
async fn test_agreeing_panel_is_verified() {
    let invoker = FakeInvoker::new()
        .with("gpt", answer("optimistic about solar"))
        .with("claude", answer("cautiously optimistic"))
        .with("gemini", answer("optimistic overall"));
    let (o, invoker) = orchestrator(
        config(&["gpt", "claude", "gemini"], 1_000),
        invoker,
        Arc::new(KeywordExtractor),
    );

    o.submit("q-1", "Is solar power worth it?").await.unwrap();
    let outcome = o.process("q-1").await.unwrap();

    let ProcessOutcome::Verified { record, report } = outcome else {
        panic!("expected a verified question");
    };
    assert_eq!(record.state, PipelineState::LedgerVerified);
    assert_eq!(record.ledger_block_refs, vec![0, 1, 2, 3]);
    assert_eq!(
        event_types(&o, &record.ledger_block_refs),
        vec![
            EventType::DataCollection,
            EventType::PipelineStep,
            EventType::PipelineStep,
            EventType::Verification
        ]
    );
    assert_eq!(invoker.calls.load(Ordering::SeqCst), 3);

    assert!(report.debate.is_none());
    assert!(report.excluded.is_empty());
    assert_eq!(report.final_synthesis().consensus_index, 1.0);
    assert_eq!(
        report.final_synthesis().model_ids,
        vec!["claude", "gemini", "gpt"]
    );

    let completion = o.block(2).unwrap();
    let analysis = &completion.payload["analysis"];
    assert_eq!(
        analysis["synthesis_digest"],
        json!(report.final_synthesis().digest().unwrap())
    );
    assert_eq!(analysis["models"], json!(["claude", "gemini", "gpt"]));

    assert_eq!(o.record("q-1").await.unwrap(), record);
    assert!(o.verify_chain(0, None).unwrap().ok);
}

#[tokio::test]
async fn test_partial_failures_are_excluded() {
    let invoker = FakeInvoker::new()
        .with("a", answer("optimistic"))
        .with("b", answer("optimistic"))
        .with("c", Behavior::Fail("rate limited"))
        .with("d", Behavior::Hang);
    let (o, _) = orchestrator(
        config(&["a", "b", "c", "d"], 200),
        invoker,
        Arc::new(KeywordExtractor),
    );

    o.submit("q", "Will fusion arrive by 2050?").await.unwrap();
    let outcome = o.process("q").await.unwrap();

    let report = outcome.report().unwrap();
    let excluded: Vec<&str> = report.excluded.iter().map(|e| e.model_id.as_str()).collect();
    assert_eq!(excluded, vec!["c", "d"]);
    assert!(report.excluded[0].reason.contains("rate limited"));
    assert!(report.excluded[1].reason.contains("timed out after 200ms"));
    assert_eq!(report.final_synthesis().model_ids, vec!["a", "b"]);

    let completion = o.block(2).unwrap();
    assert_eq!(
        completion.payload["analysis"]["excluded"][1]["model_id"],
        json!("d")
    );
}

// =============================================================================
// FAILURE AND RETRY
// =============================================================================

#[tokio::test]
async fn test_insufficient_responses_then_retry() {
    let invoker = FakeInvoker::new()
        .with("a", scored(0.6))
        .with("b", Behavior::Hang);
    let (o, invoker) = orchestrator(config(&["a", "b"], 100), invoker, Arc::new(PassthroughExtractor));

    o.submit("q", "Should cities ban cars?").await.unwrap();
    let outcome = o.process("q").await.unwrap();

    let ProcessOutcome::Failed { record } = outcome else {
        panic!("expected a failed question");
    };
    assert_eq!(record.state, PipelineState::Error);
    let failure = record.last_error.as_ref().unwrap();
    assert_eq!(failure.reason.kind, FailureKind::ModelTimeout);
    assert!(failure.reason.retryable);
    assert_eq!(o.block(2).unwrap().event_type, EventType::Failure);

    invoker.set("b", scored(0.65));
    let record = o.retry("q").await.unwrap();
    assert_eq!(record.state, PipelineState::Processing);
    assert!(record.last_error.is_none());

    let outcome = o.process("q").await.unwrap();
    let record = outcome.record();
    assert_eq!(record.state, PipelineState::LedgerVerified);
    assert_eq!(record.retry_count, 1);
    // receive, start, fail, retry, complete, verify
    assert_eq!(record.ledger_block_refs, vec![0, 1, 2, 3, 4, 5]);
    assert_eq!(record.ledger_block_refs.len(), record.transition_count());
}

#[tokio::test]
async fn test_misuse_is_rejected() {
    let invoker = FakeInvoker::new()
        .with("a", answer("optimistic"))
        .with("b", answer("optimistic"));
    let (o, _) = orchestrator(config(&["a", "b"], 1_000), invoker, Arc::new(KeywordExtractor));

    o.submit("q", "Is tea better than coffee?").await.unwrap();
    assert!(matches!(
        o.submit("q", "again").await,
        Err(OrchestratorError::AlreadyExists(id)) if id == "q"
    ));
    assert!(matches!(
        o.submit("blank", "   ").await,
        Err(OrchestratorError::Pipeline(PipelineError::MalformedInput(_)))
    ));
    assert!(matches!(
        o.process("missing").await,
        Err(OrchestratorError::NotFound(_))
    ));

    // Only processing questions can be cancelled.
    assert!(matches!(
        o.cancel("q").await,
        Err(OrchestratorError::Pipeline(PipelineError::InvalidTransition { .. }))
    ));

    o.process("q").await.unwrap();
    assert!(matches!(
        o.process("q").await,
        Err(OrchestratorError::Pipeline(PipelineError::InvalidTransition { .. }))
    ));
    assert!(matches!(
        o.retry("q").await,
        Err(OrchestratorError::Pipeline(PipelineError::InvalidTransition { .. }))
    ));
    assert!(matches!(
        o.block(99),
        Err(OrchestratorError::Ledger(LedgerError::NotFound(99)))
    ));
}

// =============================================================================
// DEBATE
// =============================================================================

#[tokio::test]
async fn test_disagreement_triggers_debate() {
    let reply = json!({"stance": "balanced", "features": {"sentiment_score": 0.6}});
    let invoker = FakeInvoker::new()
        .with("a", scored(0.9))
        .with("b", scored(0.1))
        .with_debate_reply("a", reply.clone())
        .with_debate_reply("b", reply);
    let (o, _) = orchestrator(config(&["a", "b"], 1_000), invoker, Arc::new(PassthroughExtractor));

    o.submit("q", "Is remote work productive?").await.unwrap();
    let outcome = o.process("q").await.unwrap();

    let report = outcome.report().unwrap();
    assert!((report.initial_synthesis.consensus_index - 0.2).abs() < 1e-9);
    let debate = report.debate.as_ref().unwrap();
    assert_eq!(debate.reason(), Some(ConclusionReason::ConsensusReached));
    assert_eq!(debate.rounds.len(), 1);
    assert_eq!(report.final_synthesis().consensus_index, 1.0);

    let analysis = &o.block(2).unwrap().payload["analysis"];
    assert_eq!(analysis["debate"]["conclusion"], json!("consensus_reached"));
    assert_eq!(analysis["debate"]["rounds"], json!(1));
    assert_eq!(analysis["consensus_index"], json!(1.0));
}

#[tokio::test]
async fn test_silent_debaters_abort_debate() {
    let invoker = FakeInvoker::new()
        .with("a", scored(0.9))
        .with("b", scored(0.1))
        .with("c", scored(0.5))
        .with_debate_reply("a", json!({"stance": "same", "features": {"sentiment_score": 0.9}}));
    let (o, _) = orchestrator(
        config(&["a", "b", "c"], 1_000),
        invoker,
        Arc::new(PassthroughExtractor),
    );

    o.submit("q", "Is crypto a fad?").await.unwrap();
    let outcome = o.process("q").await.unwrap();

    assert_eq!(outcome.state(), PipelineState::LedgerVerified);
    let report = outcome.report().unwrap();
    let debate = report.debate.as_ref().unwrap();
    assert_eq!(debate.reason(), Some(ConclusionReason::Aborted));
    assert_eq!(debate.rounds[0].excluded.len(), 2);
    assert_eq!(report.final_synthesis(), &report.initial_synthesis);
}

// =============================================================================
// CANCELLATION
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_running_process() {
    let invoker = FakeInvoker::new()
        .with("a", Behavior::Hang)
        .with("b", Behavior::Hang);
    let (o, invoker) = orchestrator(config(&["a", "b"], 60_000), invoker, Arc::new(PassthroughExtractor));
    let o = Arc::new(o);

    o.submit("q", "Will it rain tomorrow?").await.unwrap();
    let running = {
        let o = Arc::clone(&o);
        tokio::spawn(async move { o.process("q").await })
    };

    invoker.started.notified().await;
    assert_eq!(o.cancel("q").await.unwrap(), CancelOutcome::Signalled);

    let outcome = running.await.unwrap().unwrap();
    let ProcessOutcome::Cancelled { record } = outcome else {
        panic!("expected a cancelled question");
    };
    assert_eq!(record.state, PipelineState::Error);
    let failure = record.last_error.as_ref().unwrap();
    assert_eq!(failure.reason.kind, FailureKind::Cancelled);
    assert!(!failure.reason.retryable);

    let last = *record.ledger_block_refs.last().unwrap();
    assert_eq!(o.block(last).unwrap().event_type, EventType::Cancellation);

    assert!(matches!(
        o.retry("q").await,
        Err(OrchestratorError::Pipeline(PipelineError::NonRetryable { .. }))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_after_analysis_is_rejected() {
    let invoker = FakeInvoker::new()
        .with("a", answer("optimistic"))
        .with("b", answer("optimistic"));
    let store = Arc::new(PausingStore::new());
    let o = Arc::new(
        Orchestrator::new(
            config(&["a", "b"], 1_000),
            Arc::new(LedgerStore::in_memory()),
            store.clone(),
            Arc::new(invoker),
            Arc::new(KeywordExtractor),
        )
        .unwrap(),
    );

    o.submit("q", "Is wind power reliable?").await.unwrap();
    let running = {
        let o = Arc::clone(&o);
        tokio::spawn(async move { o.process("q").await })
    };

    store.paused.notified().await;
    let cancelling = {
        let o = Arc::clone(&o);
        tokio::spawn(async move { o.cancel("q").await })
    };
    store.release.notify_one();

    let outcome = running.await.unwrap().unwrap();
    assert_eq!(outcome.state(), PipelineState::LedgerVerified);
    assert!(matches!(
        cancelling.await.unwrap(),
        Err(OrchestratorError::Pipeline(PipelineError::InvalidTransition { .. }))
    ));
    assert!(!event_types(&o, &outcome.record().ledger_block_refs).contains(&EventType::Cancellation));
}

#[tokio::test]
async fn test_cancel_idle_processing_question() {
    let invoker = FakeInvoker::new()
        .with("a", Behavior::Fail("down"))
        .with("b", Behavior::Fail("down"));
    let (o, _) = orchestrator(config(&["a", "b"], 1_000), invoker, Arc::new(PassthroughExtractor));

    o.submit("q", "Is the market overvalued?").await.unwrap();
    let failed = o.process("q").await.unwrap();
    assert_eq!(
        failed.record().last_error.as_ref().unwrap().reason.kind,
        FailureKind::ModelInvocation
    );
    o.retry("q").await.unwrap();

    let CancelOutcome::Recorded(record) = o.cancel("q").await.unwrap() else {
        panic!("nothing was running, the cancellation should be recorded directly");
    };
    assert_eq!(record.state, PipelineState::Error);
    assert_eq!(
        record.last_error.as_ref().unwrap().reason.kind,
        FailureKind::Cancelled
    );
}

// =============================================================================
// CONCURRENCY AND DURABILITY
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_questions_share_one_chain() {
    let invoker = FakeInvoker::new()
        .with("a", answer("optimistic"))
        .with("b", answer("optimistic"))
        .with("c", answer("optimistic"));
    let (o, _) = orchestrator(config(&["a", "b", "c"], 1_000), invoker, Arc::new(KeywordExtractor));
    let o = Arc::new(o);

    let mut handles = Vec::new();
    for i in 0..8 {
        let o = Arc::clone(&o);
        handles.push(tokio::spawn(async move {
            let id = format!("q-{}", i);
            o.submit(id.clone(), "Is the sky blue?").await.unwrap();
            o.process(&id).await.unwrap()
        }));
    }

    for handle in handles {
        let outcome = handle.await.unwrap();
        let refs = &outcome.record().ledger_block_refs;
        assert_eq!(outcome.state(), PipelineState::LedgerVerified);
        assert_eq!(refs.len(), 4);
        assert!(refs.windows(2).all(|w| w[0] < w[1]));
    }

    assert_eq!(o.ledger().len().unwrap(), 32);
    let report = o.verify_chain(0, None).unwrap();
    assert!(report.ok);
    assert_eq!(report.checked, 32);
}

#[tokio::test]
async fn test_durable_ledger_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(&["a", "b"], 1_000);
    config.ledger = LedgerConfig {
        db_path: Some(dir.path().join("ledger")),
        flush_on_append: true,
    };
    let ledger = Arc::new(config.ledger.open().unwrap());

    {
        let invoker = FakeInvoker::new()
            .with("a", answer("optimistic"))
            .with("b", answer("optimistic"));
        let o = Orchestrator::new(
            config,
            Arc::clone(&ledger),
            Arc::new(MemoryQuestionStore::new()),
            Arc::new(invoker),
            Arc::new(KeywordExtractor),
        )
        .unwrap();

        o.submit("q", "Do vaccines work?").await.unwrap();
        o.process("q").await.unwrap();
    }

    // Same sled handle: sled releases its directory lock lazily.
    let storage = ledger.storage().unwrap().clone();
    assert_eq!(storage.len(), 4);
    let reloaded = LedgerStore::with_storage(storage).unwrap();
    assert_eq!(reloaded.len().unwrap(), 4);
    assert_eq!(reloaded.tail().unwrap(), ledger.tail().unwrap());
    assert!(reloaded.verify_chain(0, None).unwrap().ok);
}
