//! Contracts for the collaborators the orchestrator drives.
//!
//! The orchestrator owns no database, calls no model provider and computes
//! no NLP features. Each of those is injected behind one of the traits
//! below, so the core runs unchanged against production services or
//! in-process fakes.
//!
//! | Collaborator | Trait | Contract |
//! |--------------|-------|----------|
//! | Persistence | [`QuestionStore`] | `load(id)` / `save(record)` |
//! | Model provider | [`ModelInvoker`] | answer a question, answer a debate prompt |
//! | NLP pipeline | [`FeatureExtractor`] | raw text → feature map |

use crate::error::{InvocationError, StoreError};
use async_trait::async_trait;
use concord_pipeline::QuestionRecord;
use concord_synthesis::{DebatePrompt, Features, ModelResponse};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

/// Persistence for question records.
#[async_trait]
pub trait QuestionStore: Send + Sync {
    /// Loads a record, or `None` if the id is unknown.
    async fn load(&self, id: &str) -> Result<Option<QuestionRecord>, StoreError>;

    /// Writes a record back, replacing any previous version.
    async fn save(&self, record: &QuestionRecord) -> Result<(), StoreError>;
}

/// Calls a model provider.
///
/// The orchestrator enforces `timeout` itself; it is passed along so the
/// implementation can size its own transport deadline.
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    /// Asks `model_id` the question.
    async fn invoke(
        &self,
        question: &str,
        model_id: &str,
        timeout: Duration,
    ) -> Result<ModelResponse, InvocationError>;

    /// Delivers a debate prompt to its addressee and returns the raw reply.
    async fn deliberate(
        &self,
        prompt: &DebatePrompt,
        timeout: Duration,
    ) -> Result<String, InvocationError>;
}

/// Derives comparable features from a response's raw text.
#[async_trait]
pub trait FeatureExtractor: Send + Sync {
    /// Extracts features for one model's answer.
    async fn extract(&self, model_id: &str, text: &str) -> Result<Features, InvocationError>;
}

/// Uses the features the model invoker already attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughExtractor;

#[async_trait]
impl FeatureExtractor for PassthroughExtractor {
    async fn extract(&self, _model_id: &str, _text: &str) -> Result<Features, InvocationError> {
        Ok(Features::new())
    }
}

/// In-memory [`QuestionStore`].
#[derive(Debug, Default)]
pub struct MemoryQuestionStore {
    records: RwLock<HashMap<String, QuestionRecord>>,
}

impl MemoryQuestionStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// True if nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl QuestionStore for MemoryQuestionStore {
    async fn load(&self, id: &str) -> Result<Option<QuestionRecord>, StoreError> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn save(&self, record: &QuestionRecord) -> Result<(), StoreError> {
        self.records
            .write()
            .await
            .insert(record.id.clone(), record.clone());
        Ok(())
    }
}
