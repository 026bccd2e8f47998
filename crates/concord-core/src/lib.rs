//! # Concord Core
//!
//! Orchestration facade for Concord. Wires the Transparency Ledger, the
//! Pipeline State Machine and the Synthesis Engine together behind one
//! async API, with model providers, persistence and feature extraction
//! injected as collaborators.
//!
//! ## Guarantees
//!
//! | Concern | Component | Guarantee |
//! |---------|-----------|-----------|
//! | Provenance | Ledger | Every transition is a hash-chained block |
//! | Lifecycle | Pipeline | Invalid transitions are rejected, never applied |
//! | Agreement | Synthesis | Same responses and config give the same result |
//! | Liveness | Orchestrator | Every model call is bounded by a timeout |
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        CONCORD CORE                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │   QuestionStore ◀──┐   ┌──────────────┐   ┌──▶ ModelInvoker     │
//! │                    └── │ Orchestrator │ ──┤                     │
//! │                        └──────┬───────┘   └──▶ FeatureExtractor │
//! │                               │                                 │
//! │         ┌─────────────────────┼─────────────────────┐           │
//! │         ▼                     ▼                     ▼           │
//! │  ┌─────────────┐     ┌────────────────┐    ┌────────────────┐   │
//! │  │  Pipeline   │ ──▶ │  Transparency  │    │   Synthesis    │   │
//! │  │   State     │     │     Ledger     │    │  + Debate      │   │
//! │  │  Machine    │     └────────────────┘    └────────────────┘   │
//! │  └─────────────┘                                                │
//! │                                                                 │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use concord_core::{ConcordConfig, MemoryQuestionStore, Orchestrator, PassthroughExtractor};
//! use std::sync::Arc;
//!
//! let config = ConcordConfig::from_file("config/concord.json")?;
//! let ledger = Arc::new(config.ledger.open()?);
//! let orchestrator = Orchestrator::new(
//!     config,
//!     ledger,
//!     Arc::new(MemoryQuestionStore::new()),
//!     Arc::new(my_provider_client),
//!     Arc::new(PassthroughExtractor),
//! )?;
//!
//! orchestrator.submit("q-1", "Is nuclear power safe?").await?;
//! let outcome = orchestrator.process("q-1").await?;
//! ```
//!
//! ## Error Policy
//!
//! - Collaborator failures (timeouts, provider errors, unusable answers)
//!   become a ledgered `fail()` with a retryable reason
//! - Misuse (invalid transitions, malformed input) is returned to the caller
//! - A broken ledger chain is returned as an error and logged at `error`
//!   level; nothing is repaired automatically

mod collaborators;
mod config;
mod error;
mod orchestrator;
mod outcome;

pub use collaborators::{
    FeatureExtractor, MemoryQuestionStore, ModelInvoker, PassthroughExtractor, QuestionStore,
};
pub use config::{ConcordConfig, LedgerConfig, ModelsConfig};
pub use error::{InvocationError, OrchestratorError, StoreError};
pub use orchestrator::Orchestrator;
pub use outcome::{AnalysisReport, CancelOutcome, ProcessOutcome};

// Re-export component types for convenience
pub use concord_ledger::{
    BreakKind, EventType, LedgerBlock, LedgerError, LedgerStore, VerificationReport,
};
pub use concord_pipeline::{
    FailureKind, FailureReason, PipelineConfig, PipelineError, PipelineState, QuestionRecord,
};
pub use concord_synthesis::{
    DebateConfig, DebateOutcome, DebatePrompt, Features, ModelResponse, SynthesisConfig,
    SynthesisResult,
};

/// Core result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;
