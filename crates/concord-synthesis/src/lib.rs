//! # Concord Synthesis - Multi-Model Consensus
//!
//! Compares the answers several models gave to the same question and
//! reports where they agree, where they diverge and where they flatly
//! contradict each other. When agreement is poor an optional debate lets the
//! models see each other's positions and revise their own.
//!
//! ## Features
//!
//! Responses are compared through extracted **features**, never through raw
//! text. A feature is either a score (sentiment, bias, confidence) or a set of
//! labels (topics, claims). Each configured dimension declares which kind it
//! expects; a response carrying the other kind is rejected.
//!
//! ## Measures
//!
//! | Measure | Numeric dimension | Set dimension |
//! |---------|-------------------|---------------|
//! | Agreement | `1 - mean pairwise deviation / max_range` | shared labels over all labels |
//! | Contradiction | a pair further apart than the tolerance | two disjoint non-empty sets |
//! | Alignment | near the median | subset or superset of the majority labels |
//!
//! The consensus index is the weighted mean of dimension agreements. A
//! dimension below `divergence_threshold` becomes a divergence point.
//!
//! ## Architecture
//!
//! ```text
//!   ModelResponse × N
//!          │
//!          ▼
//!   ┌──────────────────┐  low consensus or   ┌─────────────────────┐
//!   │ SynthesisEngine  │ ──contradictions──▶ │  DebateCoordinator  │
//!   │  (pure, sync)    │ ◀──re-synthesize─── │  prompts / replies  │
//!   └──────────────────┘                     └─────────────────────┘
//!          │                                            │
//!          ▼                                            ▼
//!   SynthesisResult                           VoteTally over disputed
//!                                             dimensions
//! ```
//!
//! ## References
//!
//! - Jaccard, P. (1912). "The distribution of the flora in the alpine zone".
//!   New Phytologist 11(2).
//! - Du, Y. et al. (2023). "Improving Factuality and Reasoning in Language
//!   Models through Multiagent Debate". arXiv:2305.14325
//!
//! ## Usage
//!
//! ```rust
//! use concord_synthesis::{ModelResponse, SynthesisEngine};
//!
//! let engine = SynthesisEngine::default();
//! let result = engine.synthesize(&[
//!     ModelResponse::new("gpt", "...").with_score("sentiment_score", 0.7),
//!     ModelResponse::new("claude", "...").with_score("sentiment_score", 0.6),
//! ])?;
//! assert!(result.consensus_index > 0.8);
//! # Ok::<(), concord_synthesis::SynthesisError>(())
//! ```

pub mod config;
pub mod debate;
pub mod engine;
pub mod error;
pub mod response;
pub mod vote;

pub use config::{DimensionConfig, SynthesisConfig};
pub use debate::{
    ConclusionReason, DebateConfig, DebateCoordinator, DebateOutcome, DebatePhase, DebatePrompt,
    DebateSession, Exclusion, ParticipantReply, Position, RoundRecord,
};
pub use engine::{
    Contradiction, DimensionAgreement, DivergencePoint, SynthesisEngine, SynthesisResult,
};
pub use error::{Result, SynthesisError};
pub use response::{Dimension, FeatureKind, FeatureValue, Features, ModelResponse};
pub use vote::{DimensionTally, VoteMode, VoteOutcome, VoteTally};
