//! Error types for synthesis and the consensus debate.

use crate::response::{Dimension, FeatureKind};
use thiserror::Error;

/// Result type alias for synthesis operations.
pub type Result<T> = std::result::Result<T, SynthesisError>;

/// Errors that can occur while synthesizing responses or running a debate.
#[derive(Debug, Error)]
pub enum SynthesisError {
    /// Synthesis was called with no responses.
    #[error("Insufficient input: at least one model response is required")]
    InsufficientInput,

    /// Two responses carry the same model id.
    #[error("Duplicate response from model '{0}'")]
    DuplicateModel(String),

    /// A feature's value kind does not match its configured dimension.
    #[error("Model '{model_id}' reported {dimension} as {found}, expected {expected}")]
    SchemaMismatch {
        /// Offending model.
        model_id: String,
        /// Offending dimension.
        dimension: Dimension,
        /// Kind declared in the configuration.
        expected: FeatureKind,
        /// Kind found in the response.
        found: FeatureKind,
    },

    /// A numeric feature is NaN or infinite.
    #[error("Model '{model_id}' reported a non-finite value for {dimension}")]
    NonFiniteScore {
        /// Offending model.
        model_id: String,
        /// Offending dimension.
        dimension: Dimension,
    },

    /// No configured dimension was reported by two or more models.
    #[error("No comparable dimensions across {models} responses")]
    NoComparableDimensions {
        /// Number of responses received.
        models: usize,
    },

    /// The configuration cannot produce a meaningful result.
    #[error("Invalid synthesis configuration: {0}")]
    InvalidConfig(String),

    /// Too few models answered in a debate round.
    #[error("Debate round {round}: only {responded} of {required} required participants responded")]
    InsufficientParticipants {
        /// Round that was aborted.
        round: u32,
        /// Models that produced a usable reply.
        responded: usize,
        /// Configured minimum.
        required: usize,
    },

    /// A round was requested on a debate that is not running.
    #[error("Debate is not active: {0}")]
    DebateNotActive(String),

    /// The result could not be serialized for hashing.
    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_mismatch_display() {
        let err = SynthesisError::SchemaMismatch {
            model_id: "gpt".to_string(),
            dimension: Dimension::Topics,
            expected: FeatureKind::Set,
            found: FeatureKind::Numeric,
        };
        let msg = err.to_string();
        assert!(msg.contains("gpt"));
        assert!(msg.contains("topics"));
    }

    #[test]
    fn test_non_finite_display() {
        let err = SynthesisError::NonFiniteScore {
            model_id: "llama".to_string(),
            dimension: Dimension::SentimentScore,
        };
        assert!(err.to_string().contains("llama"));
    }

    #[test]
    fn test_insufficient_participants_display() {
        let err = SynthesisError::InsufficientParticipants {
            round: 2,
            responded: 1,
            required: 2,
        };
        assert!(err.to_string().contains("round 2"));
    }
}
