//! Model responses and their typed feature maps.
//!
//! Features are keyed by [`Dimension`], a closed set of known indicators
//! with an explicit [`Dimension::Other`] fallback, and carry a
//! [`FeatureValue`] that is either a numeric score or a set of labels.
//! Each known dimension declares the kind it must carry, so a feature
//! extractor that starts emitting `topics` as a number is caught during
//! synthesis instead of being silently averaged.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Shape of a feature value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    /// A real-valued score.
    Numeric,
    /// A set of string labels.
    Set,
}

impl fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureKind::Numeric => f.write_str("numeric"),
            FeatureKind::Set => f.write_str("set"),
        }
    }
}

/// Named indicator extracted from a response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Dimension {
    /// Sentiment polarity.
    SentimentScore,
    /// Political or ideological lean.
    BiasScore,
    /// Self-reported confidence.
    Confidence,
    /// Toxicity probability.
    ToxicityScore,
    /// Topics covered.
    Topics,
    /// Factual claims made.
    Claims,
    /// Any dimension without a built-in definition.
    Other(String),
}

impl Dimension {
    /// Wire name.
    pub fn as_str(&self) -> &str {
        match self {
            Dimension::SentimentScore => "sentiment_score",
            Dimension::BiasScore => "bias_score",
            Dimension::Confidence => "confidence",
            Dimension::ToxicityScore => "toxicity_score",
            Dimension::Topics => "topics",
            Dimension::Claims => "claims",
            Dimension::Other(name) => name,
        }
    }

    /// The kind a known dimension must carry. `None` for [`Dimension::Other`].
    pub fn expected_kind(&self) -> Option<FeatureKind> {
        match self {
            Dimension::SentimentScore
            | Dimension::BiasScore
            | Dimension::Confidence
            | Dimension::ToxicityScore => Some(FeatureKind::Numeric),
            Dimension::Topics | Dimension::Claims => Some(FeatureKind::Set),
            Dimension::Other(_) => None,
        }
    }
}

impl From<String> for Dimension {
    fn from(name: String) -> Self {
        match name.as_str() {
            "sentiment_score" => Dimension::SentimentScore,
            "bias_score" => Dimension::BiasScore,
            "confidence" => Dimension::Confidence,
            "toxicity_score" => Dimension::ToxicityScore,
            "topics" => Dimension::Topics,
            "claims" => Dimension::Claims,
            _ => Dimension::Other(name),
        }
    }
}

impl From<&str> for Dimension {
    fn from(name: &str) -> Self {
        Dimension::from(name.to_string())
    }
}

impl From<Dimension> for String {
    fn from(dimension: Dimension) -> Self {
        match dimension {
            Dimension::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value of one feature.
///
/// Deserializes from a JSON number or a JSON array of strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    /// A numeric score.
    Score(f64),
    /// A set of labels.
    Set(BTreeSet<String>),
}

impl FeatureValue {
    /// Builds a set value from any iterator of labels.
    pub fn set<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FeatureValue::Set(labels.into_iter().map(Into::into).collect())
    }

    /// Kind of this value.
    pub fn kind(&self) -> FeatureKind {
        match self {
            FeatureValue::Score(_) => FeatureKind::Numeric,
            FeatureValue::Set(_) => FeatureKind::Set,
        }
    }

    /// The score, if numeric.
    pub fn as_score(&self) -> Option<f64> {
        match self {
            FeatureValue::Score(v) => Some(*v),
            FeatureValue::Set(_) => None,
        }
    }

    /// The labels, if a set.
    pub fn as_set(&self) -> Option<&BTreeSet<String>> {
        match self {
            FeatureValue::Set(s) => Some(s),
            FeatureValue::Score(_) => None,
        }
    }
}

/// Feature map of one response.
pub type Features = BTreeMap<Dimension, FeatureValue>;

/// One model's answer to a question. Immutable once built.
///
/// # Example
///
/// ```rust
/// use concord_synthesis::{Dimension, ModelResponse};
///
/// let response = ModelResponse::new("model-a", "Probably yes, with caveats.")
///     .with_score(Dimension::SentimentScore, 0.72)
///     .with_set(Dimension::Topics, ["energy", "safety"]);
///
/// assert_eq!(response.score(&Dimension::SentimentScore), Some(0.72));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    /// Contributing model.
    pub model_id: String,
    /// Raw answer text. Only the derived features are compared.
    pub text: String,
    /// Extracted indicators.
    #[serde(default)]
    pub features: Features,
    /// Short summary of the model's position, when one was stated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stance: Option<String>,
}

impl ModelResponse {
    /// Creates a response with no features.
    pub fn new(model_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            text: text.into(),
            features: Features::new(),
            stance: None,
        }
    }

    /// Adds a numeric feature.
    #[must_use]
    pub fn with_score(mut self, dimension: impl Into<Dimension>, value: f64) -> Self {
        self.features.insert(dimension.into(), FeatureValue::Score(value));
        self
    }

    /// Adds a set feature.
    #[must_use]
    pub fn with_set<I, S>(mut self, dimension: impl Into<Dimension>, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.features.insert(dimension.into(), FeatureValue::set(labels));
        self
    }

    /// Replaces the feature map.
    #[must_use]
    pub fn with_features(mut self, features: Features) -> Self {
        self.features = features;
        self
    }

    /// Sets the stated position.
    #[must_use]
    pub fn with_stance(mut self, stance: impl Into<String>) -> Self {
        self.stance = Some(stance.into());
        self
    }

    /// Numeric feature lookup.
    pub fn score(&self, dimension: &Dimension) -> Option<f64> {
        self.features.get(dimension).and_then(FeatureValue::as_score)
    }
}
