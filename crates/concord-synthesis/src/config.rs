//! Synthesis configuration: which dimensions are compared, how they are
//! weighted, and the thresholds that classify disagreement.

use crate::error::{Result, SynthesisError};
use crate::response::{Dimension, FeatureKind};
use serde::{Deserialize, Serialize};

/// How one dimension is compared across models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionConfig {
    /// Feature key.
    pub dimension: Dimension,
    /// Human-readable topic label used in divergence points.
    pub label: String,
    /// Weight in the consensus index.
    pub weight: f64,
    /// Declared value kind.
    pub kind: FeatureKind,
    /// Lower bound of the expected range (numeric only).
    #[serde(default)]
    pub range_min: f64,
    /// Width of the expected range (numeric only). Normalizes deviations.
    #[serde(default = "default_max_range")]
    pub max_range: f64,
    /// Overrides `contradiction_tolerance` for this dimension.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<f64>,
}

fn default_max_range() -> f64 {
    1.0
}

impl DimensionConfig {
    /// A numeric dimension on `[0, 1]` with weight 1.
    pub fn numeric(dimension: impl Into<Dimension>, label: impl Into<String>) -> Self {
        Self {
            dimension: dimension.into(),
            label: label.into(),
            weight: 1.0,
            kind: FeatureKind::Numeric,
            range_min: 0.0,
            max_range: 1.0,
            tolerance: None,
        }
    }

    /// A set dimension with weight 1.
    pub fn categorical(dimension: impl Into<Dimension>, label: impl Into<String>) -> Self {
        Self {
            kind: FeatureKind::Set,
            ..Self::numeric(dimension, label)
        }
    }

    /// Sets the weight.
    #[must_use]
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Sets the expected range as `[min, min + width]`.
    #[must_use]
    pub fn with_range(mut self, min: f64, width: f64) -> Self {
        self.range_min = min;
        self.max_range = width;
        self
    }

    /// Sets a per-dimension contradiction tolerance.
    #[must_use]
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = Some(tolerance);
        self
    }
}

/// Configuration for [`SynthesisEngine`](crate::SynthesisEngine).
///
/// # Example
///
/// ```rust
/// use concord_synthesis::{DimensionConfig, SynthesisConfig};
///
/// let config = SynthesisConfig::empty()
///     .with_dimension(DimensionConfig::numeric("sentiment_score", "Sentiment"))
///     .with_dimension(DimensionConfig::categorical("topics", "Topics").with_weight(2.0))
///     .with_divergence_threshold(0.5);
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    /// Compared dimensions, in reporting order.
    pub dimensions: Vec<DimensionConfig>,
    /// Agreement below this marks a divergence point.
    pub divergence_threshold: f64,
    /// Numeric values further apart than this contradict.
    pub contradiction_tolerance: f64,
    /// Distance from the median, as a fraction of `max_range`, that still
    /// counts as aligned.
    pub alignment_tolerance: f64,
}

impl Default for SynthesisConfig {
    /// Defaults:
    /// - `sentiment_score` on `[0, 1]`
    /// - `bias_score` on `[-3, 3]`, contradiction tolerance 1.5
    /// - `confidence` on `[0, 1]`
    /// - `topics` and `claims` as sets
    /// - divergence threshold 0.6, contradiction tolerance 0.5, alignment tolerance 0.15
    fn default() -> Self {
        Self {
            dimensions: vec![
                DimensionConfig::numeric(Dimension::SentimentScore, "Sentiment"),
                DimensionConfig::numeric(Dimension::BiasScore, "Bias")
                    .with_range(-3.0, 6.0)
                    .with_tolerance(1.5),
                DimensionConfig::numeric(Dimension::Confidence, "Confidence"),
                DimensionConfig::categorical(Dimension::Topics, "Topics"),
                DimensionConfig::categorical(Dimension::Claims, "Claims"),
            ],
            divergence_threshold: 0.6,
            contradiction_tolerance: 0.5,
            alignment_tolerance: 0.15,
        }
    }
}

impl SynthesisConfig {
    /// A config with no dimensions and default thresholds.
    pub fn empty() -> Self {
        Self {
            dimensions: Vec::new(),
            ..Self::default()
        }
    }

    /// Appends a dimension.
    #[must_use]
    pub fn with_dimension(mut self, dimension: DimensionConfig) -> Self {
        self.dimensions.push(dimension);
        self
    }

    /// Sets the divergence threshold.
    #[must_use]
    pub fn with_divergence_threshold(mut self, threshold: f64) -> Self {
        self.divergence_threshold = threshold;
        self
    }

    /// Sets the default contradiction tolerance.
    #[must_use]
    pub fn with_contradiction_tolerance(mut self, tolerance: f64) -> Self {
        self.contradiction_tolerance = tolerance;
        self
    }

    /// Sets the alignment tolerance.
    #[must_use]
    pub fn with_alignment_tolerance(mut self, tolerance: f64) -> Self {
        self.alignment_tolerance = tolerance;
        self
    }

    /// Looks up a dimension's configuration.
    pub fn dimension(&self, dimension: &Dimension) -> Option<&DimensionConfig> {
        self.dimensions.iter().find(|d| &d.dimension == dimension)
    }

    /// Contradiction tolerance for one dimension.
    pub fn tolerance_for(&self, dimension: &DimensionConfig) -> f64 {
        dimension.tolerance.unwrap_or(self.contradiction_tolerance)
    }

    /// Rejects configurations that cannot produce a meaningful result.
    ///
    /// # Errors
    ///
    /// Returns [`SynthesisError::InvalidConfig`] describing the first problem.
    pub fn validate(&self) -> Result<()> {
        if self.dimensions.is_empty() {
            return Err(invalid("no dimensions configured"));
        }
        unit_interval("divergence_threshold", self.divergence_threshold)?;
        unit_interval("alignment_tolerance", self.alignment_tolerance)?;
        non_negative("contradiction_tolerance", self.contradiction_tolerance)?;

        let mut total_weight = 0.0;
        for (i, d) in self.dimensions.iter().enumerate() {
            if self.dimensions[..i].iter().any(|p| p.dimension == d.dimension) {
                return Err(invalid(format!("dimension {} listed twice", d.dimension)));
            }
            if !d.weight.is_finite() || d.weight < 0.0 {
                return Err(invalid(format!("dimension {} has negative weight", d.dimension)));
            }
            if let Some(expected) = d.dimension.expected_kind() {
                if expected != d.kind {
                    return Err(invalid(format!(
                        "dimension {} must be {}, configured as {}",
                        d.dimension, expected, d.kind
                    )));
                }
            }
            if d.kind == FeatureKind::Numeric {
                if !d.max_range.is_finite() || d.max_range <= 0.0 {
                    return Err(invalid(format!(
                        "dimension {} needs a positive max_range",
                        d.dimension
                    )));
                }
                if !d.range_min.is_finite() {
                    return Err(invalid(format!("dimension {} has no finite range_min", d.dimension)));
                }
            }
            if let Some(t) = d.tolerance {
                non_negative(d.dimension.as_str(), t)?;
            }
            total_weight += d.weight;
        }

        if total_weight <= 0.0 {
            return Err(invalid("dimension weights sum to zero"));
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> SynthesisError {
    SynthesisError::InvalidConfig(msg.into())
}

fn unit_interval(name: &str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(invalid(format!("{} must lie in [0, 1], got {}", name, value)))
    }
}

fn non_negative(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(invalid(format!("{} must be a non-negative number, got {}", name, value)))
    }
}
