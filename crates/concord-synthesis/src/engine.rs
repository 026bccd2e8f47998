//! # Synthesis Engine
//!
//! Turns a set of model responses into one [`SynthesisResult`]:
//! per-dimension agreement, a weighted consensus index, divergence points,
//! contradictions and per-model alignment.
//!
//! ## Agreement Measures
//!
//! | Kind | Agreement |
//! |------|-----------|
//! | Numeric | `1 - mean(|a - b| over unordered pairs) / max_range`, clamped to `[0, 1]` |
//! | Set | `|∩| / |∪|` across all participating models (1.0 when the union is empty) |
//!
//! `consensus_index` is the weighted mean of the agreements of every
//! dimension that at least two models reported.
//!
//! ## Determinism
//!
//! Responses are ordered by `model_id` and every map in the result is a
//! `BTreeMap`, so the same inputs and configuration always serialize to the
//! same bytes. [`SynthesisResult::digest`] hashes those bytes for audit
//! entries.
//!
//! ## Example
//!
//! ```rust
//! use concord_synthesis::{DimensionConfig, ModelResponse, SynthesisConfig, SynthesisEngine};
//!
//! let engine = SynthesisEngine::new(
//!     SynthesisConfig::empty()
//!         .with_dimension(DimensionConfig::numeric("sentiment_score", "Sentiment")),
//! );
//!
//! let result = engine.synthesize(&[
//!     ModelResponse::new("a", "...").with_score("sentiment_score", 0.7),
//!     ModelResponse::new("b", "...").with_score("sentiment_score", 0.75),
//!     ModelResponse::new("c", "...").with_score("sentiment_score", 0.2),
//! ])?;
//!
//! assert!((result.consensus_index - (1.0 - 1.1 / 3.0)).abs() < 1e-9);
//! assert!(result.divergence_points.is_empty());
//! # Ok::<(), concord_synthesis::SynthesisError>(())
//! ```

use crate::config::{DimensionConfig, SynthesisConfig};
use crate::error::{Result, SynthesisError};
use crate::response::{Dimension, FeatureKind, FeatureValue, ModelResponse};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Agreement measured on one dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionAgreement {
    /// Compared dimension.
    pub dimension: Dimension,
    /// Configured label.
    pub label: String,
    /// Agreement in `[0, 1]`.
    pub agreement_fraction: f64,
    /// Number of models that reported this dimension.
    pub participants: usize,
}

/// A dimension whose agreement fell below the divergence threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DivergencePoint {
    /// Configured topic label.
    pub topic: String,
    /// Dimension key.
    pub dimension: Dimension,
    /// Agreement in `[0, 1]`.
    pub agreement_fraction: f64,
}

/// Mutually incompatible values on one dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contradiction {
    /// Dimension on which the models conflict.
    pub dimension: Dimension,
    /// Every model that belongs to at least one conflicting pair, sorted.
    pub conflicting_model_ids: Vec<String>,
    /// Values of the conflicting models.
    pub values: BTreeMap<String, FeatureValue>,
}

/// Outcome of one synthesis pass.
///
/// Derived data: recompute it from the same responses rather than mutating it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisResult {
    /// Weighted agreement across compared dimensions, in `[0, 1]`.
    pub consensus_index: f64,
    /// Agreement per compared dimension, in configuration order.
    pub dimensions: Vec<DimensionAgreement>,
    /// Dimensions below the divergence threshold, least agreement first.
    pub divergence_points: Vec<DivergencePoint>,
    /// One entry per dimension with conflicting values.
    pub contradictions: Vec<Contradiction>,
    /// Fraction of participated dimensions where each model sided with the majority.
    pub per_model_alignment: BTreeMap<String, f64>,
    /// Configured dimensions reported by fewer than two models.
    pub skipped_dimensions: Vec<Dimension>,
    /// Contributing models, sorted.
    pub model_ids: Vec<String>,
}

impl SynthesisResult {
    /// SHA-256 of the result's JSON with sorted keys, hex encoded.
    ///
    /// Two results with the same digest were computed from the same inputs
    /// under the same configuration.
    pub fn digest(&self) -> Result<String> {
        let value = serde_json::to_value(self)?;
        let bytes = serde_json::to_vec(&value)?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }

    /// Dimensions named by divergence points or contradictions, deduplicated,
    /// in first-seen order.
    pub fn disputed_dimensions(&self) -> Vec<Dimension> {
        let mut out: Vec<Dimension> = Vec::new();
        let candidates = self
            .divergence_points
            .iter()
            .map(|d| &d.dimension)
            .chain(self.contradictions.iter().map(|c| &c.dimension));
        for dimension in candidates {
            if !out.contains(dimension) {
                out.push(dimension.clone());
            }
        }
        out
    }
}

/// Stateless synthesizer over a fixed configuration.
#[derive(Debug, Clone, Default)]
pub struct SynthesisEngine {
    config: SynthesisConfig,
}

impl SynthesisEngine {
    /// Creates an engine. Call [`SynthesisConfig::validate`] first for
    /// externally supplied configurations.
    pub fn new(config: SynthesisConfig) -> Self {
        Self { config }
    }

    /// Active configuration.
    pub fn config(&self) -> &SynthesisConfig {
        &self.config
    }

    /// Checks that every configured feature of `response` has the declared
    /// kind and that no score is NaN or infinite.
    ///
    /// The kind of unconfigured dimensions is not checked.
    pub fn check_schema(&self, response: &ModelResponse) -> Result<()> {
        for (dimension, value) in &response.features {
            if matches!(value, FeatureValue::Score(v) if !v.is_finite()) {
                return Err(SynthesisError::NonFiniteScore {
                    model_id: response.model_id.clone(),
                    dimension: dimension.clone(),
                });
            }
            if let Some(dc) = self.config.dimension(dimension) {
                if value.kind() != dc.kind {
                    return Err(SynthesisError::SchemaMismatch {
                        model_id: response.model_id.clone(),
                        dimension: dimension.clone(),
                        expected: dc.kind,
                        found: value.kind(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Synthesizes the responses into one result.
    ///
    /// # Errors
    ///
    /// - [`SynthesisError::InsufficientInput`] for an empty slice
    /// - [`SynthesisError::DuplicateModel`] if a model answered twice
    /// - [`SynthesisError::SchemaMismatch`] for a feature of the wrong kind
    /// - [`SynthesisError::NonFiniteScore`] for a NaN or infinite score
    /// - [`SynthesisError::NoComparableDimensions`] if, with two or more
    ///   models, no dimension was reported by at least two of them
    pub fn synthesize(&self, responses: &[ModelResponse]) -> Result<SynthesisResult> {
        if responses.is_empty() {
            return Err(SynthesisError::InsufficientInput);
        }

        let mut ordered: Vec<&ModelResponse> = responses.iter().collect();
        ordered.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        for pair in ordered.windows(2) {
            if pair[0].model_id == pair[1].model_id {
                return Err(SynthesisError::DuplicateModel(pair[0].model_id.clone()));
            }
        }
        for response in &ordered {
            self.check_schema(response)?;
        }

        let model_ids: Vec<String> = ordered.iter().map(|r| r.model_id.clone()).collect();

        if ordered.len() == 1 {
            return Ok(SynthesisResult {
                consensus_index: 1.0,
                dimensions: Vec::new(),
                divergence_points: Vec::new(),
                contradictions: Vec::new(),
                per_model_alignment: model_ids.iter().map(|id| (id.clone(), 1.0)).collect(),
                skipped_dimensions: Vec::new(),
                model_ids,
            });
        }

        let mut dimensions = Vec::new();
        let mut weights = Vec::new();
        let mut contradictions = Vec::new();
        let mut skipped_dimensions = Vec::new();
        let mut aligned: BTreeMap<&str, (u32, u32)> = BTreeMap::new();

        for dc in &self.config.dimensions {
            let values: Vec<(&str, &FeatureValue)> = ordered
                .iter()
                .filter_map(|r| r.features.get(&dc.dimension).map(|v| (r.model_id.as_str(), v)))
                .collect();

            if values.len() < 2 {
                skipped_dimensions.push(dc.dimension.clone());
                continue;
            }

            let (agreement, contradiction, alignment) = match dc.kind {
                FeatureKind::Numeric => self.compare_numeric(dc, &values),
                FeatureKind::Set => compare_sets(dc, &values),
            };

            for (model, ok) in alignment {
                let entry = aligned.entry(model).or_insert((0, 0));
                entry.1 += 1;
                if ok {
                    entry.0 += 1;
                }
            }
            contradictions.extend(contradiction);
            weights.push(dc.weight);
            dimensions.push(DimensionAgreement {
                dimension: dc.dimension.clone(),
                label: dc.label.clone(),
                agreement_fraction: agreement,
                participants: values.len(),
            });
        }

        if dimensions.is_empty() {
            return Err(SynthesisError::NoComparableDimensions {
                models: ordered.len(),
            });
        }

        let consensus_index = weighted_mean(&dimensions, &weights);

        let mut divergence_points: Vec<DivergencePoint> = dimensions
            .iter()
            .filter(|d| d.agreement_fraction < self.config.divergence_threshold)
            .map(|d| DivergencePoint {
                topic: d.label.clone(),
                dimension: d.dimension.clone(),
                agreement_fraction: d.agreement_fraction,
            })
            .collect();
        divergence_points.sort_by(|a, b| a.agreement_fraction.total_cmp(&b.agreement_fraction));

        let per_model_alignment = model_ids
            .iter()
            .map(|id| {
                let score = match aligned.get(id.as_str()) {
                    Some(&(ok, total)) if total > 0 => f64::from(ok) / f64::from(total),
                    _ => 0.0,
                };
                (id.clone(), score)
            })
            .collect();

        debug!(
            models = model_ids.len(),
            compared = dimensions.len(),
            consensus_index,
            divergences = divergence_points.len(),
            contradictions = contradictions.len(),
            "Synthesis complete"
        );

        Ok(SynthesisResult {
            consensus_index,
            dimensions,
            divergence_points,
            contradictions,
            per_model_alignment,
            skipped_dimensions,
            model_ids,
        })
    }

    fn compare_numeric<'a>(
        &self,
        dc: &DimensionConfig,
        values: &[(&'a str, &FeatureValue)],
    ) -> (f64, Option<Contradiction>, Vec<(&'a str, bool)>) {
        let scores: Vec<(&'a str, f64)> = values
            .iter()
            .filter_map(|(id, v)| v.as_score().map(|s| (*id, s)))
            .collect();

        let mut deviation_sum = 0.0;
        let mut pairs = 0u32;
        let tolerance = self.config.tolerance_for(dc);
        let mut conflicting: BTreeSet<&str> = BTreeSet::new();
        for (i, (id_a, a)) in scores.iter().enumerate() {
            for (id_b, b) in &scores[i + 1..] {
                let diff = (a - b).abs();
                deviation_sum += diff;
                pairs += 1;
                if diff > tolerance {
                    conflicting.insert(*id_a);
                    conflicting.insert(*id_b);
                }
            }
        }
        let mean_deviation = if pairs == 0 {
            0.0
        } else {
            deviation_sum / f64::from(pairs)
        };
        let agreement = (1.0 - mean_deviation / dc.max_range).clamp(0.0, 1.0);

        let contradiction = contradiction_from(dc, values, &conflicting);

        let median = median(scores.iter().map(|(_, s)| *s).collect());
        let band = self.config.alignment_tolerance * dc.max_range;
        let alignment = scores
            .iter()
            .map(|(id, s)| (*id, (s - median).abs() <= band))
            .collect();

        (agreement, contradiction, alignment)
    }
}

fn compare_sets<'a>(
    dc: &DimensionConfig,
    values: &[(&'a str, &FeatureValue)],
) -> (f64, Option<Contradiction>, Vec<(&'a str, bool)>) {
    let sets: Vec<(&'a str, &BTreeSet<String>)> = values
        .iter()
        .filter_map(|(id, v)| v.as_set().map(|s| (*id, s)))
        .collect();

    let mut union: BTreeSet<&str> = BTreeSet::new();
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for (_, set) in &sets {
        for label in set.iter() {
            union.insert(label.as_str());
            *counts.entry(label.as_str()).or_insert(0) += 1;
        }
    }
    let intersection = counts.values().filter(|&&c| c == sets.len()).count();
    let agreement = if union.is_empty() {
        1.0
    } else {
        intersection as f64 / union.len() as f64
    };

    let mut conflicting: BTreeSet<&str> = BTreeSet::new();
    for (i, (id_a, a)) in sets.iter().enumerate() {
        for (id_b, b) in &sets[i + 1..] {
            if !a.is_empty() && !b.is_empty() && a.is_disjoint(b) {
                conflicting.insert(*id_a);
                conflicting.insert(*id_b);
            }
        }
    }
    let contradiction = contradiction_from(dc, values, &conflicting);

    let majority: BTreeSet<String> = counts
        .iter()
        .filter(|(_, count)| **count * 2 > sets.len())
        .map(|(label, _)| (*label).to_string())
        .collect();
    let alignment = sets
        .iter()
        .map(|(id, set)| (*id, set.is_subset(&majority) || set.is_superset(&majority)))
        .collect();

    (agreement, contradiction, alignment)
}

fn contradiction_from(
    dc: &DimensionConfig,
    values: &[(&str, &FeatureValue)],
    conflicting: &BTreeSet<&str>,
) -> Option<Contradiction> {
    if conflicting.is_empty() {
        return None;
    }
    Some(Contradiction {
        dimension: dc.dimension.clone(),
        conflicting_model_ids: conflicting.iter().map(|id| (*id).to_string()).collect(),
        values: values
            .iter()
            .filter(|(id, _)| conflicting.contains(id))
            .map(|(id, v)| ((*id).to_string(), (*v).clone()))
            .collect(),
    })
}

fn weighted_mean(dimensions: &[DimensionAgreement], weights: &[f64]) -> f64 {
    let total: f64 = weights.iter().sum();
    if total > 0.0 {
        dimensions
            .iter()
            .zip(weights)
            .map(|(d, w)| d.agreement_fraction * w)
            .sum::<f64>()
            / total
    } else {
        dimensions.iter().map(|d| d.agreement_fraction).sum::<f64>() / dimensions.len() as f64
    }
}

fn median(mut values: Vec<f64>) -> f64 {
    values.sort_by(f64::total_cmp);
    let n = values.len();
    if n == 0 {
        0.0
    } else if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn sentiment_only() -> SynthesisEngine {
        SynthesisEngine::new(
            SynthesisConfig::empty()
                .with_dimension(DimensionConfig::numeric("sentiment_score", "Sentiment"))
                .with_divergence_threshold(0.6),
        )
    }

    fn sentiments(values: &[(&str, f64)]) -> Vec<ModelResponse> {
        values
            .iter()
            .map(|(id, v)| ModelResponse::new(*id, "answer").with_score("sentiment_score", *v))
            .collect()
    }

    #[test]
    fn test_numeric_agreement_close_scores() {
        let result = sentiment_only()
            .synthesize(&sentiments(&[("a", 0.7), ("b", 0.75), ("c", 0.2)]))
            .unwrap();

        let expected = 1.0 - 1.1 / 3.0;
        assert!((result.consensus_index - expected).abs() < EPS);
        assert!((result.dimensions[0].agreement_fraction - expected).abs() < EPS);
        assert!(result.divergence_points.is_empty());
    }

    #[test]
    fn test_numeric_agreement_spread_scores_diverge() {
        let result = sentiment_only()
            .synthesize(&sentiments(&[("a", 0.9), ("b", 0.1), ("c", 0.5)]))
            .unwrap();

        let expected = 1.0 - 1.6 / 3.0;
        assert!((result.consensus_index - expected).abs() < EPS);
        assert_eq!(result.divergence_points.len(), 1);
        assert_eq!(result.divergence_points[0].topic, "Sentiment");
        assert!((result.divergence_points[0].agreement_fraction - expected).abs() < EPS);
    }

    #[test]
    fn test_numeric_contradiction_names_conflicting_pair() {
        let result = sentiment_only()
            .synthesize(&sentiments(&[("a", 0.9), ("b", 0.1), ("c", 0.5)]))
            .unwrap();

        assert_eq!(result.contradictions.len(), 1);
        let c = &result.contradictions[0];
        assert_eq!(c.conflicting_model_ids, vec!["a", "b"]);
        assert_eq!(c.values["a"], FeatureValue::Score(0.9));
        assert!(!c.values.contains_key("c"));
    }

    #[test]
    fn test_agreement_clamps_at_zero() {
        let engine = SynthesisEngine::new(SynthesisConfig::empty().with_dimension(
            DimensionConfig::numeric("sentiment_score", "S").with_range(0.0, 0.5),
        ));
        let result = engine
            .synthesize(&sentiments(&[("a", 0.0), ("b", 1.0)]))
            .unwrap();
        assert_eq!(result.consensus_index, 0.0);
    }

    #[test]
    fn test_jaccard_for_two_models() {
        let engine = SynthesisEngine::new(
            SynthesisConfig::empty().with_dimension(DimensionConfig::categorical("topics", "Topics")),
        );
        let result = engine
            .synthesize(&[
                ModelResponse::new("a", "").with_set("topics", ["energy", "cost", "safety"]),
                ModelResponse::new("b", "").with_set("topics", ["energy", "safety", "waste"]),
            ])
            .unwrap();
        assert!((result.consensus_index - 0.5).abs() < EPS);
        assert!(result.contradictions.is_empty());
    }

    #[test]
    fn test_disjoint_sets_contradict() {
        let engine = SynthesisEngine::new(
            SynthesisConfig::empty().with_dimension(DimensionConfig::categorical("claims", "Claims")),
        );
        let result = engine
            .synthesize(&[
                ModelResponse::new("a", "").with_set("claims", ["safe"]),
                ModelResponse::new("b", "").with_set("claims", ["unsafe"]),
                ModelResponse::new("c", "").with_set("claims", Vec::<String>::new()),
            ])
            .unwrap();
        assert_eq!(result.consensus_index, 0.0);
        assert_eq!(result.contradictions[0].conflicting_model_ids, vec!["a", "b"]);
    }

    #[test]
    fn test_empty_sets_fully_agree() {
        let engine = SynthesisEngine::new(
            SynthesisConfig::empty().with_dimension(DimensionConfig::categorical("claims", "Claims")),
        );
        let result = engine
            .synthesize(&[
                ModelResponse::new("a", "").with_set("claims", Vec::<String>::new()),
                ModelResponse::new("b", "").with_set("claims", Vec::<String>::new()),
            ])
            .unwrap();
        assert_eq!(result.consensus_index, 1.0);
    }

    #[test]
    fn test_weighted_consensus() {
        let engine = SynthesisEngine::new(
            SynthesisConfig::empty()
                .with_dimension(DimensionConfig::numeric("sentiment_score", "S").with_weight(3.0))
                .with_dimension(DimensionConfig::categorical("topics", "T")),
        );
        let result = engine
            .synthesize(&[
                ModelResponse::new("a", "")
                    .with_score("sentiment_score", 0.5)
                    .with_set("topics", ["x"]),
                ModelResponse::new("b", "")
                    .with_score("sentiment_score", 0.5)
                    .with_set("topics", ["y"]),
            ])
            .unwrap();
        // sentiment agrees fully (1.0 × 3), topics not at all (0.0 × 1)
        assert!((result.consensus_index - 0.75).abs() < EPS);
    }

    #[test]
    fn test_single_model() {
        let result = SynthesisEngine::default()
            .synthesize(&sentiments(&[("solo", 0.3)]))
            .unwrap();
        assert_eq!(result.consensus_index, 1.0);
        assert!(result.divergence_points.is_empty());
        assert!(result.contradictions.is_empty());
        assert_eq!(result.per_model_alignment["solo"], 1.0);
    }

    #[test]
    fn test_zero_models() {
        assert!(matches!(
            SynthesisEngine::default().synthesize(&[]),
            Err(SynthesisError::InsufficientInput)
        ));
    }

    #[test]
    fn test_duplicate_model_rejected() {
        let err = sentiment_only()
            .synthesize(&sentiments(&[("a", 0.1), ("a", 0.2)]))
            .unwrap_err();
        assert!(matches!(err, SynthesisError::DuplicateModel(id) if id == "a"));
    }

    #[test]
    fn test_schema_mismatch_rejected() {
        let err = SynthesisEngine::default()
            .synthesize(&[
                ModelResponse::new("a", "").with_score("topics", 0.4),
                ModelResponse::new("b", "").with_set("topics", ["x"]),
            ])
            .unwrap_err();
        assert!(matches!(err, SynthesisError::SchemaMismatch { .. }));
    }

    #[test]
    fn test_non_finite_score_rejected() {
        let engine = sentiment_only();
        let err = engine
            .synthesize(&sentiments(&[("a", f64::NAN), ("b", 0.5)]))
            .unwrap_err();
        assert!(matches!(
            err,
            SynthesisError::NonFiniteScore { ref model_id, dimension: Dimension::SentimentScore }
                if model_id == "a"
        ));

        let unconfigured = ModelResponse::new("c", "").with_score("confidence", f64::INFINITY);
        assert!(matches!(
            engine.check_schema(&unconfigured),
            Err(SynthesisError::NonFiniteScore { .. })
        ));
    }

    #[test]
    fn test_sparse_dimensions_skipped() {
        let result = SynthesisEngine::default()
            .synthesize(&[
                ModelResponse::new("a", "")
                    .with_score("sentiment_score", 0.4)
                    .with_score("confidence", 0.9),
                ModelResponse::new("b", "").with_score("sentiment_score", 0.5),
            ])
            .unwrap();
        assert_eq!(result.dimensions.len(), 1);
        assert!(result.skipped_dimensions.contains(&Dimension::Confidence));
        assert!(result.skipped_dimensions.contains(&Dimension::Topics));
    }

    #[test]
    fn test_no_comparable_dimensions() {
        let err = SynthesisEngine::default()
            .synthesize(&[
                ModelResponse::new("a", "").with_score("sentiment_score", 0.4),
                ModelResponse::new("b", "").with_score("confidence", 0.4),
            ])
            .unwrap_err();
        assert!(matches!(
            err,
            SynthesisError::NoComparableDimensions { models: 2 }
        ));
    }

    #[test]
    fn test_alignment_against_median_and_majority() {
        let engine = SynthesisEngine::new(
            SynthesisConfig::empty()
                .with_dimension(DimensionConfig::numeric("sentiment_score", "S"))
                .with_dimension(DimensionConfig::categorical("topics", "T")),
        );
        let result = engine
            .synthesize(&[
                ModelResponse::new("a", "")
                    .with_score("sentiment_score", 0.70)
                    .with_set("topics", ["energy", "cost"]),
                ModelResponse::new("b", "")
                    .with_score("sentiment_score", 0.75)
                    .with_set("topics", ["energy"]),
                ModelResponse::new("c", "")
                    .with_score("sentiment_score", 0.20)
                    .with_set("topics", ["waste"]),
            ])
            .unwrap();

        // median 0.70, majority set {energy}
        assert_eq!(result.per_model_alignment["a"], 1.0);
        assert_eq!(result.per_model_alignment["b"], 1.0);
        assert_eq!(result.per_model_alignment["c"], 0.0);
    }

    #[test]
    fn test_divergence_order_is_ascending_then_config_order() {
        let engine = SynthesisEngine::new(
            SynthesisConfig::empty()
                .with_dimension(DimensionConfig::categorical("topics", "Topics"))
                .with_dimension(DimensionConfig::categorical("claims", "Claims"))
                .with_dimension(DimensionConfig::numeric("sentiment_score", "Sentiment")),
        );
        let result = engine
            .synthesize(&[
                ModelResponse::new("a", "")
                    .with_set("topics", ["x"])
                    .with_set("claims", ["p"])
                    .with_score("sentiment_score", 0.0),
                ModelResponse::new("b", "")
                    .with_set("topics", ["y"])
                    .with_set("claims", ["q"])
                    .with_score("sentiment_score", 0.5),
            ])
            .unwrap();

        let topics: Vec<&str> = result
            .divergence_points
            .iter()
            .map(|d| d.topic.as_str())
            .collect();
        assert_eq!(topics, vec!["Topics", "Claims", "Sentiment"]);
    }

    #[test]
    fn test_input_order_does_not_change_result() {
        let engine = SynthesisEngine::default();
        let mut responses = vec![
            ModelResponse::new("m1", "")
                .with_score("sentiment_score", 0.3)
                .with_set("topics", ["a", "b"]),
            ModelResponse::new("m2", "")
                .with_score("sentiment_score", 0.6)
                .with_set("topics", ["b"]),
            ModelResponse::new("m3", "")
                .with_score("sentiment_score", 0.9)
                .with_set("topics", ["c"]),
        ];
        let first = engine.synthesize(&responses).unwrap();
        responses.reverse();
        let second = engine.synthesize(&responses).unwrap();

        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
        assert_eq!(first.digest().unwrap(), second.digest().unwrap());
    }

    #[test]
    fn test_disputed_dimensions_deduplicated() {
        let result = sentiment_only()
            .synthesize(&sentiments(&[("a", 0.9), ("b", 0.1), ("c", 0.5)]))
            .unwrap();
        assert_eq!(result.disputed_dimensions(), vec![Dimension::SentimentScore]);
    }
}
