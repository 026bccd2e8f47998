//! Ballot tally over disputed dimensions.
//!
//! After a debate each model's final stance casts one ballot per disputed
//! dimension. Numeric values vote for the third of the configured range
//! they fall into; set values vote for their exact label set. The plurality
//! ballot wins. Ties are reported as [`VoteOutcome::Unresolved`] and are
//! never broken arbitrarily.

use crate::config::{DimensionConfig, SynthesisConfig};
use crate::response::{Dimension, FeatureValue, ModelResponse};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Two weights closer than this are treated as tied.
const TIE_EPSILON: f64 = 1e-9;

/// How ballots are weighted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteMode {
    /// One model, one vote.
    #[default]
    Majority,
    /// Each ballot weighs the model's `confidence` feature (1.0 when absent).
    ConfidenceWeighted,
}

/// Result of the tally on one dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VoteOutcome {
    /// A single ballot received the most weight.
    Winner {
        /// Winning ballot.
        ballot: String,
        /// Weight it received.
        weight: f64,
    },
    /// Several ballots share the top weight.
    Unresolved {
        /// The tied ballots, sorted.
        tied: Vec<String>,
    },
    /// No model reported this dimension.
    NoVotes,
}

/// Tally for one disputed dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionTally {
    /// Disputed dimension.
    pub dimension: Dimension,
    /// Configured label.
    pub label: String,
    /// Weight per ballot.
    pub ballots: BTreeMap<String, f64>,
    /// Ballot of each voting model.
    pub votes: BTreeMap<String, String>,
    /// Outcome.
    pub outcome: VoteOutcome,
}

/// Tally across all disputed dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteTally {
    /// Weighting used.
    pub mode: VoteMode,
    /// One entry per disputed dimension.
    pub dimensions: Vec<DimensionTally>,
}

impl VoteTally {
    /// Dimensions that ended in a tie.
    pub fn unresolved(&self) -> Vec<&Dimension> {
        self.dimensions
            .iter()
            .filter(|d| matches!(d.outcome, VoteOutcome::Unresolved { .. }))
            .map(|d| &d.dimension)
            .collect()
    }
}

/// Maps a value to its ballot on a dimension.
///
/// A label set votes as its sorted members encoded as a JSON array, so
/// labels containing separators cannot collide.
pub fn ballot(dc: &DimensionConfig, value: &FeatureValue) -> String {
    match value {
        FeatureValue::Score(v) => {
            let position = (v - dc.range_min) / dc.max_range;
            if position < 1.0 / 3.0 {
                "low".to_string()
            } else if position < 2.0 / 3.0 {
                "medium".to_string()
            } else {
                "high".to_string()
            }
        }
        FeatureValue::Set(labels) if labels.is_empty() => "(none)".to_string(),
        FeatureValue::Set(labels) => {
            serde_json::Value::from(labels.iter().cloned().collect::<Vec<_>>()).to_string()
        }
    }
}

/// Tallies final stances over the disputed dimensions.
///
/// Disputed dimensions that are not configured are skipped.
pub fn tally(
    config: &SynthesisConfig,
    mode: VoteMode,
    stances: &[ModelResponse],
    disputed: &[Dimension],
) -> VoteTally {
    let mut ordered: Vec<&ModelResponse> = stances.iter().collect();
    ordered.sort_by(|a, b| a.model_id.cmp(&b.model_id));

    let dimensions = disputed
        .iter()
        .filter_map(|d| config.dimension(d))
        .map(|dc| tally_dimension(dc, mode, &ordered))
        .collect();

    VoteTally { mode, dimensions }
}

fn tally_dimension(dc: &DimensionConfig, mode: VoteMode, stances: &[&ModelResponse]) -> DimensionTally {
    let mut ballots: BTreeMap<String, f64> = BTreeMap::new();
    let mut votes = BTreeMap::new();

    for response in stances {
        let Some(value) = response.features.get(&dc.dimension) else {
            continue;
        };
        let choice = ballot(dc, value);
        let weight = match mode {
            VoteMode::Majority => 1.0,
            VoteMode::ConfidenceWeighted => response
                .score(&Dimension::Confidence)
                .filter(|c| c.is_finite())
                .map_or(1.0, |c| c.max(0.0)),
        };
        *ballots.entry(choice.clone()).or_insert(0.0) += weight;
        votes.insert(response.model_id.clone(), choice);
    }

    let top = ballots.values().copied().fold(f64::NEG_INFINITY, f64::max);
    let leaders: Vec<String> = ballots
        .iter()
        .filter(|(_, w)| (top - **w).abs() < TIE_EPSILON)
        .map(|(b, _)| b.clone())
        .collect();

    let outcome = match leaders.as_slice() {
        [] => VoteOutcome::NoVotes,
        [winner] => VoteOutcome::Winner {
            ballot: winner.clone(),
            weight: top,
        },
        _ => VoteOutcome::Unresolved { tied: leaders },
    };

    DimensionTally {
        dimension: dc.dimension.clone(),
        label: dc.label.clone(),
        ballots,
        votes,
        outcome,
    }
}
