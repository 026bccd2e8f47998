//! # Consensus Debate
//!
//! Optional refinement when models disagree: each participant is shown its
//! peers' positions and asked to restate or revise its own, the engine
//! re-synthesizes, and the loop stops once consensus is restored, progress
//! stalls, or the round cap is hit.
//!
//! ## Lifecycle
//!
//! ```text
//!   not_triggered ──(trigger)──▶ round 1 ──▶ round 2 ──▶ … ──▶ round N
//!                                   │           │                 │
//!                                   └───────────┴────────┬────────┘
//!                                                        ▼
//!                              concluded(consensus_reached | stalled | round_cap | aborted)
//! ```
//!
//! ## Division of Labour
//!
//! The coordinator never calls a model. [`DebateCoordinator::prepare_round`]
//! assembles one [`DebatePrompt`] per participant;
//! the caller delivers them however it likes (concurrently, with timeouts)
//! and hands the raw replies to [`DebateCoordinator::complete_round`], which
//! parses them and advances the session. [`DebateCoordinator::run_round`]
//! wraps both halves around a synchronous responder for simple callers.
//!
//! ## Reply Format
//!
//! Participants answer with a JSON object:
//!
//! ```json
//! {"stance": "cautiously positive", "features": {"sentiment_score": 0.6}, "confidence": 0.8}
//! ```
//!
//! A reply that fails, cannot be parsed, or carries a feature of the wrong
//! kind excludes that model from the round. The round still proceeds when
//! at least `min_participants` models answered.
//!
//! ## References
//!
//! - Du, Y. et al. (2023). "Improving Factuality and Reasoning in Language
//!   Models through Multiagent Debate". arXiv:2305.14325

use crate::engine::{SynthesisEngine, SynthesisResult};
use crate::error::{Result, SynthesisError};
use crate::response::{Dimension, FeatureValue, Features, ModelResponse};
use crate::vote::{tally, VoteMode, VoteTally};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use tracing::{info, warn};

/// Configuration for [`DebateCoordinator`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebateConfig {
    /// Run debates at all.
    pub enabled: bool,
    /// A consensus index below this triggers a debate.
    pub trigger_threshold: f64,
    /// Maximum number of rounds.
    pub round_cap: u32,
    /// A round improving consensus by less than this counts as stalled.
    pub improvement_epsilon: f64,
    /// Consecutive stalled rounds that end the debate.
    pub stall_rounds: u32,
    /// Ballot weighting for the final vote.
    pub vote_mode: VoteMode,
    /// Fewest usable replies for a round to proceed.
    pub min_participants: usize,
}

impl Default for DebateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            trigger_threshold: 0.5,
            round_cap: 3,
            improvement_epsilon: 0.01,
            stall_rounds: 2,
            vote_mode: VoteMode::Majority,
            min_participants: 2,
        }
    }
}

impl DebateConfig {
    /// Enables or disables debates.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the trigger threshold.
    #[must_use]
    pub fn with_trigger_threshold(mut self, threshold: f64) -> Self {
        self.trigger_threshold = threshold;
        self
    }

    /// Sets the round cap.
    #[must_use]
    pub fn with_round_cap(mut self, cap: u32) -> Self {
        self.round_cap = cap;
        self
    }

    /// Sets the improvement epsilon.
    #[must_use]
    pub fn with_improvement_epsilon(mut self, epsilon: f64) -> Self {
        self.improvement_epsilon = epsilon;
        self
    }

    /// Sets how many stalled rounds end the debate.
    #[must_use]
    pub fn with_stall_rounds(mut self, rounds: u32) -> Self {
        self.stall_rounds = rounds;
        self
    }

    /// Sets the vote weighting.
    #[must_use]
    pub fn with_vote_mode(mut self, mode: VoteMode) -> Self {
        self.vote_mode = mode;
        self
    }

    /// Sets the minimum number of participants per round.
    #[must_use]
    pub fn with_min_participants(mut self, min: usize) -> Self {
        self.min_participants = min;
        self
    }

    /// Rejects configurations under which a debate cannot run.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.trigger_threshold) {
            return Err(SynthesisError::InvalidConfig(format!(
                "trigger_threshold must lie in [0, 1], got {}",
                self.trigger_threshold
            )));
        }
        if self.round_cap == 0 {
            return Err(SynthesisError::InvalidConfig(
                "round_cap must be at least 1".to_string(),
            ));
        }
        if !self.improvement_epsilon.is_finite() || self.improvement_epsilon < 0.0 {
            return Err(SynthesisError::InvalidConfig(
                "improvement_epsilon must be a non-negative number".to_string(),
            ));
        }
        if self.stall_rounds == 0 {
            return Err(SynthesisError::InvalidConfig(
                "stall_rounds must be at least 1".to_string(),
            ));
        }
        if self.min_participants < 2 {
            return Err(SynthesisError::InvalidConfig(
                "min_participants must be at least 2".to_string(),
            ));
        }
        Ok(())
    }
}

/// Why a debate ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConclusionReason {
    /// The trigger condition no longer holds.
    ConsensusReached,
    /// Consensus stopped improving.
    Stalled,
    /// The configured number of rounds ran.
    RoundCap,
    /// Too few models answered a round.
    Aborted,
}

impl fmt::Display for ConclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConclusionReason::ConsensusReached => "consensus_reached",
            ConclusionReason::Stalled => "stalled",
            ConclusionReason::RoundCap => "round_cap",
            ConclusionReason::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Where a debate session stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", content = "detail", rename_all = "snake_case")]
pub enum DebatePhase {
    /// The initial synthesis did not warrant a debate.
    NotTriggered,
    /// Round `n` is next to run.
    Round(u32),
    /// Finished.
    Concluded(ConclusionReason),
}

/// A model's last stated position, as shown to its peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Stated stance, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stance: Option<String>,
    /// Extracted features.
    pub features: Features,
}

impl From<&ModelResponse> for Position {
    fn from(response: &ModelResponse) -> Self {
        Self {
            stance: response.stance.clone(),
            features: response.features.clone(),
        }
    }
}

/// Context handed to one participant for one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebatePrompt {
    /// Addressed model.
    pub model_id: String,
    /// Round number, starting at 1.
    pub round: u32,
    /// The original question.
    pub question: String,
    /// The model's own last position.
    pub own_position: Option<Position>,
    /// Every other participant's last position.
    pub peer_positions: BTreeMap<String, Position>,
    /// Labels of the dimensions still in dispute.
    pub disputed_dimensions: Vec<String>,
    /// Consensus index after the previous round.
    pub consensus_index: f64,
}

impl DebatePrompt {
    /// Renders the prompt as plain text with the reply format appended.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Debate round {} for the question:", self.round);
        let _ = writeln!(out, "{}", self.question);
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "Current consensus index: {:.2}. Disputed: {}.",
            self.consensus_index,
            if self.disputed_dimensions.is_empty() {
                "none".to_string()
            } else {
                self.disputed_dimensions.join(", ")
            }
        );
        if let Some(own) = &self.own_position {
            let _ = writeln!(out, "Your previous position: {}", describe(own));
        }
        let _ = writeln!(out, "Other participants:");
        for (model, position) in &self.peer_positions {
            let _ = writeln!(out, "- {}: {}", model, describe(position));
        }
        let _ = writeln!(out);
        let _ = write!(
            out,
            "Restate or revise your position. Reply with JSON only: \
             {{\"stance\": string, \"features\": {{dimension: number | [string]}}, \"confidence\": number}}"
        );
        out
    }
}

fn describe(position: &Position) -> String {
    let features = position
        .features
        .iter()
        .map(|(d, v)| match v {
            FeatureValue::Score(s) => format!("{}={:.2}", d, s),
            FeatureValue::Set(labels) => format!(
                "{}=[{}]",
                d,
                labels.iter().cloned().collect::<Vec<_>>().join(", ")
            ),
        })
        .collect::<Vec<_>>()
        .join(", ");
    match &position.stance {
        Some(stance) if features.is_empty() => format!("\"{}\"", stance),
        Some(stance) => format!("\"{}\" ({})", stance, features),
        None => format!("({})", features),
    }
}

/// Raw outcome of asking one participant.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticipantReply {
    /// Responding model.
    pub model_id: String,
    /// Reply text, or the reason no reply was obtained.
    pub outcome: std::result::Result<String, String>,
}

impl ParticipantReply {
    /// A reply that arrived.
    pub fn answered(model_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            outcome: Ok(text.into()),
        }
    }

    /// A participant that failed to respond.
    pub fn failed(model_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            outcome: Err(reason.into()),
        }
    }
}

#[derive(Deserialize)]
struct StructuredReply {
    stance: String,
    #[serde(default)]
    features: Features,
    #[serde(default)]
    confidence: Option<f64>,
}

/// A participant left out of a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exclusion {
    /// Excluded model.
    pub model_id: String,
    /// Why.
    pub reason: String,
}

/// What happened in one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundRecord {
    /// Round number, starting at 1.
    pub round: u32,
    /// Parsed replies of the models that took part.
    pub responses: Vec<ModelResponse>,
    /// Models left out of this round.
    pub excluded: Vec<Exclusion>,
    /// Synthesis over `responses`. Absent when the round was aborted.
    pub synthesis: Option<SynthesisResult>,
    /// Consensus change relative to the previous round.
    pub consensus_delta: Option<f64>,
}

/// Running debate over one question.
#[derive(Debug, Clone)]
pub struct DebateSession {
    question: String,
    phase: DebatePhase,
    positions: BTreeMap<String, ModelResponse>,
    initial: SynthesisResult,
    current: SynthesisResult,
    rounds: Vec<RoundRecord>,
    stalled_streak: u32,
}

impl DebateSession {
    /// Current phase.
    pub fn phase(&self) -> DebatePhase {
        self.phase
    }

    /// True while rounds remain to run.
    pub fn is_active(&self) -> bool {
        matches!(self.phase, DebatePhase::Round(_))
    }

    /// Rounds run so far.
    pub fn rounds(&self) -> &[RoundRecord] {
        &self.rounds
    }

    /// The latest synthesis: that of the last completed round, or the
    /// initial one.
    pub fn current_synthesis(&self) -> &SynthesisResult {
        &self.current
    }

    /// Stances behind the current synthesis, sorted by model id.
    ///
    /// These are the replies of the last round that produced a synthesis.
    /// Models excluded from that round have no stance here. Before any
    /// successful round they are the initial responses.
    pub fn final_stances(&self) -> Vec<ModelResponse> {
        match self.rounds.iter().rev().find(|r| r.synthesis.is_some()) {
            Some(round) => {
                let mut stances = round.responses.clone();
                stances.sort_by(|a, b| a.model_id.cmp(&b.model_id));
                stances
            }
            None => self.positions.values().cloned().collect(),
        }
    }
}

/// Summary of a finished debate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebateOutcome {
    /// Final phase: `not_triggered` or `concluded`.
    pub phase: DebatePhase,
    /// Consensus before the first round.
    pub initial_consensus: f64,
    /// Last successful synthesis.
    pub final_synthesis: SynthesisResult,
    /// Full round history.
    pub rounds: Vec<RoundRecord>,
    /// Vote over the disputed dimensions. Absent when no debate ran.
    pub vote: Option<VoteTally>,
}

impl DebateOutcome {
    /// Why the debate ended, if one ran.
    pub fn reason(&self) -> Option<ConclusionReason> {
        match self.phase {
            DebatePhase::Concluded(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Drives debate sessions.
///
/// # Example
///
/// ```rust
/// use concord_synthesis::{
///     DebateConfig, DebateCoordinator, DimensionConfig, ModelResponse, SynthesisConfig,
///     SynthesisEngine,
/// };
///
/// let engine = SynthesisEngine::new(
///     SynthesisConfig::empty().with_dimension(DimensionConfig::numeric("sentiment_score", "S")),
/// );
/// let coordinator = DebateCoordinator::new(engine.clone(), DebateConfig::default());
///
/// let responses = vec![
///     ModelResponse::new("a", "yes").with_score("sentiment_score", 0.9),
///     ModelResponse::new("b", "no").with_score("sentiment_score", 0.1),
/// ];
/// let initial = engine.synthesize(&responses)?;
/// assert!(coordinator.check_trigger(&initial));
///
/// let outcome = coordinator.run("Is it safe?", responses, initial, |_prompt| {
///     Ok(r#"{"stance": "maybe", "features": {"sentiment_score": 0.5}}"#.to_string())
/// })?;
/// assert_eq!(outcome.rounds.len(), 1);
/// # Ok::<(), concord_synthesis::SynthesisError>(())
/// ```
#[derive(Debug, Clone)]
pub struct DebateCoordinator {
    engine: SynthesisEngine,
    config: DebateConfig,
}

impl DebateCoordinator {
    /// Creates a coordinator.
    pub fn new(engine: SynthesisEngine, config: DebateConfig) -> Self {
        Self { engine, config }
    }

    /// Active configuration.
    pub fn config(&self) -> &DebateConfig {
        &self.config
    }

    /// True iff consensus is below the trigger threshold or any contradiction
    /// was found.
    pub fn check_trigger(&self, result: &SynthesisResult) -> bool {
        result.consensus_index < self.config.trigger_threshold || !result.contradictions.is_empty()
    }

    /// Opens a session. It starts at round 1 when enabled and triggered, and
    /// in `not_triggered` otherwise.
    pub fn begin(
        &self,
        question: impl Into<String>,
        responses: Vec<ModelResponse>,
        synthesis: SynthesisResult,
    ) -> DebateSession {
        let triggered = self.config.enabled && self.check_trigger(&synthesis);
        let phase = if triggered {
            DebatePhase::Round(1)
        } else {
            DebatePhase::NotTriggered
        };
        if triggered {
            info!(
                consensus_index = synthesis.consensus_index,
                contradictions = synthesis.contradictions.len(),
                "Consensus debate triggered"
            );
        }
        DebateSession {
            question: question.into(),
            phase,
            positions: responses
                .into_iter()
                .map(|r| (r.model_id.clone(), r))
                .collect(),
            initial: synthesis.clone(),
            current: synthesis,
            rounds: Vec::new(),
            stalled_streak: 0,
        }
    }

    /// Builds the prompts for the next round, one per participant.
    ///
    /// # Errors
    ///
    /// Returns [`SynthesisError::DebateNotActive`] if the session is not
    /// waiting for a round.
    pub fn prepare_round(&self, session: &DebateSession) -> Result<Vec<DebatePrompt>> {
        let DebatePhase::Round(round) = session.phase else {
            return Err(SynthesisError::DebateNotActive(format!("{:?}", session.phase)));
        };

        let disputed: Vec<String> = session
            .current
            .disputed_dimensions()
            .iter()
            .map(|d| {
                self.engine
                    .config()
                    .dimension(d)
                    .map_or_else(|| d.to_string(), |dc| dc.label.clone())
            })
            .collect();

        Ok(session
            .positions
            .keys()
            .map(|model_id| DebatePrompt {
                model_id: model_id.clone(),
                round,
                question: session.question.clone(),
                own_position: session.positions.get(model_id).map(Position::from),
                peer_positions: session
                    .positions
                    .iter()
                    .filter(|(peer, _)| *peer != model_id)
                    .map(|(peer, r)| (peer.clone(), Position::from(r)))
                    .collect(),
                disputed_dimensions: disputed.clone(),
                consensus_index: session.current.consensus_index,
            })
            .collect())
    }

    /// Parses the replies of the current round, re-synthesizes and advances
    /// the session.
    ///
    /// # Errors
    ///
    /// Returns [`SynthesisError::InsufficientParticipants`] when fewer than
    /// `min_participants` usable replies arrived. The round is still recorded
    /// and the session is concluded as `aborted`, keeping the previous
    /// synthesis.
    pub fn complete_round<'s>(
        &self,
        session: &'s mut DebateSession,
        replies: Vec<ParticipantReply>,
    ) -> Result<&'s RoundRecord> {
        let DebatePhase::Round(round) = session.phase else {
            return Err(SynthesisError::DebateNotActive(format!("{:?}", session.phase)));
        };

        let mut responses: Vec<ModelResponse> = Vec::new();
        let mut excluded: Vec<Exclusion> = Vec::new();

        for reply in replies {
            if !session.positions.contains_key(&reply.model_id) {
                warn!(round, model = %reply.model_id, "Ignoring reply from non-participant");
                continue;
            }
            if responses.iter().any(|r| r.model_id == reply.model_id) {
                continue;
            }
            match reply
                .outcome
                .and_then(|text| self.parse_reply(&reply.model_id, &text))
            {
                Ok(response) => responses.push(response),
                Err(reason) => {
                    warn!(round, model = %reply.model_id, %reason, "Participant excluded from round");
                    excluded.push(Exclusion {
                        model_id: reply.model_id,
                        reason,
                    });
                }
            }
        }

        for model_id in session.positions.keys() {
            let accounted = responses.iter().any(|r| &r.model_id == model_id)
                || excluded.iter().any(|e| &e.model_id == model_id);
            if !accounted {
                excluded.push(Exclusion {
                    model_id: model_id.clone(),
                    reason: "no reply".to_string(),
                });
            }
        }
        excluded.sort_by(|a, b| a.model_id.cmp(&b.model_id));

        if responses.len() < self.config.min_participants {
            let responded = responses.len();
            warn!(
                round,
                responded,
                required = self.config.min_participants,
                "Debate aborted"
            );
            session.rounds.push(RoundRecord {
                round,
                responses,
                excluded,
                synthesis: None,
                consensus_delta: None,
            });
            session.phase = DebatePhase::Concluded(ConclusionReason::Aborted);
            return Err(SynthesisError::InsufficientParticipants {
                round,
                responded,
                required: self.config.min_participants,
            });
        }

        let synthesis = self.engine.synthesize(&responses)?;
        let delta = synthesis.consensus_index - session.current.consensus_index;

        if delta < self.config.improvement_epsilon {
            session.stalled_streak += 1;
        } else {
            session.stalled_streak = 0;
        }

        session.phase = if !self.check_trigger(&synthesis) {
            DebatePhase::Concluded(ConclusionReason::ConsensusReached)
        } else if session.stalled_streak >= self.config.stall_rounds {
            DebatePhase::Concluded(ConclusionReason::Stalled)
        } else if round >= self.config.round_cap {
            DebatePhase::Concluded(ConclusionReason::RoundCap)
        } else {
            DebatePhase::Round(round + 1)
        };

        info!(
            round,
            consensus_index = synthesis.consensus_index,
            delta,
            excluded = excluded.len(),
            phase = ?session.phase,
            "Debate round complete"
        );

        for response in &responses {
            session
                .positions
                .insert(response.model_id.clone(), response.clone());
        }
        session.current = synthesis.clone();
        session.rounds.push(RoundRecord {
            round,
            responses,
            excluded,
            synthesis: Some(synthesis),
            consensus_delta: Some(delta),
        });

        let last = session.rounds.len() - 1;
        Ok(&session.rounds[last])
    }

    /// Runs one round by calling `respond` for every prompt in turn.
    pub fn run_round<'s, F>(
        &self,
        session: &'s mut DebateSession,
        mut respond: F,
    ) -> Result<&'s RoundRecord>
    where
        F: FnMut(&DebatePrompt) -> std::result::Result<String, String>,
    {
        let replies = self
            .prepare_round(session)?
            .iter()
            .map(|prompt| ParticipantReply {
                model_id: prompt.model_id.clone(),
                outcome: respond(prompt),
            })
            .collect();
        self.complete_round(session, replies)
    }

    /// Runs a whole debate synchronously and returns its outcome.
    ///
    /// An aborted round ends the debate without failing it: the outcome keeps
    /// the last successful synthesis.
    pub fn run<F>(
        &self,
        question: impl Into<String>,
        responses: Vec<ModelResponse>,
        synthesis: SynthesisResult,
        mut respond: F,
    ) -> Result<DebateOutcome>
    where
        F: FnMut(&DebatePrompt) -> std::result::Result<String, String>,
    {
        let mut session = self.begin(question, responses, synthesis);
        while session.is_active() {
            match self.run_round(&mut session, &mut respond) {
                Ok(_) | Err(SynthesisError::InsufficientParticipants { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(self.conclude(session))
    }

    /// Tallies the final stances over the dimensions still disputed.
    ///
    /// Only models that took part in the round behind the current synthesis
    /// vote.
    pub fn vote(&self, session: &DebateSession) -> VoteTally {
        let disputed: Vec<Dimension> = session.current.disputed_dimensions();
        tally(
            self.engine.config(),
            self.config.vote_mode,
            &session.final_stances(),
            &disputed,
        )
    }

    /// Closes a session into its outcome.
    pub fn conclude(&self, session: DebateSession) -> DebateOutcome {
        let vote = (!session.rounds.is_empty()).then(|| self.vote(&session));
        DebateOutcome {
            phase: session.phase,
            initial_consensus: session.initial.consensus_index,
            final_synthesis: session.current,
            rounds: session.rounds,
            vote,
        }
    }

    fn parse_reply(&self, model_id: &str, text: &str) -> std::result::Result<ModelResponse, String> {
        let body = match (text.find('{'), text.rfind('}')) {
            (Some(start), Some(end)) if start < end => &text[start..=end],
            _ => return Err("reply contains no JSON object".to_string()),
        };
        let reply: StructuredReply =
            serde_json::from_str(body).map_err(|e| format!("malformed reply: {}", e))?;

        let mut response = ModelResponse::new(model_id, text)
            .with_features(reply.features)
            .with_stance(reply.stance);
        if let Some(confidence) = reply.confidence {
            response
                .features
                .insert(Dimension::Confidence, FeatureValue::Score(confidence));
        }

        self.engine
            .check_schema(&response)
            .map_err(|e| e.to_string())?;
        Ok(response)
    }
}
