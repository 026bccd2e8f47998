//! Configuration types for Concord.

use crate::error::OrchestratorError;
use crate::Result;
use concord_ledger::LedgerStore;
use concord_pipeline::PipelineConfig;
use concord_synthesis::{DebateConfig, SynthesisConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcordConfig {
    /// Transparency ledger configuration.
    pub ledger: LedgerConfig,

    /// Pipeline state machine configuration.
    pub pipeline: PipelineConfig,

    /// Participating models and call limits.
    pub models: ModelsConfig,

    /// Synthesis dimensions and thresholds.
    pub synthesis: SynthesisConfig,

    /// Consensus debate configuration.
    pub debate: DebateConfig,
}

impl ConcordConfig {
    /// Reads a JSON configuration file and validates it.
    ///
    /// Missing sections and fields take their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: ConcordConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Replaces the participating models.
    #[must_use]
    pub fn with_models<I, S>(mut self, model_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.models.model_ids = model_ids.into_iter().map(Into::into).collect();
        self
    }

    /// Rejects configurations that cannot work.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Config`] naming the first problem found.
    pub fn validate(&self) -> Result<()> {
        self.models.validate()?;
        self.synthesis
            .validate()
            .map_err(|e| OrchestratorError::Config(e.to_string()))?;
        self.debate
            .validate()
            .map_err(|e| OrchestratorError::Config(e.to_string()))?;
        if self.debate.min_participants > self.models.model_ids.len() && self.debate.enabled {
            return Err(OrchestratorError::Config(format!(
                "debate needs {} participants but only {} models are configured",
                self.debate.min_participants,
                self.models.model_ids.len()
            )));
        }
        Ok(())
    }
}

/// Transparency ledger configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Path to the ledger database. `None` keeps the ledger in memory.
    pub db_path: Option<PathBuf>,

    /// Flush to disk after every append.
    pub flush_on_append: bool,
}

impl LedgerConfig {
    /// Opens the ledger this configuration describes.
    pub fn open(&self) -> Result<LedgerStore> {
        match &self.db_path {
            Some(path) => Ok(LedgerStore::open(path)?.with_flush_on_append(self.flush_on_append)),
            None => Ok(LedgerStore::in_memory()),
        }
    }
}

/// Participating models and per-call limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Models asked about every question.
    pub model_ids: Vec<String>,

    /// Timeout for one model call, in milliseconds.
    pub call_timeout_ms: u64,

    /// Fewest usable responses needed to synthesize.
    pub min_responses: usize,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            model_ids: Vec::new(),
            call_timeout_ms: 30_000,
            min_responses: 2,
        }
    }
}

impl ModelsConfig {
    /// Per-call timeout.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.model_ids.is_empty() {
            return Err(OrchestratorError::Config("no models configured".to_string()));
        }
        for (i, id) in self.model_ids.iter().enumerate() {
            if id.trim().is_empty() {
                return Err(OrchestratorError::Config("empty model id".to_string()));
            }
            if self.model_ids[..i].contains(id) {
                return Err(OrchestratorError::Config(format!("model {} listed twice", id)));
            }
        }
        if self.min_responses < 1 {
            return Err(OrchestratorError::Config(
                "min_responses must be at least 1".to_string(),
            ));
        }
        if self.min_responses > self.model_ids.len() {
            return Err(OrchestratorError::Config(format!(
                "min_responses is {} but only {} models are configured",
                self.min_responses,
                self.model_ids.len()
            )));
        }
        if self.call_timeout_ms == 0 {
            return Err(OrchestratorError::Config(
                "call_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid() -> ConcordConfig {
        ConcordConfig::default().with_models(["gpt", "claude", "gemini"])
    }

    #[test]
    fn test_default_config() {
        let config = ConcordConfig::default();
        assert_eq!(config.models.call_timeout_ms, 30_000);
        assert_eq!(config.models.min_responses, 2);
        assert_eq!(config.debate.round_cap, 3);
        assert_eq!(config.synthesis.divergence_threshold, 0.6);
        assert!(config.ledger.db_path.is_none());
    }

    #[test]
    fn test_default_needs_models() {
        assert!(matches!(
            ConcordConfig::default().validate(),
            Err(OrchestratorError::Config(_))
        ));
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_rejects_unworkable_settings() {
        let mut c = valid();
        c.models.min_responses = 0;
        assert!(c.validate().is_err());

        let mut c = valid();
        c.models.min_responses = 4;
        assert!(c.validate().is_err());

        let mut c = valid();
        c.debate.round_cap = 0;
        assert!(c.validate().is_err());

        let mut c = valid();
        c.synthesis.divergence_threshold = 1.5;
        assert!(c.validate().is_err());

        let c = valid().with_models(["gpt", "gpt"]);
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = valid();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: ConcordConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_from_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"models": {{"model_ids": ["a", "b"], "call_timeout_ms": 500}},
                "debate": {{"round_cap": 5}}}}"#
        )
        .unwrap();

        let config = ConcordConfig::from_file(file.path()).unwrap();
        assert_eq!(config.models.call_timeout(), Duration::from_millis(500));
        assert_eq!(config.models.min_responses, 2);
        assert_eq!(config.debate.round_cap, 5);
        assert_eq!(config.debate.trigger_threshold, 0.5);
        assert_eq!(config.synthesis.dimensions.len(), 5);
    }

    #[test]
    fn test_from_file_rejects_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"models": {{"model_ids": []}}}}"#).unwrap();
        assert!(matches!(
            ConcordConfig::from_file(file.path()),
            Err(OrchestratorError::Config(_))
        ));
    }

    #[test]
    fn test_shipped_config_is_valid() {
        let config: ConcordConfig =
            serde_json::from_str(include_str!("../../../config/concord.json")).unwrap();
        config.validate().unwrap();
        assert_eq!(config.models.model_ids.len(), 3);
        assert_eq!(config.pipeline.max_retries, Some(3));
    }
}
