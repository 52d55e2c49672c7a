// Mnema Engine — Configuration
//
// Loaded once from the process environment with programmatic override (all
// fields are public). Validation is collect-all: every violated option is
// reported in one multi-line configuration error so operators fix a bad
// environment in a single round trip.
//
// Global-state note: the log level is process-wide. The engine never
// installs a logger itself; it parses LOG_LEVEL into a `log::LevelFilter`
// for the host to apply, so tests can reconfigure per-case.

use crate::atoms::error::{EngineError, EngineResult};
use log::warn;
use std::path::PathBuf;

/// How far the weight sum may stray from 1.0 before recall logs a warning.
const WEIGHT_SUM_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root of persistence: `memory.db` plus the vector database live here.
    pub data_dir: PathBuf,
    /// Recency decay per hour, exclusive (0, 1).
    pub decay_rate: f64,
    /// Cumulative-importance trigger for a reflection cycle.
    pub reflection_threshold: f64,
    /// Consolidation timer period in milliseconds.
    pub consolidation_interval_ms: u64,
    /// Reserved for semantic-merge deduplication.
    pub merge_similarity_threshold: f64,
    /// Reserved age threshold for pruning, in days.
    pub prune_age_days: u32,
    pub weight_recency: f64,
    pub weight_importance: f64,
    pub weight_relevance: f64,
    /// Where the default HTTP embedding provider listens.
    pub embedding_base_url: String,
    /// Model tag handed to the embedding provider.
    pub embedding_model: String,
    /// Fixed vector length D for this deployment.
    pub embedding_dimensions: usize,
    /// Enables importance scoring, reflection, and summary refresh.
    pub anthropic_api_key: Option<String>,
    /// Parsed LOG_LEVEL, for the host process to apply.
    pub log_level: log::LevelFilter,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            data_dir: PathBuf::from("./data"),
            decay_rate: 0.995,
            reflection_threshold: 150.0,
            consolidation_interval_ms: 86_400_000,
            merge_similarity_threshold: 0.85,
            prune_age_days: 90,
            weight_recency: 0.4,
            weight_importance: 0.3,
            weight_relevance: 0.3,
            embedding_base_url: "http://localhost:11434".into(),
            embedding_model: "Xenova/all-MiniLM-L6-v2".into(),
            embedding_dimensions: 384,
            anthropic_api_key: None,
            log_level: log::LevelFilter::Info,
        }
    }
}

impl EngineConfig {
    /// Load from the process environment.
    pub fn from_env() -> EngineResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. Tests inject maps here instead of
    /// mutating the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> EngineResult<Self> {
        let mut config = EngineConfig::default();
        let mut errors: Vec<String> = Vec::new();

        if let Some(raw) = lookup("DATA_DIR") {
            config.data_dir = PathBuf::from(raw);
        }
        parse_into(&lookup, "DECAY_RATE", &mut config.decay_rate, &mut errors);
        parse_into(&lookup, "REFLECTION_THRESHOLD", &mut config.reflection_threshold, &mut errors);
        parse_into(&lookup, "CONSOLIDATION_INTERVAL", &mut config.consolidation_interval_ms, &mut errors);
        parse_into(&lookup, "MERGE_SIMILARITY_THRESHOLD", &mut config.merge_similarity_threshold, &mut errors);
        parse_into(&lookup, "PRUNE_AGE_DAYS", &mut config.prune_age_days, &mut errors);
        parse_into(&lookup, "WEIGHT_RECENCY", &mut config.weight_recency, &mut errors);
        parse_into(&lookup, "WEIGHT_IMPORTANCE", &mut config.weight_importance, &mut errors);
        parse_into(&lookup, "WEIGHT_RELEVANCE", &mut config.weight_relevance, &mut errors);
        if let Some(raw) = lookup("EMBEDDING_BASE_URL") {
            config.embedding_base_url = raw;
        }
        if let Some(raw) = lookup("EMBEDDING_MODEL") {
            config.embedding_model = raw;
        }
        parse_into(&lookup, "EMBEDDING_DIMENSIONS", &mut config.embedding_dimensions, &mut errors);
        if let Some(raw) = lookup("ANTHROPIC_API_KEY") {
            if !raw.is_empty() {
                config.anthropic_api_key = Some(raw);
            }
        }
        if let Some(raw) = lookup("LOG_LEVEL") {
            match raw.as_str() {
                "debug" => config.log_level = log::LevelFilter::Debug,
                "info" => config.log_level = log::LevelFilter::Info,
                "warn" => config.log_level = log::LevelFilter::Warn,
                "error" => config.log_level = log::LevelFilter::Error,
                other => errors.push(format!(
                    "LOG_LEVEL must be one of debug/info/warn/error, got {:?}",
                    other
                )),
            }
        }

        config.validate(&mut errors);

        if errors.is_empty() {
            Ok(config)
        } else {
            Err(EngineError::Config(format!(
                "invalid configuration:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }

    /// Append every violated constraint to `errors`. Public so programmatic
    /// overrides can be re-checked before `MemoryEngine::open`.
    pub fn validate(&self, errors: &mut Vec<String>) {
        let dir = self.data_dir.to_string_lossy();
        if dir.is_empty() {
            errors.push("DATA_DIR must not be empty".into());
        }
        if dir.contains('\0') {
            errors.push("DATA_DIR must not contain a NUL byte".into());
        }
        if !(self.decay_rate > 0.0 && self.decay_rate < 1.0) {
            errors.push(format!("DECAY_RATE must be in (0, 1), got {}", self.decay_rate));
        }
        if !(self.reflection_threshold >= 0.0) {
            errors.push(format!(
                "REFLECTION_THRESHOLD must be >= 0, got {}",
                self.reflection_threshold
            ));
        }
        if self.consolidation_interval_ms == 0 {
            errors.push("CONSOLIDATION_INTERVAL must be > 0".into());
        }
        if !(0.0..=1.0).contains(&self.merge_similarity_threshold) {
            errors.push(format!(
                "MERGE_SIMILARITY_THRESHOLD must be in [0, 1], got {}",
                self.merge_similarity_threshold
            ));
        }
        if self.prune_age_days == 0 {
            errors.push("PRUNE_AGE_DAYS must be > 0".into());
        }
        for (key, weight) in [
            ("WEIGHT_RECENCY", self.weight_recency),
            ("WEIGHT_IMPORTANCE", self.weight_importance),
            ("WEIGHT_RELEVANCE", self.weight_relevance),
        ] {
            if !(weight >= 0.0) {
                errors.push(format!("{} must be >= 0, got {}", key, weight));
            }
        }
        if self.embedding_dimensions == 0 {
            errors.push("EMBEDDING_DIMENSIONS must be > 0".into());
        }
    }

    /// Warn once when the score weights do not sum to 1.0. They are used
    /// as given, never normalized.
    pub fn check_weight_sum(&self) {
        let sum = self.weight_recency + self.weight_importance + self.weight_relevance;
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            warn!(
                "[config] score weights sum to {:.3}, not 1.0 — scores will not be normalized",
                sum
            );
        }
    }

    /// Whether a language-model provider can be constructed.
    pub fn llm_enabled(&self) -> bool {
        self.anthropic_api_key.is_some()
    }
}

/// Parse an environment value into `target`, collecting a message on failure.
fn parse_into<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
    errors: &mut Vec<String>,
) {
    if let Some(raw) = lookup(key) {
        match raw.parse::<T>() {
            Ok(value) => *target = value,
            Err(_) => errors.push(format!("{} is not a valid value: {:?}", key, raw)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from<'a>(map: &'a HashMap<&'a str, &'a str>) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| map.get(key).map(|v| v.to_string())
    }

    #[test]
    fn defaults_pass_validation() {
        let config = EngineConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.decay_rate, 0.995);
        assert_eq!(config.embedding_dimensions, 384);
        assert_eq!(config.consolidation_interval_ms, 86_400_000);
        assert!(config.anthropic_api_key.is_none());
    }

    #[test]
    fn reads_overrides() {
        let map = HashMap::from([
            ("DATA_DIR", "/tmp/mnema"),
            ("DECAY_RATE", "0.9"),
            ("REFLECTION_THRESHOLD", "42"),
            ("EMBEDDING_DIMENSIONS", "768"),
            ("LOG_LEVEL", "debug"),
        ]);
        let config = EngineConfig::from_lookup(lookup_from(&map)).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/mnema"));
        assert_eq!(config.decay_rate, 0.9);
        assert_eq!(config.reflection_threshold, 42.0);
        assert_eq!(config.embedding_dimensions, 768);
        assert_eq!(config.log_level, log::LevelFilter::Debug);
    }

    #[test]
    fn collects_every_error() {
        let map = HashMap::from([
            ("DATA_DIR", ""),
            ("DECAY_RATE", "1.5"),
            ("CONSOLIDATION_INTERVAL", "0"),
            ("WEIGHT_RECENCY", "-0.2"),
            ("LOG_LEVEL", "verbose"),
        ]);
        let err = EngineConfig::from_lookup(lookup_from(&map)).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("DATA_DIR"));
        assert!(message.contains("DECAY_RATE"));
        assert!(message.contains("CONSOLIDATION_INTERVAL"));
        assert!(message.contains("WEIGHT_RECENCY"));
        assert!(message.contains("LOG_LEVEL"));
    }

    #[test]
    fn rejects_unparseable_numbers() {
        let map = HashMap::from([("DECAY_RATE", "fast"), ("PRUNE_AGE_DAYS", "-3")]);
        let err = EngineConfig::from_lookup(lookup_from(&map)).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("DECAY_RATE"));
        assert!(message.contains("PRUNE_AGE_DAYS"));
    }

    #[test]
    fn empty_api_key_stays_disabled() {
        let map = HashMap::from([("ANTHROPIC_API_KEY", "")]);
        let config = EngineConfig::from_lookup(lookup_from(&map)).unwrap();
        assert!(!config.llm_enabled());
    }
}
