//! Configuration for the ranking engine

use crate::error::{RankingError, Result};
use crate::partition::CurrentValuePolicy;
use crate::scoring::MissingDrillPolicy;
use crate::{DEFAULT_DEGENERATE_SCORE, DEFAULT_MIN_PARTITION_SAMPLES, DEFAULT_RECOMPUTE_TIMEOUT_MS};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level ranking engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingConfig {
    /// Sport template used for events that were never assigned a schema
    pub default_sport: String,

    pub scoring: ScoringConfig,

    pub cache: CacheConfig,
}

/// Statistics and scoring policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Below this many samples an age-group partition widens to the whole event
    pub min_partition_samples: usize,

    /// Score given to a drill whose statistics are degenerate
    pub degenerate_score: f64,

    /// Which per-player value feeds the partition statistics
    pub current_value: CurrentValuePolicy,

    /// How a weighted drill without attempts affects the composite
    pub missing_drill: MissingDrillPolicy,
}

/// Ranking cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// How long a reader waits for an in-flight recompute before serving stale data
    pub recompute_timeout_ms: u64,

    /// Precompute the default-weight ranking table on every recompute
    pub precompute_default_scores: bool,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            default_sport: "football".to_string(),
            scoring: ScoringConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            min_partition_samples: DEFAULT_MIN_PARTITION_SAMPLES,
            degenerate_score: DEFAULT_DEGENERATE_SCORE,
            current_value: CurrentValuePolicy::Mean,
            missing_drill: MissingDrillPolicy::ScoreZero,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { recompute_timeout_ms: DEFAULT_RECOMPUTE_TIMEOUT_MS, precompute_default_scores: true }
    }
}

impl CacheConfig {
    pub fn recompute_timeout(&self) -> Duration {
        Duration::from_millis(self.recompute_timeout_ms)
    }
}

impl RankingConfig {
    /// Load configuration from TOML file
    pub fn load_from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RankingError::config(format!("reading {path}: {e}")))?;
        let config: RankingConfig =
            toml::from_str(&content).map_err(|e| RankingError::config(e.to_string()))?;
        config.validate().map_err(RankingError::config)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file(&self, path: &str) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| RankingError::config(e.to_string()))?;
        std::fs::write(path, content)
            .map_err(|e| RankingError::config(format!("writing {path}: {e}")))?;
        Ok(())
    }

    /// Defaults overridden by `RANKING_*` environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Apply `RANKING_*` environment overrides on top of this configuration
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(sport) = std::env::var("RANKING_DEFAULT_SPORT") {
            self.default_sport = sport;
        }

        if let Ok(samples) = std::env::var("RANKING_MIN_PARTITION_SAMPLES") {
            self.scoring.min_partition_samples = samples.parse().map_err(|_| {
                RankingError::config(format!("RANKING_MIN_PARTITION_SAMPLES: bad value {samples}"))
            })?;
        }

        if let Ok(policy) = std::env::var("RANKING_CURRENT_VALUE") {
            self.scoring.current_value = match policy.to_ascii_lowercase().as_str() {
                "mean" => CurrentValuePolicy::Mean,
                "latest" => CurrentValuePolicy::Latest,
                other => {
                    return Err(RankingError::config(format!("RANKING_CURRENT_VALUE: {other}")))
                }
            };
        }

        if let Ok(policy) = std::env::var("RANKING_MISSING_DRILL") {
            self.scoring.missing_drill = match policy.to_ascii_lowercase().as_str() {
                "score_zero" | "zero" => MissingDrillPolicy::ScoreZero,
                "exclude" => MissingDrillPolicy::Exclude,
                other => {
                    return Err(RankingError::config(format!("RANKING_MISSING_DRILL: {other}")))
                }
            };
        }

        if let Ok(timeout) = std::env::var("RANKING_RECOMPUTE_TIMEOUT_MS") {
            self.cache.recompute_timeout_ms = timeout.parse().map_err(|_| {
                RankingError::config(format!("RANKING_RECOMPUTE_TIMEOUT_MS: bad value {timeout}"))
            })?;
        }

        self.validate().map_err(RankingError::config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.default_sport.trim().is_empty() {
            return Err("default_sport must not be empty".to_string());
        }

        if self.scoring.min_partition_samples == 0 {
            return Err("min_partition_samples must be at least 1".to_string());
        }

        if !(0.0..=100.0).contains(&self.scoring.degenerate_score) {
            return Err("degenerate_score must be within 0..=100".to_string());
        }

        if self.cache.recompute_timeout_ms == 0 {
            return Err("recompute_timeout_ms must be greater than 0".to_string());
        }

        Ok(())
    }
}
