use crate::errors::{RemedyError, RemedyResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level pipeline configuration. Defaults are production-safe; a JSON
/// file and `REMEDY_*` environment variables layer on top.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RemedyConfig {
    pub crawler: CrawlerConfig,
    pub generator: GeneratorConfig,
    pub verifier: VerifierConfig,
    pub monitor: MonitorConfig,
    pub learning: LearningConfig,
    pub queue: QueueConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Maximum concurrent file scans; 0 means "available parallelism".
    pub max_concurrency: usize,
    /// Upper bound on files taken from the frontier per crawl batch.
    pub batch_limit: usize,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 0,
            batch_limit: 256,
        }
    }
}

impl CrawlerConfig {
    pub fn effective_concurrency(&self) -> usize {
        if self.max_concurrency == 0 {
            num_cpus::get()
        } else {
            self.max_concurrency
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// First candidate at or above this confidence is accepted outright.
    pub acceptance_floor: f64,
    /// Weight of strategy-intrinsic certainty in the confidence blend; the
    /// remainder comes from domain expertise.
    pub intrinsic_blend: f64,
    pub provider_max_retries: u32,
    pub provider_timeout_secs: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            acceptance_floor: 0.75,
            intrinsic_blend: 0.7,
            provider_max_retries: 3,
            provider_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    /// Per-stage budget; a stage exceeding it counts as failed.
    pub stage_timeout_secs: u64,
    /// Grace period before a passed application's snapshot is discarded.
    pub snapshot_grace_secs: u64,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            stage_timeout_secs: 120,
            snapshot_grace_secs: 60,
        }
    }
}

/// What a silent observation window resolves to. Defaulting to success is
/// a policy choice with real risk under silent failures, so it is
/// configurable rather than hard-coded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SilentWindowOutcome {
    ProductionSuccess,
    ProductionIssues,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub window_secs: u64,
    pub default_outcome: SilentWindowOutcome,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            window_secs: 300,
            default_outcome: SilentWindowOutcome::ProductionSuccess,
        }
    }
}

impl MonitorConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    /// Base step for a bench outcome; production outcomes scale it.
    pub base_step: f64,
    /// Production outcomes weigh heavier than bench outcomes.
    pub production_multiplier: f64,
    /// Cap on one update as a fraction of remaining headroom.
    pub max_step_fraction: f64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            base_step: 0.05,
            production_multiplier: 1.5,
            max_step_fraction: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub max_retries: u32,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    pub workers: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_initial_ms: 100,
            backoff_max_ms: 30_000,
            workers: 0,
        }
    }
}

impl QueueConfig {
    pub fn effective_workers(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get()
        } else {
            self.workers
        }
    }
}

impl RemedyConfig {
    /// Load from a JSON file, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> RemedyResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let mut config: RemedyConfig = serde_json::from_str(&text)
            .map_err(|e| RemedyError::Configuration(format!("parse {:?}: {e}", path.as_ref())))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse::<usize>("REMEDY_CRAWLER_CONCURRENCY") {
            self.crawler.max_concurrency = v;
        }
        if let Some(v) = env_parse::<f64>("REMEDY_ACCEPTANCE_FLOOR") {
            self.generator.acceptance_floor = v;
        }
        if let Some(v) = env_parse::<u64>("REMEDY_MONITOR_WINDOW_SECS") {
            self.monitor.window_secs = v;
        }
        if let Some(v) = env_parse::<u32>("REMEDY_QUEUE_MAX_RETRIES") {
            self.queue.max_retries = v;
        }
    }

    pub fn validate(&self) -> RemedyResult<()> {
        if !(0.0..=1.0).contains(&self.generator.acceptance_floor) {
            return Err(RemedyError::Configuration(
                "generator.acceptance_floor must be in [0, 1]".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.generator.intrinsic_blend) {
            return Err(RemedyError::Configuration(
                "generator.intrinsic_blend must be in [0, 1]".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.learning.max_step_fraction) {
            return Err(RemedyError::Configuration(
                "learning.max_step_fraction must be in [0, 1]".into(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_validate() {
        RemedyConfig::default().validate().expect("defaults valid");
    }

    #[test]
    fn load_from_json_file() {
        let mut f = tempfile::NamedTempFile::new().expect("tempfile");
        write!(
            f,
            r#"{{"generator": {{"acceptance_floor": 0.9}}, "monitor": {{"window_secs": 10, "default_outcome": "production-issues"}}}}"#
        )
        .expect("write");
        let config = RemedyConfig::load(f.path()).expect("load");
        assert_eq!(config.generator.acceptance_floor, 0.9);
        assert_eq!(config.monitor.window_secs, 10);
        assert_eq!(
            config.monitor.default_outcome,
            SilentWindowOutcome::ProductionIssues
        );
        // Untouched sections keep defaults
        assert_eq!(config.queue.max_retries, 5);
    }

    #[test]
    fn invalid_floor_rejected() {
        let config = RemedyConfig {
            generator: GeneratorConfig {
                acceptance_floor: 1.5,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
