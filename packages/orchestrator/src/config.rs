//! Orchestrator configuration.
//!
//! Every field has a default, so an empty TOML document (or no file at all)
//! yields a working configuration. Durations are stored as milliseconds.
//!
//! ```toml
//! walk_limit = 20
//! fetch_timeout_ms = 30000
//! max_concurrent_fetches = 5
//!
//! [schedule]
//! immediate_count = 100
//! stagger_interval_ms = 1000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid TOML for this schema.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Tuning for the fetch orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Maximum pages visited by the metadata walk.
    pub walk_limit: u32,
    /// Page count assumed when the metadata walk fails.
    pub fallback_total_pages: u32,
    /// Items per page assumed when the metadata walk fails.
    pub fallback_items_per_page: u32,
    /// Items per page used for offset arithmetic when the metadata reports
    /// a minimum of zero.
    pub default_items_per_page: u32,
    /// Timeout for a single upstream page fetch.
    pub fetch_timeout_ms: u64,
    /// Timeout for a whole bulk batch before it degrades to per-item
    /// fetches.
    pub bulk_timeout_ms: u64,
    /// Timeout for an enrichment lookup.
    pub enrich_timeout_ms: u64,
    /// Maximum simultaneous upstream requests.
    pub max_concurrent_fetches: usize,
    /// Maximum pages held in the cache; `None` keeps every page.
    pub max_cached_pages: Option<usize>,
    /// Furthest page the resolver probes when the walk did not reach the
    /// true end.
    pub max_page_horizon: u32,
    /// Failed pages in a row after which the resolver stops extending a
    /// range.
    pub max_consecutive_failures: u32,
    /// Largest count served by the random small-subset strategy.
    pub small_subset_max: u64,
    /// Largest count accepted by item requests.
    pub max_request_count: u64,
    /// Largest limit accepted by range requests.
    pub max_range_limit: u64,
    /// Largest offset accepted by range requests.
    pub max_offset: u64,
    /// Tiered scheduling for large selections.
    pub schedule: ScheduleConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            walk_limit: 20,
            fallback_total_pages: 10,
            fallback_items_per_page: 10,
            default_items_per_page: 10,
            fetch_timeout_ms: 30_000,
            bulk_timeout_ms: 120_000,
            enrich_timeout_ms: 5_000,
            max_concurrent_fetches: 5,
            max_cached_pages: None,
            max_page_horizon: 1_000,
            max_consecutive_failures: 3,
            small_subset_max: 50,
            max_request_count: 10_000,
            max_range_limit: 1_000,
            max_offset: 1_000_000,
            schedule: ScheduleConfig::default(),
        }
    }
}

/// Tiered scheduling for large client selections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Positions fetched immediately.
    pub immediate_count: u64,
    /// Largest remainder served by the staggered schedule; anything larger
    /// switches to virtual scrolling.
    pub staggered_max: u64,
    /// Positions per follow-up batch.
    pub batch_size: u64,
    /// Spacing between staggered batches.
    pub stagger_interval_ms: u64,
    /// Minimum spacing between accepted scroll signals.
    pub scroll_debounce_ms: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            immediate_count: 100,
            staggered_max: 500,
            batch_size: 100,
            stagger_interval_ms: 1_000,
            scroll_debounce_ms: 500,
        }
    }
}

impl ScheduleConfig {
    /// Spacing between staggered batches.
    #[must_use]
    pub const fn stagger_interval(&self) -> Duration {
        Duration::from_millis(self.stagger_interval_ms)
    }

    /// Minimum spacing between accepted scroll signals.
    #[must_use]
    pub const fn scroll_debounce(&self) -> Duration {
        Duration::from_millis(self.scroll_debounce_ms)
    }
}

impl OrchestratorConfig {
    /// Parses a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the text is not valid TOML for this
    /// schema or a value is out of range.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        log::info!("Loaded orchestrator config from {}", path.display());
        Ok(config)
    }

    /// Checks values that would make the orchestrator misbehave.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            (self.walk_limit == 0, "walk_limit must be at least 1"),
            (
                self.default_items_per_page == 0,
                "default_items_per_page must be at least 1",
            ),
            (
                self.fallback_total_pages == 0,
                "fallback_total_pages must be at least 1",
            ),
            (
                self.max_concurrent_fetches == 0,
                "max_concurrent_fetches must be at least 1",
            ),
            (
                self.max_cached_pages == Some(0),
                "max_cached_pages must be at least 1 when set",
            ),
            (self.max_range_limit == 0, "max_range_limit must be at least 1"),
            (
                self.max_consecutive_failures == 0,
                "max_consecutive_failures must be at least 1",
            ),
            (
                self.max_request_count == 0,
                "max_request_count must be at least 1",
            ),
            (
                self.schedule.batch_size == 0,
                "schedule.batch_size must be at least 1",
            ),
        ];

        match checks.iter().find(|(bad, _)| *bad) {
            Some((_, message)) => Err(ConfigError::Invalid((*message).to_owned())),
            None => Ok(()),
        }
    }

    /// Timeout for a single upstream page fetch.
    #[must_use]
    pub const fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    /// Timeout for a whole bulk batch.
    #[must_use]
    pub const fn bulk_timeout(&self) -> Duration {
        Duration::from_millis(self.bulk_timeout_ms)
    }

    /// Timeout for an enrichment lookup.
    #[must_use]
    pub const fn enrich_timeout(&self) -> Duration {
        Duration::from_millis(self.enrich_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = OrchestratorConfig::from_toml_str("").unwrap();
        assert_eq!(config, OrchestratorConfig::default());
        assert_eq!(config.fetch_timeout(), Duration::from_secs(30));
        assert_eq!(config.schedule.scroll_debounce(), Duration::from_millis(500));
    }

    #[test]
    fn partial_document_overrides_fields() {
        let config = OrchestratorConfig::from_toml_str(
            "walk_limit = 5\nmax_cached_pages = 8\n\n[schedule]\nbatch_size = 25\n",
        )
        .unwrap();
        assert_eq!(config.walk_limit, 5);
        assert_eq!(config.max_cached_pages, Some(8));
        assert_eq!(config.schedule.batch_size, 25);
        assert_eq!(config.schedule.immediate_count, 100);
    }

    #[test]
    fn rejects_zero_batch_size() {
        let err = OrchestratorConfig::from_toml_str("[schedule]\nbatch_size = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_zero_failure_budget() {
        let err = OrchestratorConfig::from_toml_str("max_consecutive_failures = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_unknown_types() {
        let err = OrchestratorConfig::from_toml_str("walk_limit = \"many\"").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }
}
