//! Configuration for the consolidation service.
//!
//! Values come from (in order of precedence, lowest first): built-in
//! defaults, an optional TOML file, then `TSDB_*` environment variables.

use crate::error::ConfigError;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConsolidationConfig {
    /// Age after which consolidated raw records may be deleted
    pub raw_retention_hours: i64,
    /// Catch-up stops this far behind "now"
    pub catch_up_lag_hours: i64,
    /// Maximum number of historical periods consolidated per invocation
    pub max_catch_up_periods: usize,
    /// Sleep after an unhandled error in the scheduler loop
    pub error_backoff_secs: u64,
    /// Run one last consolidation pass when the scheduler is stopped
    pub run_final_pass_on_stop: bool,
    /// Written into `updated_by` on every node this service writes
    pub updated_by: String,
    pub compression: CompressionConfig,
    pub rollup: RollupConfig,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            raw_retention_hours: 24,
            catch_up_lag_hours: 24,
            max_catch_up_periods: 20,
            error_backoff_secs: 300,
            run_final_pass_on_stop: true,
            updated_by: "tsdb_consolidation".to_string(),
            compression: CompressionConfig::default(),
            rollup: RollupConfig::default(),
        }
    }
}

/// Profound consolidation (in-place summary compression)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CompressionConfig {
    /// Only daily summaries older than this are compressed
    pub compression_age_days: i64,
    /// Skip compression while the average daily footprint is below this
    pub target_mb_per_day: f64,
    /// A metric is significant if its count exceeds this...
    pub significance_min_count: u64,
    /// ...or its sum exceeds this
    pub significance_min_sum: f64,
    pub max_display_name_len: usize,
    /// Basic summaries covered by a daily rollup older than this are removed
    pub basic_cleanup_age_days: i64,
    /// Decimal places kept when rounding
    pub value_precision: u32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            compression_age_days: 30,
            target_mb_per_day: 1.0,
            significance_min_count: 10,
            significance_min_sum: 100.0,
            max_display_name_len: 20,
            basic_cleanup_age_days: 30,
            value_precision: 2,
        }
    }
}

/// Extensive consolidation (daily rollups)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RollupConfig {
    pub enabled: bool,
    /// A day is rolled up once it ended at least this long ago
    pub rollup_lag_hours: i64,
    pub max_days_per_run: usize,
}

impl Default for RollupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rollup_lag_hours: 24,
            max_days_per_run: 14,
        }
    }
}

impl ConsolidationConfig {
    /// Load from a TOML file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)?;
                toml::from_str::<ConsolidationConfig>(&content)?
            }
            None => ConsolidationConfig::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(v) = env_parse::<i64>("TSDB_RAW_RETENTION_HOURS")? {
            self.raw_retention_hours = v;
        }
        if let Some(v) = env_parse::<usize>("TSDB_MAX_CATCH_UP_PERIODS")? {
            self.max_catch_up_periods = v;
        }
        if let Some(v) = env_parse::<f64>("TSDB_TARGET_MB_PER_DAY")? {
            self.compression.target_mb_per_day = v;
        }
        if let Some(v) = env_parse::<u64>("TSDB_ERROR_BACKOFF_SECS")? {
            self.error_backoff_secs = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.raw_retention_hours <= 0 {
            return Err(ConfigError::Invalid {
                field: "raw_retention_hours",
                reason: "must be positive".to_string(),
            });
        }
        if self.catch_up_lag_hours < 0 {
            return Err(ConfigError::Invalid {
                field: "catch_up_lag_hours",
                reason: "must not be negative".to_string(),
            });
        }
        if self.max_catch_up_periods == 0 {
            return Err(ConfigError::Invalid {
                field: "max_catch_up_periods",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.compression.target_mb_per_day < 0.0 {
            return Err(ConfigError::Invalid {
                field: "compression.target_mb_per_day",
                reason: "must not be negative".to_string(),
            });
        }
        if self.compression.compression_age_days < 0 || self.compression.basic_cleanup_age_days < 0
        {
            return Err(ConfigError::Invalid {
                field: "compression",
                reason: "ages must not be negative".to_string(),
            });
        }
        Ok(())
    }

    pub fn raw_retention(&self) -> Duration {
        Duration::hours(self.raw_retention_hours)
    }

    pub fn catch_up_lag(&self) -> Duration {
        Duration::hours(self.catch_up_lag_hours)
    }

    pub fn error_backoff(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.error_backoff_secs)
    }
}

fn env_parse<T: std::str::FromStr>(key: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid {
                field: key,
                reason: format!("cannot parse '{}'", raw),
            }),
        Err(_) => Ok(None),
    }
}
