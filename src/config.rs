//! Tunables for the scheduler, the pipeline and the tick loop.
//!
//! Every field has a default. Values can be deserialized (durations as whole
//! seconds) or read from `SYNCFLOW_*` environment variables.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ENV_TIME_BUDGET: &str = "SYNCFLOW_TIME_BUDGET_SECS";
pub const ENV_MAX_TRANSIENT_FAILURES: &str = "SYNCFLOW_MAX_TRANSIENT_FAILURES";
pub const ENV_STALE_AFTER: &str = "SYNCFLOW_STALE_AFTER_SECS";
pub const ENV_RUN_INTERVAL: &str = "SYNCFLOW_RUN_INTERVAL_SECS";
pub const ENV_OVERDUE_AFTER: &str = "SYNCFLOW_OVERDUE_AFTER_SECS";
pub const ENV_TICK_INTERVAL: &str = "SYNCFLOW_TICK_INTERVAL_SECS";

const ENV_KEYS: [&str; 6] = [
    ENV_TIME_BUDGET,
    ENV_MAX_TRANSIENT_FAILURES,
    ENV_STALE_AFTER,
    ENV_RUN_INTERVAL,
    ENV_OVERDUE_AFTER,
    ENV_TICK_INTERVAL,
];

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid {key}='{value}': expected a non-negative integer")]
    InvalidNumber { key: &'static str, value: String },

    #[error("{key} must be greater than zero")]
    Zero { key: &'static str },
}

/// Scheduling and watchdog settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// A `Running`/`Paused` task untouched for longer than this is reclaimed.
    #[serde(with = "secs")]
    pub stale_after: Duration,
    /// Minimum gap between the start of two `Normal` runs of a type.
    #[serde(with = "secs")]
    pub run_interval: Duration,
    /// Without a finished run for this long a type is reported overdue.
    #[serde(with = "secs")]
    pub overdue_after: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(10 * 60),
            run_interval: Duration::from_secs(20 * 60),
            overdue_after: Duration::from_secs(6 * 60 * 60),
        }
    }
}

/// Per-slice limits of the import pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Wall-clock budget of one slice.
    #[serde(with = "secs")]
    pub time_budget: Duration,
    /// Consecutive slices ending on a transient error before the run fails.
    pub max_transient_failures: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            time_budget: Duration::from_secs(25),
            max_transient_failures: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub scheduler: SchedulerConfig,
    pub pipeline: PipelineConfig,
    /// Period of the in-process [`TickLoop`](crate::TickLoop).
    #[serde(with = "secs")]
    pub tick_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            pipeline: PipelineConfig::default(),
            tick_interval: Duration::from_secs(60),
        }
    }
}

impl SyncConfig {
    /// Defaults overridden by whichever `SYNCFLOW_*` variables are set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut envs = HashMap::new();
        for key in ENV_KEYS {
            if let Ok(value) = std::env::var(key) {
                envs.insert(key.to_string(), value);
            }
        }
        Self::from_env_map(&envs)
    }

    pub fn from_env_map(envs: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(v) = read_u64(envs, ENV_TIME_BUDGET)? {
            config.pipeline.time_budget = positive_secs(ENV_TIME_BUDGET, v)?;
        }
        if let Some(v) = read_u64(envs, ENV_MAX_TRANSIENT_FAILURES)? {
            config.pipeline.max_transient_failures =
                u32::try_from(v).map_err(|_| ConfigError::InvalidNumber {
                    key: ENV_MAX_TRANSIENT_FAILURES,
                    value: v.to_string(),
                })?;
        }
        if let Some(v) = read_u64(envs, ENV_STALE_AFTER)? {
            config.scheduler.stale_after = positive_secs(ENV_STALE_AFTER, v)?;
        }
        if let Some(v) = read_u64(envs, ENV_RUN_INTERVAL)? {
            config.scheduler.run_interval = Duration::from_secs(v);
        }
        if let Some(v) = read_u64(envs, ENV_OVERDUE_AFTER)? {
            config.scheduler.overdue_after = positive_secs(ENV_OVERDUE_AFTER, v)?;
        }
        if let Some(v) = read_u64(envs, ENV_TICK_INTERVAL)? {
            config.tick_interval = positive_secs(ENV_TICK_INTERVAL, v)?;
        }

        Ok(config)
    }
}

fn read_u64(envs: &HashMap<String, String>, key: &'static str) -> Result<Option<u64>, ConfigError> {
    let Some(raw) = envs.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    raw.parse::<u64>()
        .map(Some)
        .map_err(|_| ConfigError::InvalidNumber {
            key,
            value: raw.to_string(),
        })
}

fn positive_secs(key: &'static str, value: u64) -> Result<Duration, ConfigError> {
    if value == 0 {
        return Err(ConfigError::Zero { key });
    }
    Ok(Duration::from_secs(value))
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
