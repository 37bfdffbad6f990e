//! Store configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Migration state store configuration loaded from environment variables.
///
/// Environment variables are prefixed with `HANDOFF_`:
/// - `HANDOFF_DAGS_DIR`: Directory holding the legacy workflow files (default: "dags")
/// - `HANDOFF_WRITE_RETRIES`: Retries for a failed permanent write (default: 3)
/// - `HANDOFF_RETRY_DELAY_MS`: Initial delay between retries (default: 200)
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Directory that contains the `migration_state/` subdirectory
    #[serde(default = "default_dags_dir")]
    pub dags_dir: PathBuf,

    /// Retries for a failed permanent write
    #[serde(default = "default_write_retries")]
    pub write_retries: u32,

    /// Initial delay between write retries in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_dags_dir() -> PathBuf {
    PathBuf::from("dags")
}

fn default_write_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    200
}

impl StoreConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables are prefixed with `HANDOFF_`.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("HANDOFF_").from_env::<StoreConfig>()
    }

    /// Retry policy for permanent writes.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.write_retries,
            initial_delay_ms: self.retry_delay_ms,
            ..RetryPolicy::default()
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dags_dir: default_dags_dir(),
            write_retries: default_write_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

/// Retry configuration for persisting migration state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    #[serde(default = "default_write_retries")]
    pub max_retries: u32,

    /// Initial delay between retries in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Exponential backoff multiplier.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_delay_ms() -> u64 {
    5000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let delay = (self.initial_delay_ms as f64 * factor).min(self.max_delay_ms as f64);
        Duration::from_millis(delay as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_write_retries(),
            initial_delay_ms: default_retry_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}
