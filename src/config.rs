//! Runtime and uploader tuning.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Invalid configuration values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A bound or count was zero.
    #[error("{field} must be greater than zero")]
    Zero {
        /// Offending field.
        field: &'static str,
    },
    /// The backoff cap is below the base delay.
    #[error("backoff_max_ms ({max}) is below backoff_base_ms ({base})")]
    BackoffRange {
        /// Configured `backoff_base_ms`.
        base: u64,
        /// Configured `backoff_max_ms`.
        max: u64,
    },
}

/// Cache actor settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Bound of the request channel into the actor.
    pub command_queue_bound: usize,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            command_queue_bound: 256,
            event_capacity: 1024,
        }
    }
}

impl CacheConfig {
    /// Rejects zero-sized channels.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.command_queue_bound == 0 {
            return Err(ConfigError::Zero {
                field: "command_queue_bound",
            });
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Zero {
                field: "event_capacity",
            });
        }
        Ok(())
    }
}

/// Uploader retry policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploaderConfig {
    /// Transient failures tolerated before a command is rolled back.
    pub max_attempts: u32,
    /// First retry delay for non-connectivity transient failures.
    pub backoff_base_ms: u64,
    /// Upper bound for the retry delay.
    pub backoff_max_ms: u64,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
        }
    }
}

impl UploaderConfig {
    /// Rejects a zero attempt limit and an inverted backoff range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Zero {
                field: "max_attempts",
            });
        }
        if self.backoff_max_ms < self.backoff_base_ms {
            return Err(ConfigError::BackoffRange {
                base: self.backoff_base_ms,
                max: self.backoff_max_ms,
            });
        }
        Ok(())
    }

    /// Delay before retry number `attempts` (1-based), doubling each time.
    pub fn backoff_ms(&self, attempts: u32) -> u64 {
        let shift = attempts.saturating_sub(1).min(32);
        self.backoff_base_ms
            .saturating_mul(1u64 << shift)
            .min(self.backoff_max_ms)
    }
}
