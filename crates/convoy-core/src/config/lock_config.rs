//! Lock manager configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Seconds before an unreleased lock is treated as abandoned.
    pub ttl_secs: u64,
    /// Acquisition attempts per service. 1 = fail fast on the first `LockHeld`.
    pub acquire_attempts: u32,
    /// Pause between acquisition attempts.
    pub retry_delay_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 600,
            acquire_attempts: 1,
            retry_delay_ms: 250,
        }
    }
}

impl LockConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ttl_secs == 0 {
            return Err(ConfigError::Invalid("lock.ttl_secs must be > 0".into()));
        }
        if self.acquire_attempts == 0 {
            return Err(ConfigError::Invalid(
                "lock.acquire_attempts must be >= 1".into(),
            ));
        }
        Ok(())
    }
}
