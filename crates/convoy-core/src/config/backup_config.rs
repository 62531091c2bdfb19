//! Backup configuration. Tiered count-based retention.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Artifact root. Default: `{state_dir}/backups`.
    pub dir: Option<PathBuf>,
    /// Most recent artifacts always kept, per service.
    pub keep_last: u32,
    /// Newest artifact of each of the most recent N days, per service.
    pub keep_daily: u32,
    /// Newest artifact of each of the most recent N ISO weeks, per service.
    pub keep_weekly: u32,
    /// Attempts at staging a snapshot before reporting `BackupFailed`.
    pub staging_attempts: u32,
    /// SQLite backup pages copied per step; the lock heartbeat runs between steps.
    pub pages_per_step: i32,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            dir: None,
            keep_last: 5,
            keep_daily: 7,
            keep_weekly: 4,
            staging_attempts: 2,
            pages_per_step: 256,
        }
    }
}

impl BackupConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.keep_last == 0 {
            return Err(ConfigError::Invalid(
                "backup.keep_last must be >= 1".into(),
            ));
        }
        if self.staging_attempts == 0 {
            return Err(ConfigError::Invalid(
                "backup.staging_attempts must be >= 1".into(),
            ));
        }
        if self.pages_per_step <= 0 {
            return Err(ConfigError::Invalid(
                "backup.pages_per_step must be > 0".into(),
            ));
        }
        Ok(())
    }
}
