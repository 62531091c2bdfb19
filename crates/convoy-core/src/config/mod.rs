pub mod backup_config;
pub mod lock_config;
pub mod logging_config;
pub mod service_config;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use backup_config::BackupConfig;
pub use lock_config::LockConfig;
pub use logging_config::{LogFormat, LoggingConfig};
pub use service_config::{EngineConfig, ServiceConfig};

use crate::errors::ConfigError;

/// Top-level configuration, usually read from `convoy.toml`.
///
/// `services` is the declared dependency order: the orchestrator migrates
/// services in exactly this order and never infers one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvoyConfig {
    /// Directory holding `convoy.db` (audit log, locks, backup registry).
    pub state_dir: PathBuf,
    /// Identity recorded as lock holder and audit actor.
    /// Default: `$USER@pid`.
    pub actor: Option<String>,
    pub lock: LockConfig,
    pub backup: BackupConfig,
    pub logging: LoggingConfig,
    pub services: Vec<ServiceConfig>,
}

impl Default for ConvoyConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(".convoy"),
            actor: None,
            lock: LockConfig::default(),
            backup: BackupConfig::default(),
            logging: LoggingConfig::default(),
            services: Vec::new(),
        }
    }
}

impl ConvoyConfig {
    /// Load config from a TOML string, falling back to defaults for missing fields.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Read, resolve relative paths against the file's directory, and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml(&content)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        config.validate()?;
        Ok(config)
    }

    /// Make every relative path absolute against `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.state_dir);
        if let Some(dir) = self.backup.dir.as_mut() {
            resolve(dir);
        }
        for service in &mut self.services {
            resolve(&mut service.database);
            match &mut service.engine {
                EngineConfig::NumberedSql { migrations_dir } => resolve(migrations_dir),
                EngineConfig::RevisionChain { revisions_file } => resolve(revisions_file),
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.services.is_empty() {
            return Err(ConfigError::Invalid("no services configured".into()));
        }
        let mut seen = HashSet::new();
        for service in &self.services {
            if !service.id.is_valid() {
                return Err(ConfigError::Invalid(format!(
                    "service id '{}' must be non-empty ASCII alphanumerics, '-' or '_'",
                    service.id
                )));
            }
            if !seen.insert(service.id.clone()) {
                return Err(ConfigError::Invalid(format!(
                    "service '{}' declared twice",
                    service.id
                )));
            }
        }
        self.lock.validate()?;
        self.backup.validate()?;
        Ok(())
    }

    pub fn coordinator_db_path(&self) -> PathBuf {
        self.state_dir.join("convoy.db")
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.backup
            .dir
            .clone()
            .unwrap_or_else(|| self.state_dir.join("backups"))
    }

    pub fn effective_actor(&self) -> String {
        self.actor.clone().unwrap_or_else(|| {
            let user = std::env::var("USER")
                .or_else(|_| std::env::var("USERNAME"))
                .unwrap_or_else(|_| "unknown".to_string());
            format!("{user}@{}", std::process::id())
        })
    }
}
