//! Assembling an orchestrator from config, from code, or both.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::info;

use convoy_core::config::{BackupConfig, LockConfig, ServiceConfig};
use convoy_core::errors::{ConfigError, OrchestratorResult};
use convoy_core::traits::{Clock, ServiceAdapter, SystemClock};
use convoy_core::ConvoyConfig;

use crate::adapters::adapter_from_config;
use crate::audit::AuditLog;
use crate::backup::BackupManager;
use crate::coordinator_db::CoordinatorDb;
use crate::lock::LockManager;

use super::notifier::{LogNotifier, RunNotifier};
use super::{CancelHandle, Orchestrator};

/// A configured service (adapter built at `build()` with the final clock)
/// or a ready-made adapter.
enum ServiceEntry {
    Configured(ServiceConfig),
    Provided(Arc<dyn ServiceAdapter>),
}

pub struct OrchestratorBuilder {
    coordinator_db: PathBuf,
    backup_dir: PathBuf,
    actor: String,
    lock: LockConfig,
    backup: BackupConfig,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn RunNotifier>,
    services: Vec<ServiceEntry>,
}

impl OrchestratorBuilder {
    /// Coordinator state under `state_dir`: `convoy.db` and `backups/`.
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        let state_dir = state_dir.as_ref();
        let defaults = ConvoyConfig::default();
        Self {
            coordinator_db: state_dir.join("convoy.db"),
            backup_dir: state_dir.join("backups"),
            actor: defaults.effective_actor(),
            lock: defaults.lock,
            backup: defaults.backup,
            clock: Arc::new(SystemClock),
            notifier: Arc::new(LogNotifier),
            services: Vec::new(),
        }
    }

    pub fn from_config(config: &ConvoyConfig) -> Self {
        let mut builder = Self::new(&config.state_dir)
            .actor(config.effective_actor())
            .lock_config(config.lock.clone())
            .backup_config(config.backup.clone())
            .backup_dir(config.backup_dir());
        builder.coordinator_db = config.coordinator_db_path();
        builder.services = config
            .services
            .iter()
            .cloned()
            .map(ServiceEntry::Configured)
            .collect();
        builder
    }

    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    pub fn lock_config(mut self, lock: LockConfig) -> Self {
        self.lock = lock;
        self
    }

    pub fn backup_config(mut self, backup: BackupConfig) -> Self {
        self.backup = backup;
        self
    }

    pub fn backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = dir.into();
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn RunNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Append a service after those already declared.
    pub fn service(mut self, config: ServiceConfig) -> Self {
        self.services.push(ServiceEntry::Configured(config));
        self
    }

    /// Append a ready-made adapter after those already declared.
    pub fn adapter(mut self, adapter: Arc<dyn ServiceAdapter>) -> Self {
        self.services.push(ServiceEntry::Provided(adapter));
        self
    }

    pub fn build(self) -> OrchestratorResult<Orchestrator> {
        self.lock.validate()?;
        self.backup.validate()?;

        let mut adapters: Vec<Arc<dyn ServiceAdapter>> = Vec::with_capacity(self.services.len());
        for entry in self.services {
            adapters.push(match entry {
                ServiceEntry::Configured(config) => adapter_from_config(&config, self.clock.clone())?,
                ServiceEntry::Provided(adapter) => adapter,
            });
        }

        let mut index = FxHashMap::default();
        for (i, adapter) in adapters.iter().enumerate() {
            let id = adapter.service_id();
            if !id.is_valid() {
                return Err(ConfigError::Invalid(format!("invalid service id '{id}'")).into());
            }
            if index.insert(id.clone(), i).is_some() {
                return Err(ConfigError::Invalid(format!("service '{id}' declared twice")).into());
            }
        }

        let db = CoordinatorDb::open(&self.coordinator_db)?;
        info!(
            coordinator_db = %db.path().display(),
            services = adapters.len(),
            actor = %self.actor,
            "Orchestrator ready"
        );

        Ok(Orchestrator {
            locks: LockManager::new(db.clone(), self.clock.clone(), self.actor.clone()),
            backups: BackupManager::new(
                db.clone(),
                self.backup_dir,
                self.backup,
                self.clock.clone(),
            ),
            audit: AuditLog::new(db, self.clock.clone()),
            adapters,
            index,
            clock: self.clock,
            actor: self.actor,
            lock_config: self.lock,
            notifier: self.notifier,
            cancel: CancelHandle::default(),
        })
    }
}
