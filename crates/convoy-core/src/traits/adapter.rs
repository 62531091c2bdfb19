//! `ServiceAdapter`: the uniform contract over one migration engine.
//!
//! Each adapter exclusively owns its service's database connection and
//! migration-state tables. The orchestrator only ever talks to the service
//! through this trait, which keeps it testable with fakes.

use std::path::Path;
use std::sync::Arc;

use crate::errors::AdapterResult;
use crate::types::{AdapterStatus, MigrationRecord, ServiceId};

pub trait ServiceAdapter: Send + Sync {
    fn service_id(&self) -> &ServiceId;

    /// Engine family label (`numbered_sql`, `revision_chain`, ...).
    fn engine(&self) -> &'static str;

    /// Database file the backup manager snapshots before any mutation.
    fn backup_source(&self) -> &Path;

    /// Read-only. Safe to call without holding the service lock.
    fn status(&self) -> AdapterResult<AdapterStatus>;

    /// Apply exactly one pending revision, the next in order.
    fn apply_next(&self) -> AdapterResult<MigrationRecord>;

    /// Revert the head revision with its backward action.
    fn rollback_last(&self) -> AdapterResult<MigrationRecord>;
}

// ─── Arc blanket impl ───────────────────────────────────────────────

impl<T: ServiceAdapter + ?Sized> ServiceAdapter for Arc<T> {
    fn service_id(&self) -> &ServiceId {
        (**self).service_id()
    }
    fn engine(&self) -> &'static str {
        (**self).engine()
    }
    fn backup_source(&self) -> &Path {
        (**self).backup_source()
    }
    fn status(&self) -> AdapterResult<AdapterStatus> {
        (**self).status()
    }
    fn apply_next(&self) -> AdapterResult<MigrationRecord> {
        (**self).apply_next()
    }
    fn rollback_last(&self) -> AdapterResult<MigrationRecord> {
        (**self).rollback_last()
    }
}
