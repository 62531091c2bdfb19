//! # convoy-orchestrator
//!
//! Coordinates schema migrations across services that each own a SQLite
//! database. Per service: take the lock, snapshot the database, apply the
//! pending revisions through the engine's adapter, verify, release.
//! Everything observable lands in an append-only audit log.
//!
//! Coordinator state (audit log, locks, backup registry) lives in one
//! SQLite file, `convoy.db`, opened connection-per-call.

pub mod adapters;
pub mod audit;
pub mod backup;
pub mod coordinator_db;
pub mod lock;
pub mod orchestrator;

pub use adapters::{adapter_from_config, NumberedSqlAdapter, RevisionChain, RevisionChainAdapter};
pub use audit::AuditLog;
pub use backup::{BackupManager, PruneReport};
pub use coordinator_db::CoordinatorDb;
pub use lock::{LockGrant, LockManager};
pub use orchestrator::{
    CancelHandle, LogNotifier, Orchestrator, OrchestratorBuilder, OverallStatus, RunError,
    RunKind, RunNotifier, RunReport, ServiceReport, ServiceState, ServiceStatus, StatusReport,
};
