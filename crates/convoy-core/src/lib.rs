//! # convoy-core
//!
//! Foundation crate for the convoy migration coordinator.
//! Defines the domain types, the `ServiceAdapter` contract, errors, config
//! and tracing setup. Every other crate in the workspace depends on this.

pub mod config;
pub mod errors;
pub mod tracing;
pub mod traits;
pub mod types;

// Re-export the most commonly used types at the crate root.
pub use config::ConvoyConfig;
pub use errors::error_code::ConvoyErrorCode;
pub use errors::{
    AdapterError, AdapterResult, AuditError, AuditResult, BackupError, BackupResult,
    ConfigError, LockError, LockResult, OrchestratorError, OrchestratorResult,
};
pub use traits::{Clock, ManualClock, ServiceAdapter, SystemClock};
pub use types::{
    AdapterStatus, AuditEntry, AuditOperation, AuditOutcome, BackupArtifact, Consistency,
    LockInfo, LockToken, MigrationPlan, MigrationRecord, NewAuditEntry, PlanStep, RevisionId,
    RunId, ServiceId,
};
