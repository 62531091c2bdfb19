//! Domain types shared by the orchestrator, the adapters and their callers.

mod artifact;
mod audit;
mod ids;
mod lock;
mod plan;
mod record;
pub mod time;

pub use artifact::BackupArtifact;
pub use audit::{AuditEntry, AuditOperation, AuditOutcome, NewAuditEntry};
pub use ids::{display_revision, RevisionId, RunId, ServiceId};
pub use lock::{LockInfo, LockToken};
pub use plan::{MigrationPlan, PlanStep};
pub use record::{AdapterStatus, Consistency, MigrationRecord};
