//! Error taxonomy. One enum per subsystem, folded into `OrchestratorError`.

mod adapter_error;
mod audit_error;
mod backup_error;
mod config_error;
pub mod error_code;
mod lock_error;
mod orchestrator_error;

pub use adapter_error::{AdapterError, AdapterResult, RollbackCause};
pub use audit_error::{AuditError, AuditResult};
pub use backup_error::{BackupError, BackupResult};
pub use config_error::ConfigError;
pub use lock_error::{LockError, LockResult};
pub use orchestrator_error::{OrchestratorError, OrchestratorResult};
