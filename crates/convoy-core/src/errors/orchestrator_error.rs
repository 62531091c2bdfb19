//! Top-level orchestration error. All subsystem errors convert into this.

use super::error_code::{self, ConvoyErrorCode};
use super::{AdapterError, AuditError, BackupError, ConfigError, LockError};
use crate::types::{RevisionId, ServiceId};

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Backup(#[from] BackupError),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Audit(#[from] AuditError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Verification mismatch for {service}: expected {expected}, found {actual}")]
    VerificationMismatch {
        service: ServiceId,
        expected: String,
        actual: String,
    },

    #[error("Plan for {service} is stale: planned from {planned}, service is at {actual}")]
    StalePlan {
        service: ServiceId,
        planned: String,
        actual: String,
    },

    #[error("Unknown service: {0}")]
    UnknownService(ServiceId),

    #[error("Revision {revision} is not an applied revision of {service}")]
    UnknownRevision {
        service: ServiceId,
        revision: RevisionId,
    },

    #[error("Run cancelled; {service} stopped at {at}")]
    Cancelled { service: ServiceId, at: String },

    #[error("Coordinator store error: {message}")]
    Storage { message: String },
}

impl OrchestratorError {
    /// Process exit code for the CLI collaborator:
    /// 0 success, 1 generic failure, 2 lock held, 3 backup/validation failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Lock(LockError::Held { .. }) => 2,
            Self::Backup(BackupError::Failed { .. } | BackupError::Corrupted { .. }) => 3,
            Self::VerificationMismatch { .. } => 3,
            Self::Config(ConfigError::Invalid(_) | ConfigError::Chain { .. }) => 3,
            _ => 1,
        }
    }
}

impl ConvoyErrorCode for OrchestratorError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Lock(e) => e.error_code(),
            Self::Backup(e) => e.error_code(),
            Self::Adapter(e) => e.error_code(),
            Self::Audit(e) => e.error_code(),
            Self::Config(e) => e.error_code(),
            Self::VerificationMismatch { .. } => error_code::VERIFICATION_MISMATCH,
            Self::StalePlan { .. } => error_code::STALE_PLAN,
            Self::UnknownService(_) | Self::UnknownRevision { .. } => error_code::CONFIG_ERROR,
            Self::Cancelled { .. } => error_code::CANCELLED,
            Self::Storage { .. } => error_code::STORAGE_ERROR,
        }
    }
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
