//! Errors raised by `ServiceAdapter` implementations.
//! Adapters never retry; whatever happens is reported as-is.

use super::error_code::{self, ConvoyErrorCode};
use crate::types::{RevisionId, ServiceId};

/// Why a rollback could not be performed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackCause {
    /// The head revision has no backward action recorded.
    NoDownScript { revision: RevisionId },
    /// The backward action ran and the database rejected it.
    DbError { revision: RevisionId, message: String },
    /// Nothing is applied, so there is nothing to revert.
    NothingApplied,
}

impl std::fmt::Display for RollbackCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoDownScript { revision } => {
                write!(f, "no down script for revision {revision}")
            }
            Self::DbError { revision, message } => {
                write!(f, "revision {revision} down failed: {message}")
            }
            Self::NothingApplied => write!(f, "no applied revision"),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum AdapterError {
    #[error("Apply of {revision} failed for {service}: {cause}")]
    ApplyFailed {
        service: ServiceId,
        revision: RevisionId,
        cause: String,
    },

    #[error("Rollback failed for {service}: {cause}")]
    RollbackFailed {
        service: ServiceId,
        cause: RollbackCause,
    },

    #[error("Adapter for {service} unavailable: {cause}")]
    Unavailable { service: ServiceId, cause: String },

    #[error("Service {service} is blocked: {reason}")]
    Blocked { service: ServiceId, reason: String },

    #[error("No pending revision for {service}")]
    NothingPending { service: ServiceId },

    #[error("Migration state of {service} unreadable: {message}")]
    StateUnreadable { service: ServiceId, message: String },
}

impl AdapterError {
    /// Service the error is about.
    pub fn service(&self) -> &ServiceId {
        match self {
            Self::ApplyFailed { service, .. }
            | Self::RollbackFailed { service, .. }
            | Self::Unavailable { service, .. }
            | Self::Blocked { service, .. }
            | Self::NothingPending { service }
            | Self::StateUnreadable { service, .. } => service,
        }
    }
}

impl ConvoyErrorCode for AdapterError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::ApplyFailed { .. } | Self::NothingPending { .. } => {
                error_code::ADAPTER_APPLY_FAILED
            }
            Self::RollbackFailed { .. } => error_code::ADAPTER_ROLLBACK_FAILED,
            Self::Unavailable { .. } => error_code::ADAPTER_UNAVAILABLE,
            Self::Blocked { .. } => error_code::BLOCKED,
            Self::StateUnreadable { .. } => error_code::STORAGE_ERROR,
        }
    }
}

pub type AdapterResult<T> = Result<T, AdapterError>;
