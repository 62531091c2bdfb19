//! Backup manager errors.

use super::error_code::{self, ConvoyErrorCode};
use crate::types::ServiceId;

#[derive(Debug, Clone, thiserror::Error)]
pub enum BackupError {
    #[error("Backup of {service} failed: {cause}")]
    Failed { service: ServiceId, cause: String },

    #[error("Backup not found: {0}")]
    NotFound(String),

    #[error("Backup corrupted: {artifact_id} ({reason})")]
    Corrupted { artifact_id: String, reason: String },

    #[error("Backup registry error: {message}")]
    Storage { message: String },
}

impl ConvoyErrorCode for BackupError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Failed { .. } => error_code::BACKUP_FAILED,
            Self::NotFound(_) => error_code::BACKUP_NOT_FOUND,
            Self::Corrupted { .. } => error_code::BACKUP_CORRUPTED,
            Self::Storage { .. } => error_code::STORAGE_ERROR,
        }
    }
}

pub type BackupResult<T> = Result<T, BackupError>;
