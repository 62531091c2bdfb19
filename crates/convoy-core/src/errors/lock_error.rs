//! Lock manager errors.

use chrono::{DateTime, Utc};

use super::error_code::{self, ConvoyErrorCode};
use crate::types::ServiceId;

#[derive(Debug, Clone, thiserror::Error)]
pub enum LockError {
    #[error("Lock on {service} held by {holder} until {expires_at}")]
    Held {
        service: ServiceId,
        holder: String,
        expires_at: DateTime<Utc>,
    },

    /// Renewal of a token that expired or was reclaimed by another holder.
    #[error("Lock on {service} no longer held by {holder}")]
    Lost { service: ServiceId, holder: String },

    #[error("Lock store error: {message}")]
    Storage { message: String },
}

impl ConvoyErrorCode for LockError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Held { .. } => error_code::LOCK_HELD,
            Self::Lost { .. } => error_code::LOCK_LOST,
            Self::Storage { .. } => error_code::STORAGE_ERROR,
        }
    }
}

pub type LockResult<T> = Result<T, LockError>;
