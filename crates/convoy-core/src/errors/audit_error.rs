//! Audit log errors.

use super::error_code::{self, ConvoyErrorCode};

#[derive(Debug, Clone, thiserror::Error)]
pub enum AuditError {
    #[error("Audit append failed: {message}")]
    AppendFailed { message: String },

    #[error("Audit query failed: {message}")]
    QueryFailed { message: String },

    #[error("Audit entry {sequence_no} unreadable: {message}")]
    Malformed { sequence_no: i64, message: String },
}

impl ConvoyErrorCode for AuditError {
    fn error_code(&self) -> &'static str {
        error_code::AUDIT_ERROR
    }
}

pub type AuditResult<T> = Result<T, AuditError>;
