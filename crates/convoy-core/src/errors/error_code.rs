//! Stable error codes shared by every convoy error type.

pub const ADAPTER_APPLY_FAILED: &str = "APPLY_FAILED";
pub const ADAPTER_ROLLBACK_FAILED: &str = "ROLLBACK_FAILED";
pub const ADAPTER_UNAVAILABLE: &str = "ADAPTER_UNAVAILABLE";
pub const BLOCKED: &str = "BLOCKED";
pub const LOCK_HELD: &str = "LOCK_HELD";
pub const LOCK_LOST: &str = "LOCK_LOST";
pub const BACKUP_FAILED: &str = "BACKUP_FAILED";
pub const BACKUP_CORRUPTED: &str = "BACKUP_CORRUPTED";
pub const BACKUP_NOT_FOUND: &str = "BACKUP_NOT_FOUND";
pub const VERIFICATION_MISMATCH: &str = "VERIFICATION_MISMATCH";
pub const STALE_PLAN: &str = "STALE_PLAN";
pub const CANCELLED: &str = "CANCELLED";
pub const CONFIG_ERROR: &str = "CONFIG_ERROR";
pub const STORAGE_ERROR: &str = "STORAGE_ERROR";
pub const AUDIT_ERROR: &str = "AUDIT_ERROR";

/// Implemented by every error enum so callers (CLI, dashboard) can report a
/// stable machine-readable code next to the human message.
pub trait ConvoyErrorCode {
    fn error_code(&self) -> &'static str;
}
