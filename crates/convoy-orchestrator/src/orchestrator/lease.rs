//! A held service lock for the duration of one run step.
//!
//! The lease renews itself once a third of the TTL has passed since the last
//! renewal, and releases on drop if nobody released it explicitly.

use chrono::{DateTime, Utc};
use tracing::warn;

use convoy_core::errors::LockResult;
use convoy_core::traits::Clock;
use convoy_core::types::LockToken;

use crate::lock::LockManager;

pub(crate) struct LockLease<'a> {
    locks: &'a LockManager,
    clock: &'a dyn Clock,
    token: Option<LockToken>,
    renewed_at: DateTime<Utc>,
}

impl<'a> LockLease<'a> {
    pub(crate) fn new(locks: &'a LockManager, clock: &'a dyn Clock, token: LockToken) -> Self {
        Self {
            locks,
            clock,
            renewed_at: token.acquired_at,
            token: Some(token),
        }
    }

    /// Renew if due. Returns whether a renewal happened.
    pub(crate) fn renew_if_due(&mut self) -> LockResult<bool> {
        let Some(token) = &self.token else {
            return Ok(false);
        };
        let now = self.clock.now();
        if now - self.renewed_at < token.ttl() / 3 {
            return Ok(false);
        }
        let renewed = self.locks.renew(token)?;
        self.token = Some(renewed);
        self.renewed_at = now;
        Ok(true)
    }

    pub(crate) fn release(mut self) -> LockResult<()> {
        match self.token.take() {
            Some(token) => self.locks.release(&token),
            None => Ok(()),
        }
    }
}

impl Drop for LockLease<'_> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            if let Err(e) = self.locks.release(&token) {
                warn!(service = %token.service_id, error = %e, "Failed to release lock on drop");
            }
        }
    }
}
