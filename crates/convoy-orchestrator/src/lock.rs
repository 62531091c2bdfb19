//! Per-service exclusive locks with time-to-live, stored in `service_locks`.
//!
//! Acquisition runs inside a `BEGIN IMMEDIATE` transaction, so two processes
//! racing for the same service serialize on the SQLite write lock and exactly
//! one of them wins. An expired row is reclaimed, never silently: the grant
//! reports the previous holder and a warning is logged.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::{debug, info, warn};

use convoy_core::errors::{LockError, LockResult};
use convoy_core::traits::Clock;
use convoy_core::types::time::{format_timestamp, parse_timestamp};
use convoy_core::types::{LockInfo, LockToken, ServiceId};

use crate::coordinator_db::CoordinatorDb;

/// A successful acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockGrant {
    pub token: LockToken,
    /// Expired lock this grant replaced, if any.
    pub reclaimed: Option<LockInfo>,
}

pub struct LockManager {
    db: CoordinatorDb,
    clock: Arc<dyn Clock>,
    holder_id: String,
}

/// Lock row including the private token id.
struct LockRow {
    info: LockInfo,
    token_id: String,
}

impl LockManager {
    pub fn new(db: CoordinatorDb, clock: Arc<dyn Clock>, holder_id: impl Into<String>) -> Self {
        Self {
            db,
            clock,
            holder_id: holder_id.into(),
        }
    }

    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// Take the lock on `service` for `ttl`. Fails fast with `LockError::Held`
    /// while another holder's lock is unexpired.
    pub fn acquire(&self, service: &ServiceId, ttl: Duration) -> LockResult<LockGrant> {
        let mut conn = self.db.connect().map_err(storage)?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(storage)?;
        let now = self.clock.now();

        let reclaimed = match read_lock(&tx, service)? {
            Some(row) if !row.info.is_expired_at(now) => {
                debug!(
                    service = %service,
                    holder = %row.info.holder_id,
                    "Lock held by another operator"
                );
                return Err(LockError::Held {
                    service: service.clone(),
                    holder: row.info.holder_id,
                    expires_at: row.info.expires_at,
                });
            }
            Some(row) => {
                warn!(
                    service = %service,
                    previous_holder = %row.info.holder_id,
                    expired_at = %format_timestamp(&row.info.expires_at),
                    "Reclaiming expired lock"
                );
                Some(row.info)
            }
            None => None,
        };

        let ttl_secs = ttl.as_secs().max(1);
        let token = LockToken {
            service_id: service.clone(),
            holder_id: self.holder_id.clone(),
            token_id: uuid::Uuid::new_v4().to_string(),
            acquired_at: now,
            expires_at: now + chrono::Duration::seconds(ttl_secs as i64),
            ttl_secs,
        };

        tx.execute(
            "INSERT OR REPLACE INTO service_locks
                (service_id, holder_id, token_id, acquired_at, expires_at, ttl_secs)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                service.as_str(),
                token.holder_id,
                token.token_id,
                format_timestamp(&token.acquired_at),
                format_timestamp(&token.expires_at),
                token.ttl_secs,
            ],
        )
        .map_err(storage)?;
        tx.commit().map_err(storage)?;

        info!(
            service = %service,
            holder = %token.holder_id,
            expires_at = %format_timestamp(&token.expires_at),
            "Lock acquired"
        );
        Ok(LockGrant { token, reclaimed })
    }

    /// Push the expiry out by another TTL. Fails with `LockError::Lost` when
    /// the lock expired or was taken over since the token was issued.
    pub fn renew(&self, token: &LockToken) -> LockResult<LockToken> {
        let mut conn = self.db.connect().map_err(storage)?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(storage)?;
        let now = self.clock.now();

        let lost = || LockError::Lost {
            service: token.service_id.clone(),
            holder: token.holder_id.clone(),
        };
        match read_lock(&tx, &token.service_id)? {
            Some(row) if row.token_id == token.token_id && !row.info.is_expired_at(now) => {}
            _ => return Err(lost()),
        }

        let expires_at = now + token.ttl();
        tx.execute(
            "UPDATE service_locks SET expires_at = ?1 WHERE service_id = ?2 AND token_id = ?3",
            params![
                format_timestamp(&expires_at),
                token.service_id.as_str(),
                token.token_id
            ],
        )
        .map_err(storage)?;
        tx.commit().map_err(storage)?;

        debug!(service = %token.service_id, expires_at = %format_timestamp(&expires_at), "Lock renewed");
        Ok(LockToken {
            expires_at,
            ..token.clone()
        })
    }

    /// Release the lock this token grants. Idempotent: releasing twice, or
    /// after someone else reclaimed the lock, changes nothing.
    pub fn release(&self, token: &LockToken) -> LockResult<()> {
        let conn = self.db.connect().map_err(storage)?;
        let deleted = conn
            .execute(
                "DELETE FROM service_locks WHERE service_id = ?1 AND token_id = ?2",
                params![token.service_id.as_str(), token.token_id],
            )
            .map_err(storage)?;
        if deleted == 0 {
            debug!(service = %token.service_id, "Lock already released or reclaimed");
        } else {
            info!(service = %token.service_id, holder = %token.holder_id, "Lock released");
        }
        Ok(())
    }

    /// Current unexpired holder of `service`, if any.
    pub fn holder(&self, service: &ServiceId) -> LockResult<Option<LockInfo>> {
        let conn = self.db.connect().map_err(storage)?;
        let now = self.clock.now();
        Ok(read_lock(&conn, service)?
            .map(|row| row.info)
            .filter(|info| !info.is_expired_at(now)))
    }

    /// Every unexpired lock, ordered by service id.
    pub fn active_locks(&self) -> LockResult<Vec<LockInfo>> {
        let conn = self.db.connect().map_err(storage)?;
        let now = self.clock.now();
        let mut stmt = conn
            .prepare(
                "SELECT service_id, holder_id, token_id, acquired_at, expires_at
                 FROM service_locks ORDER BY service_id",
            )
            .map_err(storage)?;
        let rows = stmt
            .query_map([], raw_lock_row)
            .map_err(storage)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(storage)?;
        let mut locks = Vec::with_capacity(rows.len());
        for raw in rows {
            let row = parse_lock_row(raw)?;
            if !row.info.is_expired_at(now) {
                locks.push(row.info);
            }
        }
        Ok(locks)
    }

    /// Drop whatever lock sits on `service`, regardless of holder.
    /// Operator escape hatch; returns the lock that was removed.
    pub fn force_release(&self, service: &ServiceId) -> LockResult<Option<LockInfo>> {
        let mut conn = self.db.connect().map_err(storage)?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(storage)?;
        let existing = read_lock(&tx, service)?;
        tx.execute(
            "DELETE FROM service_locks WHERE service_id = ?1",
            [service.as_str()],
        )
        .map_err(storage)?;
        tx.commit().map_err(storage)?;

        if let Some(row) = &existing {
            warn!(service = %service, holder = %row.info.holder_id, "Lock force-released");
        }
        Ok(existing.map(|row| row.info))
    }
}

type RawLockRow = (String, String, String, String, String);

fn raw_lock_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawLockRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn parse_lock_row(raw: RawLockRow) -> LockResult<LockRow> {
    let (service_id, holder_id, token_id, acquired_at, expires_at) = raw;
    Ok(LockRow {
        info: LockInfo {
            service_id: ServiceId::from(service_id),
            holder_id,
            acquired_at: parse_ts(&acquired_at)?,
            expires_at: parse_ts(&expires_at)?,
        },
        token_id,
    })
}

fn read_lock(conn: &Connection, service: &ServiceId) -> LockResult<Option<LockRow>> {
    conn.query_row(
        "SELECT service_id, holder_id, token_id, acquired_at, expires_at
         FROM service_locks WHERE service_id = ?1",
        [service.as_str()],
        raw_lock_row,
    )
    .optional()
    .map_err(storage)?
    .map(parse_lock_row)
    .transpose()
}

fn parse_ts(s: &str) -> LockResult<DateTime<Utc>> {
    parse_timestamp(s).map_err(|e| LockError::Storage {
        message: format!("bad lock timestamp '{s}': {e}"),
    })
}

fn storage(e: rusqlite::Error) -> LockError {
    LockError::Storage {
        message: e.to_string(),
    }
}
