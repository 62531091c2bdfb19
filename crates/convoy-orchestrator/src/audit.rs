//! Append-only audit log backed by the `audit_log` table.
//!
//! Entries are never updated or deleted: the table carries triggers that
//! abort any UPDATE or DELETE, and this module exposes no such operation.
//! Sequence numbers are strictly increasing within the store.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use tracing::debug;

use convoy_core::errors::{AuditError, AuditResult};
use convoy_core::traits::Clock;
use convoy_core::types::time::{format_timestamp, parse_timestamp};
use convoy_core::types::{
    AuditEntry, AuditOperation, AuditOutcome, NewAuditEntry, RunId, ServiceId,
};

use crate::coordinator_db::CoordinatorDb;

const SELECT_COLUMNS: &str =
    "SELECT sequence_no, recorded_at, actor, run_id, service_id, operation, outcome, detail
     FROM audit_log";

pub struct AuditLog {
    db: CoordinatorDb,
    clock: Arc<dyn Clock>,
}

impl AuditLog {
    pub fn new(db: CoordinatorDb, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Durably append one entry. Returns it with its assigned sequence number.
    pub fn append(&self, entry: NewAuditEntry) -> AuditResult<AuditEntry> {
        let conn = self.db.connect().map_err(append_err)?;
        let timestamp = self.clock.now();
        conn.execute(
            "INSERT INTO audit_log
                (recorded_at, actor, run_id, service_id, operation, outcome, detail)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                format_timestamp(&timestamp),
                entry.actor,
                entry.run_id.as_ref().map(|r| r.as_str()),
                entry.service_id.as_ref().map(|s| s.as_str()),
                entry.operation.as_str(),
                entry.outcome.as_str(),
                entry.detail,
            ],
        )
        .map_err(append_err)?;
        let sequence_no = conn.last_insert_rowid();

        debug!(
            sequence_no,
            operation = entry.operation.as_str(),
            outcome = entry.outcome.as_str(),
            service = entry.service_id.as_ref().map(|s| s.as_str()).unwrap_or("-"),
            "audit"
        );

        Ok(AuditEntry {
            sequence_no,
            timestamp,
            actor: entry.actor,
            run_id: entry.run_id,
            service_id: entry.service_id,
            operation: entry.operation,
            outcome: entry.outcome,
            detail: entry.detail,
        })
    }

    /// Entries for one service, in sequence order.
    pub fn by_service(&self, service: &ServiceId) -> AuditResult<Vec<AuditEntry>> {
        self.query(
            &format!("{SELECT_COLUMNS} WHERE service_id = ?1 ORDER BY sequence_no"),
            [service.as_str()],
        )
    }

    /// Entries recorded in `[from, to]`, in sequence order.
    pub fn by_time_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> AuditResult<Vec<AuditEntry>> {
        self.query(
            &format!(
                "{SELECT_COLUMNS} WHERE recorded_at >= ?1 AND recorded_at <= ?2
                 ORDER BY sequence_no"
            ),
            [format_timestamp(&from), format_timestamp(&to)],
        )
    }

    /// Every entry a single run produced.
    pub fn by_run(&self, run_id: &RunId) -> AuditResult<Vec<AuditEntry>> {
        self.query(
            &format!("{SELECT_COLUMNS} WHERE run_id = ?1 ORDER BY sequence_no"),
            [run_id.as_str()],
        )
    }

    /// The newest `limit` entries, oldest first.
    pub fn recent(&self, limit: usize) -> AuditResult<Vec<AuditEntry>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut entries = self.query(
            &format!("{SELECT_COLUMNS} ORDER BY sequence_no DESC LIMIT ?1"),
            [limit],
        )?;
        entries.reverse();
        Ok(entries)
    }

    pub fn count(&self) -> AuditResult<u64> {
        let conn = self.db.connect().map_err(query_err)?;
        conn.query_row("SELECT COUNT(*) FROM audit_log", [], |row| row.get(0))
            .map_err(query_err)
    }

    fn query<P: rusqlite::Params>(&self, sql: &str, params: P) -> AuditResult<Vec<AuditEntry>> {
        let conn = self.db.connect().map_err(query_err)?;
        let raw = collect_raw(&conn, sql, params).map_err(query_err)?;
        raw.into_iter().map(RawAuditRow::into_entry).collect()
    }
}

/// Row as stored, before the text columns are parsed back into types.
struct RawAuditRow {
    sequence_no: i64,
    recorded_at: String,
    actor: String,
    run_id: Option<String>,
    service_id: Option<String>,
    operation: String,
    outcome: String,
    detail: String,
}

impl RawAuditRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            sequence_no: row.get(0)?,
            recorded_at: row.get(1)?,
            actor: row.get(2)?,
            run_id: row.get(3)?,
            service_id: row.get(4)?,
            operation: row.get(5)?,
            outcome: row.get(6)?,
            detail: row.get(7)?,
        })
    }

    fn into_entry(self) -> AuditResult<AuditEntry> {
        let malformed = |message: String| AuditError::Malformed {
            sequence_no: self.sequence_no,
            message,
        };
        let timestamp = parse_timestamp(&self.recorded_at)
            .map_err(|e| malformed(format!("recorded_at '{}': {e}", self.recorded_at)))?;
        let operation = AuditOperation::parse(&self.operation)
            .ok_or_else(|| malformed(format!("unknown operation '{}'", self.operation)))?;
        let outcome = AuditOutcome::parse(&self.outcome)
            .ok_or_else(|| malformed(format!("unknown outcome '{}'", self.outcome)))?;

        Ok(AuditEntry {
            sequence_no: self.sequence_no,
            timestamp,
            actor: self.actor,
            run_id: self.run_id.map(|r| RunId::from(r.as_str())),
            service_id: self.service_id.map(ServiceId::from),
            operation,
            outcome,
            detail: self.detail,
        })
    }
}

fn collect_raw<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> rusqlite::Result<Vec<RawAuditRow>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, RawAuditRow::from_row)?;
    rows.collect()
}

fn append_err(e: rusqlite::Error) -> AuditError {
    AuditError::AppendFailed {
        message: e.to_string(),
    }
}

fn query_err(e: rusqlite::Error) -> AuditError {
    AuditError::QueryFailed {
        message: e.to_string(),
    }
}
