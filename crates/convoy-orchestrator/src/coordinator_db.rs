//! The coordinator's own store, `convoy.db`.
//! Schema is versioned with `PRAGMA user_version`; every access opens a fresh
//! connection so the handle can be shared across threads and processes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::Connection;
use tracing::debug;

use convoy_core::errors::{OrchestratorError, OrchestratorResult};

pub const COORDINATOR_SCHEMA_VERSION: u32 = 1;

pub const COORDINATOR_SCHEMA_SQL: &str = r#"
-- Append-only audit trail. Sequence numbers come from AUTOINCREMENT and are
-- never reused, even after a failed insert.
CREATE TABLE IF NOT EXISTS audit_log (
    sequence_no INTEGER PRIMARY KEY AUTOINCREMENT,
    recorded_at TEXT NOT NULL,
    actor TEXT NOT NULL,
    run_id TEXT,
    service_id TEXT,
    operation TEXT NOT NULL,
    outcome TEXT NOT NULL,
    detail TEXT NOT NULL DEFAULT ''
) STRICT;

CREATE INDEX IF NOT EXISTS idx_audit_service ON audit_log(service_id, sequence_no);
CREATE INDEX IF NOT EXISTS idx_audit_recorded ON audit_log(recorded_at);
CREATE INDEX IF NOT EXISTS idx_audit_run ON audit_log(run_id);

CREATE TRIGGER IF NOT EXISTS audit_log_no_update
BEFORE UPDATE ON audit_log
BEGIN
    SELECT RAISE(ABORT, 'audit_log is append-only');
END;

CREATE TRIGGER IF NOT EXISTS audit_log_no_delete
BEFORE DELETE ON audit_log
BEGIN
    SELECT RAISE(ABORT, 'audit_log is append-only');
END;

-- One row per locked service. Expired rows are reclaimed on acquire.
CREATE TABLE IF NOT EXISTS service_locks (
    service_id TEXT PRIMARY KEY,
    holder_id TEXT NOT NULL,
    token_id TEXT NOT NULL,
    acquired_at TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    ttl_secs INTEGER NOT NULL
) STRICT;

CREATE TABLE IF NOT EXISTS backup_registry (
    id TEXT PRIMARY KEY,
    service_id TEXT NOT NULL,
    run_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    storage_path TEXT NOT NULL,
    checksum TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    verified INTEGER NOT NULL DEFAULT 0,
    pinned INTEGER NOT NULL DEFAULT 0
) STRICT;

CREATE INDEX IF NOT EXISTS idx_backup_service ON backup_registry(service_id, created_at);
CREATE INDEX IF NOT EXISTS idx_backup_run ON backup_registry(run_id);
"#;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle on `convoy.db`. Cheap to clone; holds only the path.
#[derive(Debug, Clone)]
pub struct CoordinatorDb {
    path: PathBuf,
}

impl CoordinatorDb {
    /// Create the parent directory and schema if needed. Idempotent.
    pub fn open(path: impl Into<PathBuf>) -> OrchestratorResult<Self> {
        let db = Self { path: path.into() };
        if let Some(parent) = db.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| OrchestratorError::Storage {
                    message: format!("create {}: {e}", parent.display()),
                })?;
            }
        }
        db.initialize().map_err(|e| OrchestratorError::Storage {
            message: format!("initialize {}: {e}", db.path.display()),
        })?;
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fresh connection with per-connection PRAGMAs applied.
    pub fn connect(&self) -> rusqlite::Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(
            "
            PRAGMA synchronous = FULL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
            ",
        )?;
        Ok(conn)
    }

    fn initialize(&self) -> Result<(), InitError> {
        let conn = self.connect()?;
        let _: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;

        let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        if version > COORDINATOR_SCHEMA_VERSION {
            return Err(InitError::TooNew(version));
        }

        conn.execute_batch(COORDINATOR_SCHEMA_SQL)?;
        if version < COORDINATOR_SCHEMA_VERSION {
            conn.pragma_update(None, "user_version", COORDINATOR_SCHEMA_VERSION)?;
            debug!(
                path = %self.path.display(),
                from = version,
                to = COORDINATOR_SCHEMA_VERSION,
                "Coordinator schema initialized"
            );
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
enum InitError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("schema version {0} is newer than this build supports")]
    TooNew(u32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_schema_and_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("state").join("convoy.db");

        let db = CoordinatorDb::open(&path).unwrap();
        assert!(path.exists());
        CoordinatorDb::open(&path).unwrap();

        let conn = db.connect().unwrap();
        let version: u32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, COORDINATOR_SCHEMA_VERSION);

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        for expected in ["audit_log", "backup_registry", "service_locks"] {
            assert!(tables.iter().any(|t| t == expected), "missing {expected}");
        }
    }

    #[test]
    fn refuses_newer_schema() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("convoy.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.pragma_update(None, "user_version", COORDINATOR_SCHEMA_VERSION + 1)
                .unwrap();
        }
        let err = CoordinatorDb::open(&path).unwrap_err();
        assert!(matches!(err, OrchestratorError::Storage { .. }));
        assert!(err.to_string().contains("newer"));
    }
}
