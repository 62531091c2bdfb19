//! Numbered-file engine: a directory of `NNNN_name.up.sql` scripts with
//! optional `NNNN_name.down.sql` counterparts, applied in version order.
//!
//! State lives in the service database itself:
//! - `schema_migrations`: one row per application, `reverted_at` set on rollback
//! - `schema_migrations_dirty`: written before a script runs and removed after
//!   its transaction settles; a leftover row means a crash mid-script
//!
//! Scripts run inside the adapter's transaction and must not issue their own
//! BEGIN/COMMIT.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rustc_hash::FxHashSet;
use tracing::{debug, info, warn};

use convoy_core::errors::{AdapterError, AdapterResult, RollbackCause};
use convoy_core::traits::{Clock, ServiceAdapter, SystemClock};
use convoy_core::types::time::{format_timestamp, parse_timestamp};
use convoy_core::types::{AdapterStatus, Consistency, MigrationRecord, RevisionId, ServiceId};

use super::{
    content_checksum, in_transaction, open_read_only, open_read_write, state_unreadable,
    table_exists,
};

pub const ENGINE: &str = "numbered_sql";

const STATE_SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_migrations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    version INTEGER NOT NULL,
    name TEXT NOT NULL,
    checksum TEXT NOT NULL,
    applied_at TEXT NOT NULL,
    reverted_at TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_schema_migrations_active
    ON schema_migrations(version) WHERE reverted_at IS NULL;
CREATE TABLE IF NOT EXISTS schema_migrations_dirty (
    version INTEGER PRIMARY KEY,
    direction TEXT NOT NULL,
    started_at TEXT NOT NULL
);
";

/// One version's scripts on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    pub version: u64,
    pub name: String,
    pub up: PathBuf,
    pub down: Option<PathBuf>,
    /// BLAKE3 of the up script.
    pub checksum: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum FileName {
    Script {
        version: u64,
        name: String,
        direction: Direction,
    },
    Ignored,
    Malformed(String),
}

fn parse_file_name(file_name: &str) -> FileName {
    let (stem, direction) = if let Some(stem) = file_name.strip_suffix(".up.sql") {
        (stem, Direction::Up)
    } else if let Some(stem) = file_name.strip_suffix(".down.sql") {
        (stem, Direction::Down)
    } else {
        return FileName::Ignored;
    };

    let (number, name) = stem.split_once('_').unwrap_or((stem, ""));
    if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit()) {
        return FileName::Malformed(format!("'{file_name}' does not start with a version number"));
    }
    match number.parse::<u64>() {
        Ok(version) => FileName::Script {
            version,
            name: name.to_string(),
            direction,
        },
        Err(e) => FileName::Malformed(format!("'{file_name}': {e}")),
    }
}

/// Scripts found on disk plus anything about them that blocks migration.
#[derive(Debug, Default)]
struct Discovery {
    files: Vec<MigrationFile>,
    problems: Vec<String>,
}

impl Discovery {
    fn file(&self, version: u64) -> Option<&MigrationFile> {
        self.files.iter().find(|f| f.version == version)
    }
}

#[derive(Debug, Clone)]
struct AppliedRow {
    version: u64,
    checksum: String,
    applied_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct StoredState {
    applied: Vec<AppliedRow>,
    dirty: Option<(u64, String)>,
}

struct Loaded {
    discovery: Discovery,
    state: StoredState,
    status: AdapterStatus,
}

pub struct NumberedSqlAdapter {
    service_id: ServiceId,
    database: PathBuf,
    migrations_dir: PathBuf,
    clock: Arc<dyn Clock>,
}

impl NumberedSqlAdapter {
    pub fn new(
        service_id: ServiceId,
        database: impl Into<PathBuf>,
        migrations_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            service_id,
            database: database.into(),
            migrations_dir: migrations_dir.into(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn migrations_dir(&self) -> &Path {
        &self.migrations_dir
    }

    /// Migration scripts in version order.
    pub fn migration_files(&self) -> AdapterResult<Vec<MigrationFile>> {
        Ok(self.discover()?.files)
    }

    fn discover(&self) -> AdapterResult<Discovery> {
        if !self.migrations_dir.is_dir() {
            return Err(AdapterError::Unavailable {
                service: self.service_id.clone(),
                cause: format!(
                    "migrations directory {} not found",
                    self.migrations_dir.display()
                ),
            });
        }
        let dir = self.migrations_dir.to_str().ok_or_else(|| AdapterError::Unavailable {
            service: self.service_id.clone(),
            cause: format!("{} is not valid UTF-8", self.migrations_dir.display()),
        })?;
        let pattern = format!("{}/*.sql", glob::Pattern::escape(dir));
        let paths = glob::glob(&pattern).map_err(|e| state_unreadable(&self.service_id, e))?;

        let mut ups: Vec<(u64, String, PathBuf)> = Vec::new();
        let mut downs: Vec<(u64, PathBuf)> = Vec::new();
        let mut problems = Vec::new();
        for entry in paths {
            let path = entry.map_err(|e| state_unreadable(&self.service_id, e))?;
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            match parse_file_name(file_name) {
                FileName::Script {
                    version,
                    name,
                    direction: Direction::Up,
                } => ups.push((version, name, path)),
                FileName::Script {
                    version,
                    direction: Direction::Down,
                    ..
                } => downs.push((version, path)),
                FileName::Ignored => debug!(file = file_name, "Ignoring non-migration file"),
                FileName::Malformed(reason) => problems.push(reason),
            }
        }

        ups.sort_by_key(|(version, _, _)| *version);
        let mut files: Vec<MigrationFile> = Vec::with_capacity(ups.len());
        for (version, name, up) in ups {
            if files.last().is_some_and(|f| f.version == version) {
                problems.push(format!("duplicate up scripts for version {version}"));
                continue;
            }
            let checksum = match std::fs::read(&up) {
                Ok(bytes) => content_checksum(&[bytes.as_slice()]),
                Err(e) => {
                    problems.push(format!("cannot read {}: {e}", up.display()));
                    continue;
                }
            };
            files.push(MigrationFile {
                version,
                name,
                up,
                down: None,
                checksum,
            });
        }

        let mut seen_down = FxHashSet::default();
        for (version, path) in downs {
            if !seen_down.insert(version) {
                problems.push(format!("duplicate down scripts for version {version}"));
                continue;
            }
            match files.iter_mut().find(|f| f.version == version) {
                Some(file) => file.down = Some(path),
                None => problems.push(format!(
                    "down script {} has no matching up script",
                    path.display()
                )),
            }
        }

        Ok(Discovery { files, problems })
    }

    fn read_state(&self, conn: &Connection) -> AdapterResult<StoredState> {
        let unreadable = |e: rusqlite::Error| state_unreadable(&self.service_id, e);
        let mut state = StoredState::default();

        if table_exists(conn, "schema_migrations").map_err(unreadable)? {
            let mut stmt = conn
                .prepare(
                    "SELECT version, checksum, applied_at FROM schema_migrations
                     WHERE reverted_at IS NULL ORDER BY version",
                )
                .map_err(unreadable)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, u64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
                })
                .map_err(unreadable)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(unreadable)?;
            for (version, checksum, applied_at) in rows {
                let applied_at = parse_timestamp(&applied_at)
                    .map_err(|e| state_unreadable(&self.service_id, format!("version {version}: {e}")))?;
                state.applied.push(AppliedRow {
                    version,
                    checksum,
                    applied_at,
                });
            }
        }

        if table_exists(conn, "schema_migrations_dirty").map_err(unreadable)? {
            state.dirty = conn
                .query_row(
                    "SELECT version, direction FROM schema_migrations_dirty ORDER BY version LIMIT 1",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .map_err(unreadable)?;
        }

        Ok(state)
    }

    fn load(&self) -> AdapterResult<Loaded> {
        let discovery = self.discover()?;
        let conn = open_read_only(&self.service_id, &self.database)?;
        let state = self.read_state(&conn)?;
        let status = compute_status(&discovery, &state, &self.migrations_dir);
        Ok(Loaded {
            discovery,
            state,
            status,
        })
    }

    fn ensure_consistent(&self, status: &AdapterStatus) -> AdapterResult<()> {
        match status.inconsistency() {
            Some(reason) => Err(AdapterError::Blocked {
                service: self.service_id.clone(),
                reason: reason.to_string(),
            }),
            None => Ok(()),
        }
    }

    fn mark_dirty(
        &self,
        conn: &Connection,
        version: u64,
        direction: Direction,
        at: &DateTime<Utc>,
    ) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT OR REPLACE INTO schema_migrations_dirty (version, direction, started_at)
             VALUES (?1, ?2, ?3)",
            params![version, direction.as_str(), format_timestamp(at)],
        )?;
        Ok(())
    }

    fn clear_dirty(&self, conn: &Connection, version: u64) -> rusqlite::Result<()> {
        conn.execute(
            "DELETE FROM schema_migrations_dirty WHERE version = ?1",
            [version],
        )?;
        Ok(())
    }

    /// Clear the marker once the transaction settled. Failing to clear it
    /// leaves the service blocked, which is the safe outcome.
    fn settle(&self, conn: &Connection, version: u64) -> AdapterResult<()> {
        self.clear_dirty(conn, version).map_err(|e| {
            state_unreadable(
                &self.service_id,
                format!("revision {version} settled but its dirty marker remains: {e}"),
            )
        })
    }
}

/// Derive the adapter status from scripts on disk and recorded state.
fn compute_status(discovery: &Discovery, state: &StoredState, dir: &Path) -> AdapterStatus {
    let mut problems = discovery.problems.clone();

    if let Some((version, direction)) = &state.dirty {
        problems.push(format!(
            "revision {version} was interrupted during {direction}; inspect the database and clear schema_migrations_dirty"
        ));
    }

    for row in &state.applied {
        match discovery.file(row.version) {
            None => problems.push(format!(
                "applied revision {} has no script in {}",
                row.version,
                dir.display()
            )),
            Some(file) if file.checksum != row.checksum => problems.push(format!(
                "revision {} changed on disk since it was applied",
                row.version
            )),
            Some(_) => {}
        }
    }

    let applied: FxHashSet<u64> = state.applied.iter().map(|r| r.version).collect();
    let head = state.applied.last().map(|r| r.version);
    let mut pending = Vec::new();
    for file in &discovery.files {
        if applied.contains(&file.version) {
            continue;
        }
        match head {
            Some(head) if file.version < head => problems.push(format!(
                "revision {} is unapplied below head {head}",
                file.version
            )),
            _ => pending.push(RevisionId::Number(file.version)),
        }
    }

    AdapterStatus {
        applied: state
            .applied
            .iter()
            .map(|r| RevisionId::Number(r.version))
            .collect(),
        pending,
        consistency: if problems.is_empty() {
            Consistency::Consistent
        } else {
            Consistency::Inconsistent {
                reason: problems.join("; "),
            }
        },
    }
}

impl ServiceAdapter for NumberedSqlAdapter {
    fn service_id(&self) -> &ServiceId {
        &self.service_id
    }

    fn engine(&self) -> &'static str {
        ENGINE
    }

    fn backup_source(&self) -> &Path {
        &self.database
    }

    fn status(&self) -> AdapterResult<AdapterStatus> {
        Ok(self.load()?.status)
    }

    fn apply_next(&self) -> AdapterResult<MigrationRecord> {
        let loaded = self.load()?;
        self.ensure_consistent(&loaded.status)?;
        let Some(RevisionId::Number(version)) = loaded.status.pending.first().cloned() else {
            return Err(AdapterError::NothingPending {
                service: self.service_id.clone(),
            });
        };
        let file = loaded
            .discovery
            .file(version)
            .ok_or_else(|| state_unreadable(&self.service_id, format!("version {version} vanished")))?;

        let revision = RevisionId::Number(version);
        let apply_failed = |cause: String| AdapterError::ApplyFailed {
            service: self.service_id.clone(),
            revision: revision.clone(),
            cause,
        };
        let up_sql = std::fs::read_to_string(&file.up)
            .map_err(|e| apply_failed(format!("read {}: {e}", file.up.display())))?;
        let checksum = content_checksum(&[up_sql.as_bytes()]);

        let mut conn = open_read_write(&self.service_id, &self.database)?;
        conn.execute_batch(STATE_SCHEMA_SQL)
            .map_err(|e| apply_failed(e.to_string()))?;
        let applied_at = self.clock.now();
        self.mark_dirty(&conn, version, Direction::Up, &applied_at)
            .map_err(|e| apply_failed(e.to_string()))?;

        let result = in_transaction(&mut conn, |tx| {
            tx.execute_batch(&up_sql)?;
            tx.execute(
                "INSERT INTO schema_migrations (version, name, checksum, applied_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![version, file.name, checksum, format_timestamp(&applied_at)],
            )?;
            Ok(())
        });

        match result {
            Ok(()) => {
                self.settle(&conn, version)?;
                info!(service = %self.service_id, version, name = %file.name, "Revision applied");
                Ok(MigrationRecord {
                    service_id: self.service_id.clone(),
                    revision_id: revision,
                    applied_at,
                    checksum,
                    reverted_at: None,
                })
            }
            Err(e) => {
                // Rolled back: nothing of this revision is applied.
                if let Err(clear) = self.clear_dirty(&conn, version) {
                    warn!(service = %self.service_id, version, error = %clear, "Dirty marker left after failed apply");
                }
                warn!(service = %self.service_id, version, error = %e, "Revision failed");
                Err(apply_failed(e.to_string()))
            }
        }
    }

    fn rollback_last(&self) -> AdapterResult<MigrationRecord> {
        let loaded = self.load()?;
        self.ensure_consistent(&loaded.status)?;
        let rollback_failed = |cause: RollbackCause| AdapterError::RollbackFailed {
            service: self.service_id.clone(),
            cause,
        };
        let head = loaded
            .state
            .applied
            .last()
            .cloned()
            .ok_or_else(|| rollback_failed(RollbackCause::NothingApplied))?;
        let revision = RevisionId::Number(head.version);
        let down = loaded
            .discovery
            .file(head.version)
            .and_then(|f| f.down.clone())
            .ok_or_else(|| {
                rollback_failed(RollbackCause::NoDownScript {
                    revision: revision.clone(),
                })
            })?;
        let db_error = |message: String| {
            rollback_failed(RollbackCause::DbError {
                revision: revision.clone(),
                message,
            })
        };
        let down_sql = std::fs::read_to_string(&down)
            .map_err(|e| db_error(format!("read {}: {e}", down.display())))?;

        let mut conn = open_read_write(&self.service_id, &self.database)?;
        conn.execute_batch(STATE_SCHEMA_SQL)
            .map_err(|e| db_error(e.to_string()))?;
        let reverted_at = self.clock.now();
        self.mark_dirty(&conn, head.version, Direction::Down, &reverted_at)
            .map_err(|e| db_error(e.to_string()))?;

        let result = in_transaction(&mut conn, |tx| {
            tx.execute_batch(&down_sql)?;
            tx.execute(
                "UPDATE schema_migrations SET reverted_at = ?1
                 WHERE version = ?2 AND reverted_at IS NULL",
                params![format_timestamp(&reverted_at), head.version],
            )?;
            Ok(())
        });

        match result {
            Ok(()) => {
                self.settle(&conn, head.version)?;
                info!(service = %self.service_id, version = head.version, "Revision rolled back");
                Ok(MigrationRecord {
                    service_id: self.service_id.clone(),
                    revision_id: revision,
                    applied_at: head.applied_at,
                    checksum: head.checksum,
                    reverted_at: Some(reverted_at),
                })
            }
            Err(e) => {
                if let Err(clear) = self.clear_dirty(&conn, head.version) {
                    warn!(service = %self.service_id, version = head.version, error = %clear, "Dirty marker left after failed rollback");
                }
                Err(db_error(e.to_string()))
            }
        }
    }
}
