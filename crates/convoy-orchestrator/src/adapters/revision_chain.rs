//! Revision-chain engine: revisions carry opaque ids and point at their
//! parent, forming a single linear chain from one root. Upgrade and
//! downgrade actions are SQL text or native functions.
//!
//! Chains are written in TOML:
//!
//! ```toml
//! [[revision]]
//! id = "3f9a0c"
//! message = "create invoices"
//! upgrade = "CREATE TABLE invoices (id INTEGER PRIMARY KEY);"
//! downgrade = "DROP TABLE invoices;"
//!
//! [[revision]]
//! id = "8c21d4"
//! parent = "3f9a0c"
//! upgrade = "ALTER TABLE invoices ADD COLUMN total INTEGER;"
//! ```
//!
//! State tables in the service database: `revision_head` (at most one row;
//! absent means base), `revision_history` and `revision_in_flight`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Deserialize;
use tracing::{info, warn};

use convoy_core::errors::{AdapterError, AdapterResult, ConfigError, RollbackCause};
use convoy_core::traits::{Clock, ServiceAdapter, SystemClock};
use convoy_core::types::time::{format_timestamp, parse_timestamp};
use convoy_core::types::{AdapterStatus, Consistency, MigrationRecord, RevisionId, ServiceId};

use super::{
    content_checksum, in_transaction, open_read_only, open_read_write, state_unreadable,
    table_exists,
};

pub const ENGINE: &str = "revision_chain";

const STATE_SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS revision_head (
    singleton INTEGER PRIMARY KEY CHECK (singleton = 1),
    revision TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS revision_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    revision TEXT NOT NULL,
    parent TEXT,
    checksum TEXT NOT NULL,
    applied_at TEXT NOT NULL,
    reverted_at TEXT
);
CREATE TABLE IF NOT EXISTS revision_in_flight (
    revision TEXT PRIMARY KEY,
    direction TEXT NOT NULL,
    started_at TEXT NOT NULL
);
";

/// Native action run against the service connection, inside the
/// adapter's transaction.
pub type NativeAction = fn(&Connection) -> rusqlite::Result<()>;

#[derive(Clone)]
pub enum RevisionAction {
    Sql(String),
    Native(NativeAction),
}

impl RevisionAction {
    fn run(&self, conn: &Connection) -> rusqlite::Result<()> {
        match self {
            Self::Sql(sql) => conn.execute_batch(sql),
            Self::Native(action) => action(conn),
        }
    }

    fn fingerprint(&self) -> Vec<u8> {
        match self {
            Self::Sql(sql) => sql.as_bytes().to_vec(),
            Self::Native(_) => b"native".to_vec(),
        }
    }
}

impl fmt::Debug for RevisionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sql(sql) => f.debug_tuple("Sql").field(sql).finish(),
            Self::Native(_) => f.write_str("Native(..)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChainRevision {
    pub id: String,
    pub parent: Option<String>,
    pub message: String,
    pub upgrade: RevisionAction,
    pub downgrade: Option<RevisionAction>,
}

impl ChainRevision {
    pub fn sql(
        id: impl Into<String>,
        parent: Option<&str>,
        upgrade: impl Into<String>,
        downgrade: Option<&str>,
    ) -> Self {
        Self {
            id: id.into(),
            parent: parent.map(str::to_string),
            message: String::new(),
            upgrade: RevisionAction::Sql(upgrade.into()),
            downgrade: downgrade.map(|d| RevisionAction::Sql(d.to_string())),
        }
    }

    pub fn native(
        id: impl Into<String>,
        parent: Option<&str>,
        upgrade: NativeAction,
        downgrade: Option<NativeAction>,
    ) -> Self {
        Self {
            id: id.into(),
            parent: parent.map(str::to_string),
            message: String::new(),
            upgrade: RevisionAction::Native(upgrade),
            downgrade: downgrade.map(RevisionAction::Native),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Identity of the revision's content, recorded at apply time.
    pub fn checksum(&self) -> String {
        let parent = self.parent.as_deref().unwrap_or("");
        let upgrade = self.upgrade.fingerprint();
        content_checksum(&[self.id.as_bytes(), parent.as_bytes(), &upgrade])
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RevisionChainError {
    #[error("chain has no revisions")]
    Empty,

    #[error("revision id '{0}' appears twice")]
    DuplicateId(String),

    #[error("chain must have exactly one root (revision without parent), found {0}")]
    RootCount(usize),

    #[error("revision '{revision}' names unknown parent '{parent}'")]
    UnknownParent { revision: String, parent: String },

    #[error("revision '{parent}' has more than one child: {children}")]
    Fork { parent: String, children: String },

    #[error("revisions not reachable from the root: {0}")]
    Unreachable(String),
}

/// A validated, linearized chain: root first, head last.
#[derive(Debug, Clone)]
pub struct RevisionChain {
    revisions: Vec<ChainRevision>,
}

impl RevisionChain {
    pub fn new(revisions: Vec<ChainRevision>) -> Result<Self, RevisionChainError> {
        if revisions.is_empty() {
            return Err(RevisionChainError::Empty);
        }

        let mut ids = FxHashSet::default();
        for rev in &revisions {
            if !ids.insert(rev.id.as_str()) {
                return Err(RevisionChainError::DuplicateId(rev.id.clone()));
            }
        }

        let roots: Vec<&ChainRevision> = revisions.iter().filter(|r| r.parent.is_none()).collect();
        if roots.len() != 1 {
            return Err(RevisionChainError::RootCount(roots.len()));
        }
        let root_id = roots[0].id.clone();

        let mut children: FxHashMap<&str, Vec<&str>> = FxHashMap::default();
        for rev in &revisions {
            if let Some(parent) = rev.parent.as_deref() {
                if !ids.contains(parent) {
                    return Err(RevisionChainError::UnknownParent {
                        revision: rev.id.clone(),
                        parent: parent.to_string(),
                    });
                }
                children.entry(parent).or_default().push(rev.id.as_str());
            }
        }
        if let Some((parent, kids)) = children.iter().find(|(_, kids)| kids.len() > 1) {
            let mut kids = kids.clone();
            kids.sort_unstable();
            return Err(RevisionChainError::Fork {
                parent: parent.to_string(),
                children: kids.join(", "),
            });
        }

        let mut order: Vec<String> = vec![root_id];
        while let Some(next) = order
            .last()
            .and_then(|id| children.get(id.as_str()))
            .and_then(|kids| kids.first())
        {
            if order.iter().any(|seen| seen == next) {
                break;
            }
            order.push(next.to_string());
        }
        if order.len() != revisions.len() {
            let reached: FxHashSet<&str> = order.iter().map(String::as_str).collect();
            let mut missing: Vec<&str> = revisions
                .iter()
                .map(|r| r.id.as_str())
                .filter(|id| !reached.contains(id))
                .collect();
            missing.sort_unstable();
            return Err(RevisionChainError::Unreachable(missing.join(", ")));
        }

        let mut by_id: FxHashMap<String, ChainRevision> =
            revisions.into_iter().map(|r| (r.id.clone(), r)).collect();
        let revisions = order
            .iter()
            .filter_map(|id| by_id.remove(id))
            .collect();
        Ok(Self { revisions })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file: ChainFile = toml::from_str(content)?;
        let revisions = file
            .revision
            .into_iter()
            .map(|def| ChainRevision {
                id: def.id,
                parent: def.parent,
                message: def.message,
                upgrade: RevisionAction::Sql(def.upgrade),
                downgrade: def.downgrade.map(RevisionAction::Sql),
            })
            .collect();
        Self::new(revisions).map_err(|e| ConfigError::Chain {
            path: PathBuf::new(),
            message: e.to_string(),
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            ConfigError::Chain { message, .. } => ConfigError::Chain {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })
    }

    pub fn revisions(&self) -> &[ChainRevision] {
        &self.revisions
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.revisions.iter().position(|r| r.id == id)
    }

    pub fn head(&self) -> Option<&ChainRevision> {
        self.revisions.last()
    }

    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct ChainFile {
    #[serde(default)]
    revision: Vec<RevisionDef>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RevisionDef {
    id: String,
    #[serde(default)]
    parent: Option<String>,
    #[serde(default)]
    message: String,
    upgrade: String,
    #[serde(default)]
    downgrade: Option<String>,
}

#[derive(Debug, Clone)]
struct HistoryRow {
    revision: String,
    checksum: String,
    applied_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct StoredState {
    head: Option<String>,
    active: Vec<HistoryRow>,
    in_flight: Option<(String, String)>,
}

pub struct RevisionChainAdapter {
    service_id: ServiceId,
    database: PathBuf,
    chain: RevisionChain,
    clock: Arc<dyn Clock>,
}

impl RevisionChainAdapter {
    pub fn new(service_id: ServiceId, database: impl Into<PathBuf>, chain: RevisionChain) -> Self {
        Self {
            service_id,
            database: database.into(),
            chain,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn chain(&self) -> &RevisionChain {
        &self.chain
    }

    fn read_state(&self, conn: &Connection) -> AdapterResult<StoredState> {
        let unreadable = |e: rusqlite::Error| state_unreadable(&self.service_id, e);
        let mut state = StoredState::default();

        if table_exists(conn, "revision_head").map_err(unreadable)? {
            state.head = conn
                .query_row("SELECT revision FROM revision_head WHERE singleton = 1", [], |row| {
                    row.get(0)
                })
                .optional()
                .map_err(unreadable)?;
        }

        if table_exists(conn, "revision_history").map_err(unreadable)? {
            let mut stmt = conn
                .prepare(
                    "SELECT revision, checksum, applied_at FROM revision_history
                     WHERE reverted_at IS NULL ORDER BY id",
                )
                .map_err(unreadable)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
                })
                .map_err(unreadable)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(unreadable)?;
            for (revision, checksum, applied_at) in rows {
                let applied_at = parse_timestamp(&applied_at).map_err(|e| {
                    state_unreadable(&self.service_id, format!("revision {revision}: {e}"))
                })?;
                state.active.push(HistoryRow {
                    revision,
                    checksum,
                    applied_at,
                });
            }
        }

        if table_exists(conn, "revision_in_flight").map_err(unreadable)? {
            state.in_flight = conn
                .query_row(
                    "SELECT revision, direction FROM revision_in_flight LIMIT 1",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .map_err(unreadable)?;
        }

        Ok(state)
    }

    fn load(&self) -> AdapterResult<(StoredState, AdapterStatus)> {
        let conn = open_read_only(&self.service_id, &self.database)?;
        let state = self.read_state(&conn)?;
        let status = compute_status(&self.chain, &state);
        Ok((state, status))
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

    fn mark_in_flight(
        &self,
        conn: &Connection,
        revision: &str,
        direction: &str,
        at: &DateTime<Utc>,
    ) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT OR REPLACE INTO revision_in_flight (revision, direction, started_at)
             VALUES (?1, ?2, ?3)",
            params![revision, direction, format_timestamp(at)],
        )?;
        Ok(())
    }

    fn clear_in_flight(&self, conn: &Connection, revision: &str) -> rusqlite::Result<()> {
        conn.execute(
            "DELETE FROM revision_in_flight WHERE revision = ?1",
            [revision],
        )?;
        Ok(())
    }

    fn settle(&self, conn: &Connection, revision: &str) -> AdapterResult<()> {
        self.clear_in_flight(conn, revision).map_err(|e| {
            state_unreadable(
                &self.service_id,
                format!("revision {revision} settled but its in-flight marker remains: {e}"),
            )
        })
    }
}

fn compute_status(chain: &RevisionChain, state: &StoredState) -> AdapterStatus {
    let mut problems = Vec::new();

    if let Some((revision, direction)) = &state.in_flight {
        problems.push(format!(
            "revision {revision} was interrupted during {direction}; inspect the database and clear revision_in_flight"
        ));
    }

    let applied_len = match state.head.as_deref() {
        None => 0,
        Some(head) => match chain.position(head) {
            Some(pos) => pos + 1,
            None => {
                problems.push(format!("head revision '{head}' is not part of the chain"));
                0
            }
        },
    };
    let applied = &chain.revisions()[..applied_len];

    for rev in applied {
        if let Some(row) = state.active.iter().rev().find(|row| row.revision == rev.id) {
            if row.checksum != rev.checksum() {
                problems.push(format!(
                    "revision {} changed since it was applied",
                    rev.id
                ));
            }
        }
    }

    AdapterStatus {
        applied: applied
            .iter()
            .map(|r| RevisionId::Label(r.id.clone()))
            .collect(),
        pending: chain.revisions()[applied_len..]
            .iter()
            .map(|r| RevisionId::Label(r.id.clone()))
            .collect(),
        consistency: if problems.is_empty() {
            Consistency::Consistent
        } else {
            Consistency::Inconsistent {
                reason: problems.join("; "),
            }
        },
    }
}

impl ServiceAdapter for RevisionChainAdapter {
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
        Ok(self.load()?.1)
    }

    fn apply_next(&self) -> AdapterResult<MigrationRecord> {
        let (_, status) = self.load()?;
        self.ensure_consistent(&status)?;
        let position = status.applied.len();
        let Some(rev) = self.chain.revisions().get(position) else {
            return Err(AdapterError::NothingPending {
                service: self.service_id.clone(),
            });
        };

        let revision = RevisionId::Label(rev.id.clone());
        let apply_failed = |cause: String| AdapterError::ApplyFailed {
            service: self.service_id.clone(),
            revision: revision.clone(),
            cause,
        };
        let checksum = rev.checksum();

        let mut conn = open_read_write(&self.service_id, &self.database)?;
        conn.execute_batch(STATE_SCHEMA_SQL)
            .map_err(|e| apply_failed(e.to_string()))?;
        let applied_at = self.clock.now();
        self.mark_in_flight(&conn, &rev.id, "upgrade", &applied_at)
            .map_err(|e| apply_failed(e.to_string()))?;

        let result = in_transaction(&mut conn, |tx| {
            rev.upgrade.run(tx)?;
            tx.execute(
                "INSERT OR REPLACE INTO revision_head (singleton, revision) VALUES (1, ?1)",
                [&rev.id],
            )?;
            tx.execute(
                "INSERT INTO revision_history (revision, parent, checksum, applied_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![rev.id, rev.parent, checksum, format_timestamp(&applied_at)],
            )?;
            Ok(())
        });

        match result {
            Ok(()) => {
                self.settle(&conn, &rev.id)?;
                info!(service = %self.service_id, revision = %rev.id, "Revision applied");
                Ok(MigrationRecord {
                    service_id: self.service_id.clone(),
                    revision_id: revision,
                    applied_at,
                    checksum,
                    reverted_at: None,
                })
            }
            Err(e) => {
                if let Err(clear) = self.clear_in_flight(&conn, &rev.id) {
                    warn!(service = %self.service_id, revision = %rev.id, error = %clear, "In-flight marker left after failed apply");
                }
                warn!(service = %self.service_id, revision = %rev.id, error = %e, "Revision failed");
                Err(apply_failed(e.to_string()))
            }
        }
    }

    fn rollback_last(&self) -> AdapterResult<MigrationRecord> {
        let (state, status) = self.load()?;
        self.ensure_consistent(&status)?;
        let rollback_failed = |cause: RollbackCause| AdapterError::RollbackFailed {
            service: self.service_id.clone(),
            cause,
        };
        let Some(position) = status.applied.len().checked_sub(1) else {
            return Err(rollback_failed(RollbackCause::NothingApplied));
        };
        let rev = &self.chain.revisions()[position];
        let revision = RevisionId::Label(rev.id.clone());
        let downgrade = rev.downgrade.as_ref().ok_or_else(|| {
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

        let mut conn = open_read_write(&self.service_id, &self.database)?;
        conn.execute_batch(STATE_SCHEMA_SQL)
            .map_err(|e| db_error(e.to_string()))?;
        let reverted_at = self.clock.now();
        self.mark_in_flight(&conn, &rev.id, "downgrade", &reverted_at)
            .map_err(|e| db_error(e.to_string()))?;

        let result = in_transaction(&mut conn, |tx| {
            downgrade.run(tx)?;
            match &rev.parent {
                Some(parent) => {
                    tx.execute(
                        "INSERT OR REPLACE INTO revision_head (singleton, revision) VALUES (1, ?1)",
                        [parent],
                    )?;
                }
                None => {
                    tx.execute("DELETE FROM revision_head", [])?;
                }
            }
            tx.execute(
                "UPDATE revision_history SET reverted_at = ?1
                 WHERE revision = ?2 AND reverted_at IS NULL",
                params![format_timestamp(&reverted_at), rev.id],
            )?;
            Ok(())
        });

        match result {
            Ok(()) => {
                self.settle(&conn, &rev.id)?;
                info!(service = %self.service_id, revision = %rev.id, "Revision rolled back");
                let applied_at = state
                    .active
                    .iter()
                    .rev()
                    .find(|row| row.revision == rev.id)
                    .map(|row| row.applied_at)
                    .unwrap_or(reverted_at);
                Ok(MigrationRecord {
                    service_id: self.service_id.clone(),
                    revision_id: revision,
                    applied_at,
                    checksum: rev.checksum(),
                    reverted_at: Some(reverted_at),
                })
            }
            Err(e) => {
                if let Err(clear) = self.clear_in_flight(&conn, &rev.id) {
                    warn!(service = %self.service_id, revision = %rev.id, error = %clear, "In-flight marker left after failed rollback");
                }
                Err(db_error(e.to_string()))
            }
        }
    }
}
