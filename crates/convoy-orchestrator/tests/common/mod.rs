//! Shared fixtures: a scriptable in-process adapter backed by a real SQLite
//! file, a recording notifier, and an orchestrator wired to a manual clock.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{TimeZone, Utc};
use rusqlite::Connection;
use tempfile::TempDir;

use convoy_core::errors::{AdapterError, AdapterResult, RollbackCause};
use convoy_core::traits::{Clock, ManualClock, ServiceAdapter};
use convoy_core::types::{AdapterStatus, Consistency, MigrationRecord, RevisionId, ServiceId};
use convoy_orchestrator::{Orchestrator, OrchestratorBuilder, RunNotifier, RunReport};

pub fn start_time() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap()
}

/// Create an empty SQLite database at `path`.
pub fn create_db(path: &Path) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch("CREATE TABLE IF NOT EXISTS app_data (k TEXT PRIMARY KEY, v TEXT);")
        .unwrap();
}

#[derive(Default)]
struct Knobs {
    unavailable: bool,
    inconsistent: Option<String>,
    fail_on: Option<RevisionId>,
    no_down: bool,
    /// Report this revision instead of the one actually applied.
    misreport: Option<RevisionId>,
    apply_calls: usize,
    rollback_calls: usize,
    after_apply: Option<Box<dyn Fn(&RevisionId) + Send + Sync>>,
}

/// Adapter whose applied-revision count lives in its own database, so a
/// snapshot captures it and a restore brings it back.
pub struct FakeAdapter {
    id: ServiceId,
    database: PathBuf,
    revisions: Vec<RevisionId>,
    knobs: Mutex<Knobs>,
}

impl FakeAdapter {
    /// Service with revisions `1..=total`, `applied` of them already applied.
    pub fn numbered(dir: &Path, id: &str, total: u64, applied: usize) -> Arc<Self> {
        let revisions = (1..=total).map(RevisionId::Number).collect();
        Self::with_revisions(dir, id, revisions, applied)
    }

    pub fn with_revisions(
        dir: &Path,
        id: &str,
        revisions: Vec<RevisionId>,
        applied: usize,
    ) -> Arc<Self> {
        let database = dir.join(format!("{id}.db"));
        let conn = Connection::open(&database).unwrap();
        conn.execute_batch(
            "CREATE TABLE fake_head (singleton INTEGER PRIMARY KEY CHECK (singleton = 1),
                                     applied INTEGER NOT NULL);",
        )
        .unwrap();
        conn.execute(
            "INSERT INTO fake_head (singleton, applied) VALUES (1, ?1)",
            [applied as i64],
        )
        .unwrap();
        Arc::new(Self {
            id: ServiceId::from(id),
            database,
            revisions,
            knobs: Mutex::new(Knobs::default()),
        })
    }

    pub fn id(&self) -> &ServiceId {
        &self.id
    }

    pub fn applied_count(&self) -> usize {
        read_applied(&self.database).unwrap() as usize
    }

    pub fn current(&self) -> Option<RevisionId> {
        self.applied_count()
            .checked_sub(1)
            .map(|i| self.revisions[i].clone())
    }

    pub fn set_unavailable(&self, on: bool) {
        self.knobs.lock().unwrap().unavailable = on;
    }

    pub fn set_inconsistent(&self, reason: Option<&str>) {
        self.knobs.lock().unwrap().inconsistent = reason.map(str::to_string);
    }

    pub fn fail_on(&self, revision: impl Into<RevisionId>) {
        self.knobs.lock().unwrap().fail_on = Some(revision.into());
    }

    pub fn without_down_scripts(&self) {
        self.knobs.lock().unwrap().no_down = true;
    }

    pub fn misreport_as(&self, revision: impl Into<RevisionId>) {
        self.knobs.lock().unwrap().misreport = Some(revision.into());
    }

    pub fn after_apply(&self, hook: impl Fn(&RevisionId) + Send + Sync + 'static) {
        self.knobs.lock().unwrap().after_apply = Some(Box::new(hook));
    }

    pub fn apply_calls(&self) -> usize {
        self.knobs.lock().unwrap().apply_calls
    }

    pub fn rollback_calls(&self) -> usize {
        self.knobs.lock().unwrap().rollback_calls
    }

    fn write_applied(&self, n: usize) -> rusqlite::Result<()> {
        let conn = Connection::open(&self.database)?;
        conn.execute("UPDATE fake_head SET applied = ?1", [n as i64])?;
        Ok(())
    }

    fn unreadable(&self, e: rusqlite::Error) -> AdapterError {
        AdapterError::StateUnreadable {
            service: self.id.clone(),
            message: e.to_string(),
        }
    }

    fn record(&self, revision: RevisionId, reverted: bool) -> MigrationRecord {
        MigrationRecord {
            service_id: self.id.clone(),
            revision_id: revision,
            applied_at: start_time(),
            checksum: "0123456789abcdef".to_string(),
            reverted_at: reverted.then(start_time),
        }
    }
}

fn read_applied(path: &Path) -> rusqlite::Result<i64> {
    let conn = Connection::open(path)?;
    conn.query_row("SELECT applied FROM fake_head", [], |row| row.get(0))
}

impl ServiceAdapter for FakeAdapter {
    fn service_id(&self) -> &ServiceId {
        &self.id
    }

    fn engine(&self) -> &'static str {
        "fake"
    }

    fn backup_source(&self) -> &Path {
        &self.database
    }

    fn status(&self) -> AdapterResult<AdapterStatus> {
        let knobs = self.knobs.lock().unwrap();
        if knobs.unavailable {
            return Err(AdapterError::Unavailable {
                service: self.id.clone(),
                cause: "connection refused".to_string(),
            });
        }
        let n = read_applied(&self.database).map_err(|e| self.unreadable(e))? as usize;
        Ok(AdapterStatus {
            applied: self.revisions[..n].to_vec(),
            pending: self.revisions[n..].to_vec(),
            consistency: match &knobs.inconsistent {
                Some(reason) => Consistency::Inconsistent {
                    reason: reason.clone(),
                },
                None => Consistency::Consistent,
            },
        })
    }

    fn apply_next(&self) -> AdapterResult<MigrationRecord> {
        let mut knobs = self.knobs.lock().unwrap();
        knobs.apply_calls += 1;
        if let Some(reason) = &knobs.inconsistent {
            return Err(AdapterError::Blocked {
                service: self.id.clone(),
                reason: reason.clone(),
            });
        }
        let n = read_applied(&self.database).map_err(|e| self.unreadable(e))? as usize;
        let Some(revision) = self.revisions.get(n).cloned() else {
            return Err(AdapterError::NothingPending {
                service: self.id.clone(),
            });
        };
        if knobs.fail_on.as_ref() == Some(&revision) {
            return Err(AdapterError::ApplyFailed {
                service: self.id.clone(),
                revision,
                cause: "syntax error near \"ALTER\"".to_string(),
            });
        }
        self.write_applied(n + 1).map_err(|e| self.unreadable(e))?;
        if let Some(hook) = &knobs.after_apply {
            hook(&revision);
        }
        let reported = knobs.misreport.clone().unwrap_or(revision);
        Ok(self.record(reported, false))
    }

    fn rollback_last(&self) -> AdapterResult<MigrationRecord> {
        let mut knobs = self.knobs.lock().unwrap();
        knobs.rollback_calls += 1;
        let n = read_applied(&self.database).map_err(|e| self.unreadable(e))? as usize;
        let Some(revision) = n.checked_sub(1).map(|i| self.revisions[i].clone()) else {
            return Err(AdapterError::RollbackFailed {
                service: self.id.clone(),
                cause: RollbackCause::NothingApplied,
            });
        };
        if knobs.no_down {
            return Err(AdapterError::RollbackFailed {
                service: self.id.clone(),
                cause: RollbackCause::NoDownScript { revision },
            });
        }
        self.write_applied(n - 1).map_err(|e| self.unreadable(e))?;
        Ok(self.record(revision, true))
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    reports: Mutex<Vec<RunReport>>,
}

impl RecordingNotifier {
    pub fn reports(&self) -> Vec<RunReport> {
        self.reports.lock().unwrap().clone()
    }
}

impl RunNotifier for RecordingNotifier {
    fn notify(&self, report: &RunReport) {
        self.reports.lock().unwrap().push(report.clone());
    }
}

/// A temp directory with service databases under `services/` and
/// coordinator state under `state/`.
pub struct TestEnv {
    pub dir: TempDir,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<RecordingNotifier>,
}

impl TestEnv {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("services")).unwrap();
        Self {
            dir,
            clock: Arc::new(ManualClock::new(start_time())),
            notifier: Arc::new(RecordingNotifier::default()),
        }
    }

    pub fn services_dir(&self) -> PathBuf {
        self.dir.path().join("services")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.dir.path().join("state")
    }

    pub fn fake(&self, id: &str, total: u64, applied: usize) -> Arc<FakeAdapter> {
        FakeAdapter::numbered(&self.services_dir(), id, total, applied)
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// Builder with the manual clock, the recording notifier and a fixed
    /// actor, with `adapters` declared in the given order.
    pub fn builder(&self, actor: &str, adapters: &[&Arc<FakeAdapter>]) -> OrchestratorBuilder {
        let mut builder = Orchestrator::builder(self.state_dir())
            .actor(actor)
            .clock(self.clock())
            .notifier(self.notifier.clone());
        for adapter in adapters {
            let adapter: Arc<dyn ServiceAdapter> = (*adapter).clone();
            builder = builder.adapter(adapter);
        }
        builder
    }

    pub fn orchestrator(&self, adapters: &[&Arc<FakeAdapter>]) -> Orchestrator {
        self.builder("tester", adapters).build().unwrap()
    }
}
