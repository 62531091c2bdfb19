//! Verified snapshots of service databases via the SQLite Backup API.
//!
//! A snapshot is copied page-range by page-range into a staging directory,
//! integrity-checked, checksummed with BLAKE3, then atomically renamed to its
//! final name and registered in `backup_registry`. Only a fully verified
//! artifact is ever visible or returned.

pub mod retention;
pub mod staging;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use rusqlite::backup::{Backup, StepResult};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info, warn};

use convoy_core::config::BackupConfig;
use convoy_core::errors::{BackupError, BackupResult};
use convoy_core::traits::Clock;
use convoy_core::types::time::{compact_timestamp, format_timestamp, parse_timestamp};
use convoy_core::types::{BackupArtifact, RunId, ServiceId};

use crate::coordinator_db::CoordinatorDb;

use self::staging::{StagingDir, STAGING_DIR};

const MANIFEST_FILE: &str = "manifest.json";
const BUSY_PAUSE: Duration = Duration::from_millis(10);
const MAX_BUSY_STEPS: u32 = 500;
/// Staging entries older than this belong to a dead process.
const STALE_STAGING_AGE: Duration = Duration::from_secs(24 * 60 * 60);

const SELECT_ARTIFACT: &str =
    "SELECT id, service_id, run_id, created_at, storage_path, checksum, size_bytes, verified, pinned
     FROM backup_registry";

/// Outcome of pruning one service's artifacts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    pub service_id: Option<ServiceId>,
    pub kept: Vec<String>,
    pub pinned: Vec<String>,
    pub removed: Vec<String>,
}

/// Why a staging attempt failed.
enum StageError {
    /// Worth another attempt.
    Retryable(String),
    /// The heartbeat asked to stop (usually: the lock was lost).
    Interrupted(String),
}

impl From<io::Error> for StageError {
    fn from(e: io::Error) -> Self {
        Self::Retryable(e.to_string())
    }
}

impl From<rusqlite::Error> for StageError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Retryable(e.to_string())
    }
}

pub struct BackupManager {
    db: CoordinatorDb,
    backup_dir: PathBuf,
    config: BackupConfig,
    clock: Arc<dyn Clock>,
}

impl BackupManager {
    pub fn new(
        db: CoordinatorDb,
        backup_dir: impl Into<PathBuf>,
        config: BackupConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            db,
            backup_dir: backup_dir.into(),
            config,
            clock,
        }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Snapshot `source` for `service`. See [`Self::snapshot_with_heartbeat`].
    pub fn snapshot(
        &self,
        service: &ServiceId,
        run_id: &RunId,
        source: &Path,
    ) -> BackupResult<BackupArtifact> {
        self.snapshot_with_heartbeat(service, run_id, source, &mut || Ok(()))
    }

    /// Snapshot `source`, calling `heartbeat` between copy steps. A heartbeat
    /// error aborts the snapshot immediately without retrying.
    pub fn snapshot_with_heartbeat(
        &self,
        service: &ServiceId,
        run_id: &RunId,
        source: &Path,
        heartbeat: &mut dyn FnMut() -> Result<(), String>,
    ) -> BackupResult<BackupArtifact> {
        let attempts = self.config.staging_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.stage(service, run_id, source, heartbeat) {
                Ok(artifact) => return Ok(artifact),
                Err(StageError::Interrupted(cause)) => {
                    warn!(service = %service, cause = %cause, "Backup interrupted");
                    return Err(BackupError::Failed {
                        service: service.clone(),
                        cause,
                    });
                }
                Err(StageError::Retryable(cause)) if attempt < attempts => {
                    warn!(service = %service, attempt, cause = %cause, "Backup attempt failed, retrying");
                    attempt += 1;
                }
                Err(StageError::Retryable(cause)) => {
                    warn!(service = %service, attempts, cause = %cause, "Backup failed");
                    return Err(BackupError::Failed {
                        service: service.clone(),
                        cause,
                    });
                }
            }
        }
    }

    fn stage(
        &self,
        service: &ServiceId,
        run_id: &RunId,
        source: &Path,
        heartbeat: &mut dyn FnMut() -> Result<(), String>,
    ) -> Result<BackupArtifact, StageError> {
        if !source.is_file() {
            return Err(StageError::Retryable(format!(
                "source database {} does not exist",
                source.display()
            )));
        }

        let created_at = self.clock.now();
        let id = self.unused_artifact_id(service, &created_at);
        let staging = StagingDir::create(self.backup_dir.join(STAGING_DIR).join(&id))?;
        let db_name = database_file_name(service);
        let staged_db = staging.path().join(&db_name);

        copy_database(source, &staged_db, self.config.pages_per_step, heartbeat)?;

        let result = integrity_check(&staged_db)?;
        if result != "ok" {
            return Err(StageError::Retryable(format!(
                "integrity check of staged copy failed: {result}"
            )));
        }

        let checksum = file_checksum(&staged_db)?;
        let size_bytes = std::fs::metadata(&staged_db)?.len();
        let final_dir = self.backup_dir.join(&id);
        let artifact = BackupArtifact {
            id: id.clone(),
            service_id: service.clone(),
            run_id: run_id.clone(),
            created_at,
            storage_path: final_dir.clone(),
            checksum,
            size_bytes,
            verified: true,
            pinned: false,
        };

        let manifest = serde_json::to_vec_pretty(&artifact)
            .map_err(|e| StageError::Retryable(format!("manifest: {e}")))?;
        std::fs::write(staging.path().join(MANIFEST_FILE), manifest)?;

        staging.persist(&final_dir)?;

        // The rename must not have changed a byte.
        let moved = file_checksum(&final_dir.join(&db_name)).map_err(StageError::from);
        let registered = moved.and_then(|sum| {
            if sum != artifact.checksum {
                return Err(StageError::Retryable(format!(
                    "checksum changed after move: {} != {}",
                    sum, artifact.checksum
                )));
            }
            self.register(&artifact).map_err(StageError::from)
        });
        if let Err(e) = registered {
            if let Err(cleanup) = std::fs::remove_dir_all(&final_dir) {
                warn!(path = %final_dir.display(), error = %cleanup, "Failed to remove unregistered artifact");
            }
            return Err(e);
        }

        info!(
            service = %service,
            artifact = %artifact.id,
            size = artifact.size_bytes,
            "Backup created"
        );
        Ok(artifact)
    }

    /// Copy `artifact` back over `dest`. The artifact is re-verified first; a
    /// checksum or integrity failure leaves `dest` untouched. The copy is
    /// staged next to `dest` and renamed over it, so a failed copy never
    /// leaves a half-written database.
    pub fn restore(&self, artifact: &BackupArtifact, dest: &Path) -> BackupResult<()> {
        let stored = database_path(artifact);
        if !stored.is_file() {
            return Err(BackupError::NotFound(artifact.id.clone()));
        }

        let corrupted = |reason: String| BackupError::Corrupted {
            artifact_id: artifact.id.clone(),
            reason,
        };
        let checksum = file_checksum(&stored).map_err(|e| corrupted(e.to_string()))?;
        if checksum != artifact.checksum {
            return Err(corrupted(format!(
                "checksum {checksum} does not match recorded {}",
                artifact.checksum
            )));
        }
        let result = integrity_check(&stored).map_err(|e| corrupted(e.to_string()))?;
        if result != "ok" {
            return Err(corrupted(format!("integrity check: {result}")));
        }

        let failed = |cause: String| BackupError::Failed {
            service: artifact.service_id.clone(),
            cause,
        };
        match self.stage_restore(&stored, dest) {
            Ok(()) => {}
            Err(StageError::Retryable(cause) | StageError::Interrupted(cause)) => {
                return Err(failed(cause))
            }
        }

        info!(service = %artifact.service_id, artifact = %artifact.id, dest = %dest.display(), "Restored from backup");
        Ok(())
    }

    fn stage_restore(&self, stored: &Path, dest: &Path) -> Result<(), StageError> {
        let parent = match dest.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let file_name = dest
            .file_name()
            .ok_or_else(|| StageError::Retryable(format!("{} is not a file path", dest.display())))?;
        let staging = StagingDir::create(parent.join(format!(
            ".{}.restore",
            file_name.to_string_lossy()
        )))?;
        let staged_db = staging.path().join(file_name);

        copy_database(stored, &staged_db, self.config.pages_per_step, &mut || Ok(()))?;
        let result = integrity_check(&staged_db)?;
        if result != "ok" {
            return Err(StageError::Retryable(format!(
                "integrity check of restored copy failed: {result}"
            )));
        }

        std::fs::rename(&staged_db, dest)?;
        // Journal files of the replaced database must not be replayed onto
        // the restored one.
        for suffix in ["-wal", "-shm", "-journal"] {
            let mut sidecar = dest.as_os_str().to_owned();
            sidecar.push(suffix);
            match std::fs::remove_file(&sidecar) {
                Ok(()) => debug!(path = ?sidecar, "Removed stale journal file"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Artifacts newest first, optionally for one service.
    pub fn list(&self, service: Option<&ServiceId>) -> BackupResult<Vec<BackupArtifact>> {
        let conn = self.db.connect().map_err(storage)?;
        let raw = match service {
            Some(service) => collect_artifacts(
                &conn,
                &format!("{SELECT_ARTIFACT} WHERE service_id = ?1 ORDER BY created_at DESC, id DESC"),
                [service.as_str()],
            ),
            None => collect_artifacts(
                &conn,
                &format!("{SELECT_ARTIFACT} ORDER BY created_at DESC, id DESC"),
                params![],
            ),
        }
        .map_err(storage)?;
        raw.into_iter().map(RawArtifact::into_artifact).collect()
    }

    pub fn get(&self, id: &str) -> BackupResult<BackupArtifact> {
        let conn = self.db.connect().map_err(storage)?;
        conn.query_row(
            &format!("{SELECT_ARTIFACT} WHERE id = ?1"),
            [id],
            RawArtifact::from_row,
        )
        .optional()
        .map_err(storage)?
        .ok_or_else(|| BackupError::NotFound(id.to_string()))?
        .into_artifact()
    }

    pub fn latest(&self, service: &ServiceId) -> BackupResult<Option<BackupArtifact>> {
        Ok(self.list(Some(service))?.into_iter().next())
    }

    /// Pinned artifacts survive every prune.
    pub fn set_pinned(&self, id: &str, pinned: bool) -> BackupResult<BackupArtifact> {
        let conn = self.db.connect().map_err(storage)?;
        let updated = conn
            .execute(
                "UPDATE backup_registry SET pinned = ?1 WHERE id = ?2",
                params![pinned as i64, id],
            )
            .map_err(storage)?;
        if updated == 0 {
            return Err(BackupError::NotFound(id.to_string()));
        }
        debug!(artifact = id, pinned, "Artifact pin updated");
        self.get(id)
    }

    /// Apply tiered retention to one service's artifacts. Only ever deletes
    /// artifacts of `service`, and never a pinned one.
    pub fn prune(&self, service: &ServiceId) -> BackupResult<PruneReport> {
        let (pinned, candidates): (Vec<_>, Vec<_>) =
            self.list(Some(service))?.into_iter().partition(|a| a.pinned);
        let keep = retention::select_retained(&candidates, &self.config);

        let mut report = PruneReport {
            service_id: Some(service.clone()),
            pinned: pinned.into_iter().map(|a| a.id).collect(),
            ..PruneReport::default()
        };
        let conn = self.db.connect().map_err(storage)?;
        for artifact in candidates {
            if keep.contains(&artifact.id) {
                report.kept.push(artifact.id);
                continue;
            }
            match std::fs::remove_dir_all(&artifact.storage_path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(BackupError::Storage {
                        message: format!("remove {}: {e}", artifact.storage_path.display()),
                    })
                }
            }
            conn.execute("DELETE FROM backup_registry WHERE id = ?1", [&artifact.id])
                .map_err(storage)?;
            debug!(service = %service, artifact = %artifact.id, "Artifact pruned");
            report.removed.push(artifact.id);
        }

        let now = SystemTime::from(self.clock.now());
        match staging::sweep_stale(&self.backup_dir, now, STALE_STAGING_AGE) {
            Ok(0) => {}
            Ok(n) => info!(removed = n, "Stale staging entries removed"),
            Err(e) => warn!(error = %e, "Failed to sweep staging directory"),
        }

        info!(
            service = %service,
            kept = report.kept.len(),
            pinned = report.pinned.len(),
            removed = report.removed.len(),
            "Backups pruned"
        );
        Ok(report)
    }

    fn register(&self, artifact: &BackupArtifact) -> rusqlite::Result<()> {
        let conn = self.db.connect()?;
        conn.execute(
            "INSERT INTO backup_registry
                (id, service_id, run_id, created_at, storage_path, checksum,
                 size_bytes, verified, pinned)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                artifact.id,
                artifact.service_id.as_str(),
                artifact.run_id.as_str(),
                format_timestamp(&artifact.created_at),
                artifact.storage_path.display().to_string(),
                artifact.checksum,
                artifact.size_bytes,
                artifact.verified as i64,
                artifact.pinned as i64,
            ],
        )?;
        Ok(())
    }

    fn unused_artifact_id(&self, service: &ServiceId, created_at: &DateTime<Utc>) -> String {
        let base = format!("{service}_{}", compact_timestamp(created_at));
        let taken = |id: &str| {
            self.backup_dir.join(id).exists()
                || self.backup_dir.join(STAGING_DIR).join(id).exists()
                || self.get(id).is_ok()
        };
        if !taken(&base) {
            return base;
        }
        let mut n = 1;
        loop {
            let candidate = format!("{base}_{n}");
            if !taken(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }
}

/// Database file inside an artifact directory.
pub fn database_path(artifact: &BackupArtifact) -> PathBuf {
    artifact
        .storage_path
        .join(database_file_name(&artifact.service_id))
}

fn database_file_name(service: &ServiceId) -> String {
    format!("{service}.db")
}

/// Page-stepped copy through the SQLite Backup API.
fn copy_database(
    source: &Path,
    dest: &Path,
    pages_per_step: i32,
    heartbeat: &mut dyn FnMut() -> Result<(), String>,
) -> Result<(), StageError> {
    let src = Connection::open_with_flags(source, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    let mut dst = Connection::open(dest)?;

    let backup = Backup::new(&src, &mut dst)?;
    let mut busy_steps = 0;
    loop {
        match backup.step(pages_per_step)? {
            StepResult::Done => break,
            StepResult::More => busy_steps = 0,
            _ => {
                busy_steps += 1;
                if busy_steps > MAX_BUSY_STEPS {
                    return Err(StageError::Retryable(format!(
                        "{} stayed busy during backup",
                        source.display()
                    )));
                }
                std::thread::sleep(BUSY_PAUSE);
            }
        }
        heartbeat().map_err(StageError::Interrupted)?;
    }
    Ok(())
}

fn integrity_check(path: &Path) -> rusqlite::Result<String> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    conn.pragma_query_value(None, "integrity_check", |row| row.get(0))
}

/// Streaming BLAKE3 of a file, hex encoded.
pub fn file_checksum(path: &Path) -> io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize().to_hex().to_string())
}

struct RawArtifact {
    id: String,
    service_id: String,
    run_id: String,
    created_at: String,
    storage_path: String,
    checksum: String,
    size_bytes: u64,
    verified: bool,
    pinned: bool,
}

impl RawArtifact {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            service_id: row.get(1)?,
            run_id: row.get(2)?,
            created_at: row.get(3)?,
            storage_path: row.get(4)?,
            checksum: row.get(5)?,
            size_bytes: row.get(6)?,
            verified: row.get::<_, i64>(7)? != 0,
            pinned: row.get::<_, i64>(8)? != 0,
        })
    }

    fn into_artifact(self) -> BackupResult<BackupArtifact> {
        let created_at = parse_timestamp(&self.created_at).map_err(|e| BackupError::Storage {
            message: format!("artifact {}: bad created_at '{}': {e}", self.id, self.created_at),
        })?;
        Ok(BackupArtifact {
            id: self.id,
            service_id: ServiceId::from(self.service_id),
            run_id: RunId::from(self.run_id.as_str()),
            created_at,
            storage_path: PathBuf::from(self.storage_path),
            checksum: self.checksum,
            size_bytes: self.size_bytes,
            verified: self.verified,
            pinned: self.pinned,
        })
    }
}

fn collect_artifacts<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> rusqlite::Result<Vec<RawArtifact>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, RawArtifact::from_row)?;
    rows.collect()
}

fn storage(e: rusqlite::Error) -> BackupError {
    BackupError::Storage {
        message: e.to_string(),
    }
}
