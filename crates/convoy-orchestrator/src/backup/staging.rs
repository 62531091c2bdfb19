//! Staging directories for in-progress snapshots.
//!
//! A snapshot is written under `{backup_dir}/.staging/{id}/` and only moved to
//! `{backup_dir}/{id}/` once it is complete and checked. The guard removes the
//! staging directory on drop unless it was persisted, so a failed or
//! interrupted snapshot never leaves a partial artifact behind.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

pub const STAGING_DIR: &str = ".staging";

pub struct StagingDir {
    path: PathBuf,
    persisted: bool,
}

impl StagingDir {
    pub fn create(path: PathBuf) -> io::Result<Self> {
        if path.exists() {
            std::fs::remove_dir_all(&path)?;
        }
        std::fs::create_dir_all(&path)?;
        Ok(Self {
            path,
            persisted: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically move the staged directory to `dest`. `dest` must not exist
    /// and must be on the same filesystem.
    pub fn persist(mut self, dest: &Path) -> io::Result<()> {
        if dest.exists() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", dest.display()),
            ));
        }
        std::fs::rename(&self.path, dest)?;
        self.persisted = true;
        Ok(())
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if self.persisted {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to clean up staging directory");
            }
        } else {
            debug!(path = %self.path.display(), "Staging directory removed");
        }
    }
}

/// Remove staging leftovers last modified more than `max_age` before `now`
/// (e.g. from a killed process). Returns how many entries were removed.
pub fn sweep_stale(backup_dir: &Path, now: SystemTime, max_age: Duration) -> io::Result<usize> {
    let root = backup_dir.join(STAGING_DIR);
    let entries = match std::fs::read_dir(&root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut removed = 0;
    for entry in entries {
        let entry = entry?;
        let modified = entry.metadata()?.modified()?;
        let age = now.duration_since(modified).unwrap_or_default();
        if age >= max_age {
            let path = entry.path();
            if path.is_dir() {
                std::fs::remove_dir_all(&path)?;
            } else {
                std::fs::remove_file(&path)?;
            }
            warn!(path = %path.display(), "Removed stale staging entry");
            removed += 1;
        }
    }
    Ok(removed)
}
