//! Backup artifacts.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{RunId, ServiceId};

/// A verified point-in-time snapshot of one service database.
/// Stored under `{backup_dir}/{service_id}_{timestamp}/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupArtifact {
    pub id: String,
    pub service_id: ServiceId,
    pub run_id: RunId,
    pub created_at: DateTime<Utc>,
    pub storage_path: PathBuf,
    pub checksum: String,
    pub size_bytes: u64,
    pub verified: bool,
    /// Manually tagged artifacts are never pruned.
    pub pinned: bool,
}
