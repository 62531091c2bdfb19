//! Applied-revision records and adapter status snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{display_revision, RevisionId, ServiceId};

/// One applied schema change, as recorded by the adapter's own store.
/// Rollback marks it reverted; records are never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub service_id: ServiceId,
    pub revision_id: RevisionId,
    pub applied_at: DateTime<Utc>,
    pub checksum: String,
    pub reverted_at: Option<DateTime<Utc>>,
}

impl MigrationRecord {
    pub fn is_reverted(&self) -> bool {
        self.reverted_at.is_some()
    }
}

/// Whether the engine's own bookkeeping is in a state convoy may act on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Consistency {
    Consistent,
    /// Half-applied or otherwise contradictory local state.
    Inconsistent { reason: String },
}

/// Result of `ServiceAdapter::status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterStatus {
    /// Applied revisions, oldest first. The last one is the head.
    pub applied: Vec<RevisionId>,
    /// Revisions defined but not yet applied, in application order.
    pub pending: Vec<RevisionId>,
    pub consistency: Consistency,
}

impl AdapterStatus {
    pub fn consistent(applied: Vec<RevisionId>, pending: Vec<RevisionId>) -> Self {
        Self {
            applied,
            pending,
            consistency: Consistency::Consistent,
        }
    }

    pub fn current(&self) -> Option<&RevisionId> {
        self.applied.last()
    }

    /// Head once every pending revision is applied.
    pub fn latest_available(&self) -> Option<&RevisionId> {
        self.pending.last().or_else(|| self.current())
    }

    pub fn is_consistent(&self) -> bool {
        matches!(self.consistency, Consistency::Consistent)
    }

    pub fn inconsistency(&self) -> Option<&str> {
        match &self.consistency {
            Consistency::Consistent => None,
            Consistency::Inconsistent { reason } => Some(reason),
        }
    }

    pub fn current_display(&self) -> String {
        display_revision(self.current())
    }
}
