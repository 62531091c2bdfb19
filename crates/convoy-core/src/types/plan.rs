//! Migration plans. Transient, built per run, never persisted.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::ids::{RevisionId, ServiceId};

/// One service's share of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanStep {
    pub service_id: ServiceId,
    pub current: Option<RevisionId>,
    pub pending: Vec<RevisionId>,
    /// Set when the engine reported inconsistent state at planning time.
    pub blocked: Option<String>,
}

impl PlanStep {
    /// Revision the service should sit at once the step completes.
    pub fn target(&self) -> Option<&RevisionId> {
        self.pending.last().or(self.current.as_ref())
    }

    pub fn is_noop(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Services in declared dependency order, each with its pending revisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationPlan {
    pub created_at: DateTime<Utc>,
    pub steps: Vec<PlanStep>,
}

impl MigrationPlan {
    pub fn step(&self, service: &ServiceId) -> Option<&PlanStep> {
        self.steps.iter().find(|s| &s.service_id == service)
    }

    pub fn total_pending(&self) -> usize {
        self.steps.iter().map(|s| s.pending.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_pending() == 0
    }
}
