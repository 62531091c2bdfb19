//! Audit entries. Append-only: once written, no field ever changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{RunId, ServiceId};

/// Orchestration sub-operation an entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOperation {
    Plan,
    Run,
    Lock,
    Backup,
    Apply,
    Rollback,
    Verify,
    Restore,
    Prune,
}

impl AuditOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Run => "run",
            Self::Lock => "lock",
            Self::Backup => "backup",
            Self::Apply => "apply",
            Self::Rollback => "rollback",
            Self::Verify => "verify",
            Self::Restore => "restore",
            Self::Prune => "prune",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "plan" => Self::Plan,
            "run" => Self::Run,
            "lock" => Self::Lock,
            "backup" => Self::Backup,
            "apply" => Self::Apply,
            "rollback" => Self::Rollback,
            "verify" => Self::Verify,
            "restore" => Self::Restore,
            "prune" => Self::Prune,
            _ => return None,
        })
    }

    /// Operations that change a service database.
    pub fn is_mutating(&self) -> bool {
        matches!(self, Self::Apply | Self::Rollback | Self::Restore)
    }
}

/// How the sub-operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Started,
    Ok,
    Noop,
    Failed,
    Held,
    Acquired,
    Reclaimed,
    Released,
    Forced,
    Blocked,
    Mismatch,
    Unavailable,
    Cancelled,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Ok => "ok",
            Self::Noop => "noop",
            Self::Failed => "failed",
            Self::Held => "held",
            Self::Acquired => "acquired",
            Self::Reclaimed => "reclaimed",
            Self::Released => "released",
            Self::Forced => "forced",
            Self::Blocked => "blocked",
            Self::Mismatch => "mismatch",
            Self::Unavailable => "unavailable",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "started" => Self::Started,
            "ok" => Self::Ok,
            "noop" => Self::Noop,
            "failed" => Self::Failed,
            "held" => Self::Held,
            "acquired" => Self::Acquired,
            "reclaimed" => Self::Reclaimed,
            "released" => Self::Released,
            "forced" => Self::Forced,
            "blocked" => Self::Blocked,
            "mismatch" => Self::Mismatch,
            "unavailable" => Self::Unavailable,
            "cancelled" => Self::Cancelled,
            _ => return None,
        })
    }
}

/// An entry as stored, with its sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub sequence_no: i64,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub run_id: Option<RunId>,
    pub service_id: Option<ServiceId>,
    pub operation: AuditOperation,
    pub outcome: AuditOutcome,
    pub detail: String,
}

impl AuditEntry {
    /// Short label such as `apply:ok`, used in summaries and tests.
    pub fn label(&self) -> String {
        format!("{}:{}", self.operation.as_str(), self.outcome.as_str())
    }
}

/// An entry about to be appended. Sequence number and timestamp are assigned
/// by the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAuditEntry {
    pub actor: String,
    pub run_id: Option<RunId>,
    pub service_id: Option<ServiceId>,
    pub operation: AuditOperation,
    pub outcome: AuditOutcome,
    pub detail: String,
}

impl NewAuditEntry {
    pub fn new(actor: impl Into<String>, operation: AuditOperation, outcome: AuditOutcome) -> Self {
        Self {
            actor: actor.into(),
            run_id: None,
            service_id: None,
            operation,
            outcome,
            detail: String::new(),
        }
    }

    pub fn run(mut self, run_id: &RunId) -> Self {
        self.run_id = Some(run_id.clone());
        self
    }

    pub fn service(mut self, service_id: &ServiceId) -> Self {
        self.service_id = Some(service_id.clone());
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }
}
