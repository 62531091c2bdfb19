//! Run reports: the structured summary handed back to the caller (and to the
//! notifier) after every apply, rollback or restore.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use convoy_core::errors::OrchestratorError;
use convoy_core::types::{display_revision, RevisionId, RunId, ServiceId};

use super::state::ServiceState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Apply,
    Rollback,
    Restore,
}

impl RunKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Apply => "apply",
            Self::Rollback => "rollback",
            Self::Restore => "restore",
        }
    }
}

/// Where the pre-mutation snapshot of a service went.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupPointer {
    pub artifact_id: String,
    pub storage_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceReport {
    pub service_id: ServiceId,
    pub state: ServiceState,
    pub from: Option<RevisionId>,
    pub to: Option<RevisionId>,
    pub applied: Vec<RevisionId>,
    pub reverted: Vec<RevisionId>,
    pub backup: Option<BackupPointer>,
    /// First and last audit sequence numbers this service produced in the run.
    pub first_audit_seq: Option<i64>,
    pub last_audit_seq: Option<i64>,
    pub error: Option<String>,
}

impl ServiceReport {
    pub fn new(service_id: ServiceId, from: Option<RevisionId>) -> Self {
        Self {
            service_id,
            state: ServiceState::Idle,
            to: from.clone(),
            from,
            applied: Vec::new(),
            reverted: Vec::new(),
            backup: None,
            first_audit_seq: None,
            last_audit_seq: None,
            error: None,
        }
    }

    pub(crate) fn note_audit(&mut self, sequence_no: i64) {
        self.first_audit_seq.get_or_insert(sequence_no);
        self.last_audit_seq = Some(sequence_no);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: RunId,
    pub kind: RunKind,
    pub actor: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Services the run reached, in the order it reached them.
    pub services: Vec<ServiceReport>,
    pub error: Option<String>,
    pub exit_code: i32,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    pub fn service(&self, id: &ServiceId) -> Option<&ServiceReport> {
        self.services.iter().find(|s| &s.service_id == id)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let outcome = match &self.error {
            None => "ok".to_string(),
            Some(error) => format!("failed (exit {}): {error}", self.exit_code),
        };
        writeln!(
            f,
            "run {} ({}) by {}: {outcome}",
            self.run_id.short(),
            self.kind.as_str(),
            self.actor
        )?;
        writeln!(
            f,
            "{:<20} {:<11} {:<14} {:<14} {:>5}  BACKUP",
            "SERVICE", "STATE", "FROM", "TO", "STEPS"
        )?;
        for svc in &self.services {
            let steps = svc.applied.len() + svc.reverted.len();
            let backup = svc
                .backup
                .as_ref()
                .map(|b| b.artifact_id.as_str())
                .unwrap_or("-");
            writeln!(
                f,
                "{:<20} {:<11} {:<14} {:<14} {:>5}  {backup}",
                svc.service_id.as_str(),
                svc.state.as_str(),
                display_revision(svc.from.as_ref()),
                display_revision(svc.to.as_ref()),
                steps,
            )?;
            if let Some(error) = &svc.error {
                writeln!(f, "    error: {error}")?;
            }
        }
        Ok(())
    }
}

/// A run that stopped early. Carries the partial report so the caller can
/// still see what happened to each service.
#[derive(Debug, thiserror::Error)]
#[error("{source}")]
pub struct RunError {
    pub report: Box<RunReport>,
    pub source: OrchestratorError,
}

impl RunError {
    pub fn exit_code(&self) -> i32 {
        self.source.exit_code()
    }
}
