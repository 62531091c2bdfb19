//! Operator maintenance: breaking stale locks, pruning and pinning backups.
//! Each action is audited; none of them touch a service database.

use tracing::info;

use convoy_core::errors::OrchestratorResult;
use convoy_core::types::{
    AuditOperation, AuditOutcome, BackupArtifact, LockInfo, NewAuditEntry, ServiceId,
};

use crate::backup::PruneReport;

use super::Orchestrator;

impl Orchestrator {
    /// Remove the lock on `service` whoever holds it.
    pub fn break_lock(&self, service: &ServiceId) -> OrchestratorResult<Option<LockInfo>> {
        self.adapter(service)?;
        let removed = self.locks.force_release(service)?;
        let detail = match &removed {
            Some(info) => format!("removed lock held by {} until {}", info.holder_id, info.expires_at),
            None => "no lock present".to_string(),
        };
        self.audit.append(
            NewAuditEntry::new(self.actor.as_str(), AuditOperation::Lock, AuditOutcome::Forced)
                .service(service)
                .detail(detail),
        )?;
        Ok(removed)
    }

    /// Apply retention to one service, or to every service when `None`.
    pub fn prune_backups(&self, service: Option<&ServiceId>) -> OrchestratorResult<Vec<PruneReport>> {
        let targets: Vec<ServiceId> = match service {
            Some(service) => {
                self.adapter(service)?;
                vec![service.clone()]
            }
            None => self.service_ids().cloned().collect(),
        };

        let mut reports = Vec::with_capacity(targets.len());
        for service in &targets {
            let report = self.backups.prune(service)?;
            self.audit.append(
                NewAuditEntry::new(self.actor.as_str(), AuditOperation::Prune, AuditOutcome::Ok)
                    .service(service)
                    .detail(format!(
                        "kept {}, pinned {}, removed [{}]",
                        report.kept.len(),
                        report.pinned.len(),
                        report.removed.join(", ")
                    )),
            )?;
            reports.push(report);
        }
        Ok(reports)
    }

    pub fn set_backup_pinned(&self, artifact_id: &str, pinned: bool) -> OrchestratorResult<BackupArtifact> {
        let artifact = self.backups.set_pinned(artifact_id, pinned)?;
        self.audit.append(
            NewAuditEntry::new(self.actor.as_str(), AuditOperation::Backup, AuditOutcome::Ok)
                .service(&artifact.service_id)
                .detail(format!(
                    "{} {}",
                    if pinned { "pinned" } else { "unpinned" },
                    artifact.id
                )),
        )?;
        info!(artifact = %artifact.id, pinned, "Backup pin changed");
        Ok(artifact)
    }
}
