//! Restoring a service database from a backup artifact.

use convoy_core::errors::{BackupError, OrchestratorError, OrchestratorResult};
use convoy_core::traits::ServiceAdapter;
use convoy_core::types::{display_revision, AuditOperation, AuditOutcome, BackupArtifact, ServiceId};

use super::lease::LockLease;
use super::report::{RunError, RunKind, RunReport};
use super::run::{RunContext, ServiceRun};
use super::state::ServiceState;
use super::Orchestrator;

impl Orchestrator {
    /// Replace `service`'s database with the contents of `artifact_id`.
    /// The current database is snapshotted first, so a restore can itself
    /// be undone.
    pub fn restore_service(
        &self,
        service: &ServiceId,
        artifact_id: &str,
    ) -> Result<RunReport, RunError> {
        let mut ctx = RunContext::start(self, RunKind::Restore)?;
        let prepared = self.adapter(service).cloned().and_then(|adapter| {
            let artifact = self.backups.get(artifact_id)?;
            if &artifact.service_id != service {
                return Err(BackupError::NotFound(format!(
                    "{artifact_id} belongs to {}, not {service}",
                    artifact.service_id
                ))
                .into());
            }
            Ok((adapter, artifact))
        });
        let (adapter, artifact) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => return Err(ctx.fail(e)),
        };

        let mut svc = ServiceRun::new(service.clone(), None);
        let result = self.with_service_lock(&ctx, &mut svc, |svc, lease| {
            self.restore_locked(&ctx, adapter.as_ref(), &artifact, svc, lease)
        });
        if let Err(e) = &result {
            svc.fail(e);
        }
        ctx.push(svc);
        match result {
            Ok(()) => ctx.finish(),
            Err(e) => Err(ctx.fail(e)),
        }
    }

    fn restore_locked(
        &self,
        ctx: &RunContext<'_>,
        adapter: &dyn ServiceAdapter,
        artifact: &BackupArtifact,
        svc: &mut ServiceRun,
        lease: &mut LockLease<'_>,
    ) -> OrchestratorResult<()> {
        // Restoring is how a blocked service gets unstuck, so inconsistent
        // or unreadable state does not stop it.
        let before = adapter.status().ok().and_then(|s| s.current().cloned());
        svc.report.from = before.clone();
        svc.report.to = before;

        svc.advance(ServiceState::BackingUp);
        self.snapshot(ctx, adapter, svc, lease)?;

        svc.advance(ServiceState::Applying);
        self.heartbeat(ctx, svc, lease)?;
        if let Err(e) = self.backups.restore(artifact, adapter.backup_source()) {
            ctx.record_failure(svc, AuditOperation::Restore, AuditOutcome::Failed, e.to_string());
            return Err(e.into());
        }
        ctx.record(
            svc,
            AuditOperation::Restore,
            AuditOutcome::Ok,
            format!("restored from {}", artifact.id),
        )?;

        svc.advance(ServiceState::Verifying);
        let status = match adapter.status() {
            Ok(status) => status,
            Err(e) => {
                ctx.record_failure(svc, AuditOperation::Verify, AuditOutcome::Failed, e.to_string());
                return Err(e.into());
            }
        };
        svc.report.to = status.current().cloned();
        if let Some(reason) = status.inconsistency() {
            let err = OrchestratorError::VerificationMismatch {
                service: svc.id().clone(),
                expected: "consistent state".to_string(),
                actual: reason.to_string(),
            };
            ctx.record_failure(svc, AuditOperation::Verify, AuditOutcome::Mismatch, err.to_string());
            return Err(err);
        }
        ctx.record(
            svc,
            AuditOperation::Verify,
            AuditOutcome::Ok,
            format!("at {}", display_revision(status.current())),
        )
    }
}
