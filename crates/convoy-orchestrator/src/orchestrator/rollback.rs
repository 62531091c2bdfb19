//! Explicit, operator-initiated rollback of one service.

use convoy_core::errors::{AdapterError, OrchestratorError, OrchestratorResult, RollbackCause};
use convoy_core::traits::ServiceAdapter;
use convoy_core::types::{display_revision, AuditOperation, AuditOutcome, RevisionId, ServiceId};

use super::lease::LockLease;
use super::report::{RunError, RunKind, RunReport};
use super::run::{RunContext, ServiceRun};
use super::state::ServiceState;
use super::Orchestrator;

impl Orchestrator {
    /// Revert `service` one revision, or down to `to` (which stays applied).
    /// Snapshots the database first, like any other mutation.
    pub fn rollback_service(
        &self,
        service: &ServiceId,
        to: Option<&RevisionId>,
    ) -> Result<RunReport, RunError> {
        let mut ctx = RunContext::start(self, RunKind::Rollback)?;
        let adapter = match self.adapter(service) {
            Ok(adapter) => adapter.clone(),
            Err(e) => return Err(ctx.fail(e)),
        };

        let mut svc = ServiceRun::new(service.clone(), None);
        let result = self.with_service_lock(&ctx, &mut svc, |svc, lease| {
            self.rollback_locked(&ctx, adapter.as_ref(), to, svc, lease)
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

    fn rollback_locked(
        &self,
        ctx: &RunContext<'_>,
        adapter: &dyn ServiceAdapter,
        to: Option<&RevisionId>,
        svc: &mut ServiceRun,
        lease: &mut LockLease<'_>,
    ) -> OrchestratorResult<()> {
        let status = self.locked_status(ctx, adapter, svc, AuditOperation::Rollback)?;
        svc.report.from = status.current().cloned();
        svc.report.to = status.current().cloned();

        let applied = &status.applied;
        if applied.is_empty() {
            let err: OrchestratorError = AdapterError::RollbackFailed {
                service: svc.id().clone(),
                cause: RollbackCause::NothingApplied,
            }
            .into();
            ctx.record_failure(svc, AuditOperation::Rollback, AuditOutcome::Failed, err.to_string());
            return Err(err);
        }

        // Revisions to revert, head first, and where the service should end up.
        let keep = match to {
            None => applied.len() - 1,
            Some(target) => match applied.iter().position(|r| r == target) {
                Some(pos) => pos + 1,
                None => {
                    let err = OrchestratorError::UnknownRevision {
                        service: svc.id().clone(),
                        revision: target.clone(),
                    };
                    ctx.record_failure(svc, AuditOperation::Rollback, AuditOutcome::Failed, err.to_string());
                    return Err(err);
                }
            },
        };
        let to_revert: Vec<&RevisionId> = applied[keep..].iter().rev().collect();
        let expected = keep.checked_sub(1).map(|i| &applied[i]);

        if to_revert.is_empty() {
            ctx.record(
                svc,
                AuditOperation::Rollback,
                AuditOutcome::Noop,
                format!("already at {}", display_revision(expected)),
            )?;
            return Ok(());
        }

        svc.advance(ServiceState::BackingUp);
        self.snapshot(ctx, adapter, svc, lease)?;

        svc.advance(ServiceState::Applying);
        for revision in to_revert {
            self.check_cancelled(ctx, svc, AuditOperation::Rollback)?;
            self.heartbeat(ctx, svc, lease)?;

            match adapter.rollback_last() {
                Ok(record) if &record.revision_id == revision => {
                    svc.report.reverted.push(record.revision_id.clone());
                    let position = applied.iter().position(|r| r == revision).unwrap_or(0);
                    svc.report.to = position.checked_sub(1).map(|i| applied[i].clone());
                    ctx.record(
                        svc,
                        AuditOperation::Rollback,
                        AuditOutcome::Ok,
                        format!("reverted {}", record.revision_id),
                    )?;
                }
                Ok(record) => {
                    let err = OrchestratorError::VerificationMismatch {
                        service: svc.id().clone(),
                        expected: format!("revert of {revision}"),
                        actual: format!("revert of {}", record.revision_id),
                    };
                    ctx.record_failure(svc, AuditOperation::Rollback, AuditOutcome::Mismatch, err.to_string());
                    return Err(err);
                }
                Err(e) => {
                    ctx.record_failure(svc, AuditOperation::Rollback, AuditOutcome::Failed, e.to_string());
                    return Err(e.into());
                }
            }
        }

        svc.advance(ServiceState::Verifying);
        self.verify(ctx, adapter, svc, expected)
    }
}
