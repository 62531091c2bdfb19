//! `apply_all`: execute a plan service by service.

use convoy_core::errors::{AdapterError, OrchestratorError, OrchestratorResult};
use convoy_core::traits::ServiceAdapter;
use convoy_core::types::{
    display_revision, AuditOperation, AuditOutcome, MigrationPlan, PlanStep,
};

use super::lease::LockLease;
use super::plan::plan_summary;
use super::report::{RunError, RunKind, RunReport};
use super::run::{RunContext, ServiceRun};
use super::state::ServiceState;
use super::Orchestrator;

impl Orchestrator {
    /// Execute `plan` in its declared order. Stops at the first service that
    /// fails; services already done keep their new revisions and later ones
    /// are never touched.
    pub fn apply_all(&self, plan: &MigrationPlan) -> Result<RunReport, RunError> {
        let mut ctx = RunContext::start(self, RunKind::Apply)?;
        if let Err(e) = ctx.record_run(AuditOperation::Plan, AuditOutcome::Ok, plan_summary(plan)) {
            return Err(ctx.fail(e));
        }

        for step in &plan.steps {
            let mut svc = ServiceRun::new(step.service_id.clone(), step.current.clone());
            let result = self.apply_step(&ctx, step, &mut svc);
            if let Err(e) = &result {
                svc.fail(e);
            }
            ctx.push(svc);
            if let Err(e) = result {
                return Err(ctx.fail(e));
            }
        }
        ctx.finish()
    }

    fn apply_step(
        &self,
        ctx: &RunContext<'_>,
        step: &PlanStep,
        svc: &mut ServiceRun,
    ) -> OrchestratorResult<()> {
        let adapter = self.adapter(&step.service_id)?.clone();
        self.check_cancelled(ctx, svc, AuditOperation::Apply)?;

        if let Some(reason) = &step.blocked {
            ctx.record_failure(svc, AuditOperation::Apply, AuditOutcome::Blocked, reason.as_str());
            return Err(AdapterError::Blocked {
                service: step.service_id.clone(),
                reason: reason.clone(),
            }
            .into());
        }

        self.with_service_lock(ctx, svc, |svc, lease| {
            self.apply_locked(ctx, adapter.as_ref(), step, svc, lease)
        })
    }

    fn apply_locked(
        &self,
        ctx: &RunContext<'_>,
        adapter: &dyn ServiceAdapter,
        step: &PlanStep,
        svc: &mut ServiceRun,
        lease: &mut LockLease<'_>,
    ) -> OrchestratorResult<()> {
        let status = self.locked_status(ctx, adapter, svc, AuditOperation::Apply)?;

        // The plan was built without the lock; anything that moved since
        // makes it unsafe to follow.
        let current = status.current();
        if current != step.current.as_ref() || !status.pending.starts_with(&step.pending) {
            let err = OrchestratorError::StalePlan {
                service: step.service_id.clone(),
                planned: display_revision(step.current.as_ref()),
                actual: display_revision(current),
            };
            ctx.record_failure(svc, AuditOperation::Apply, AuditOutcome::Failed, err.to_string());
            return Err(err);
        }

        if step.is_noop() {
            ctx.record(
                svc,
                AuditOperation::Apply,
                AuditOutcome::Noop,
                format!("already at {}", display_revision(current)),
            )?;
            return Ok(());
        }

        svc.advance(ServiceState::BackingUp);
        self.snapshot(ctx, adapter, svc, lease)?;

        svc.advance(ServiceState::Applying);
        for expected in &step.pending {
            self.check_cancelled(ctx, svc, AuditOperation::Apply)?;
            self.heartbeat(ctx, svc, lease)?;

            match adapter.apply_next() {
                Ok(record) if &record.revision_id == expected => {
                    svc.report.applied.push(record.revision_id.clone());
                    svc.report.to = Some(record.revision_id.clone());
                    ctx.record(
                        svc,
                        AuditOperation::Apply,
                        AuditOutcome::Ok,
                        format!(
                            "revision {} checksum {}",
                            record.revision_id,
                            record.checksum.get(..12).unwrap_or(&record.checksum)
                        ),
                    )?;
                }
                Ok(record) => {
                    svc.report.to = Some(record.revision_id.clone());
                    let err = OrchestratorError::VerificationMismatch {
                        service: step.service_id.clone(),
                        expected: expected.to_string(),
                        actual: record.revision_id.to_string(),
                    };
                    ctx.record_failure(svc, AuditOperation::Apply, AuditOutcome::Mismatch, err.to_string());
                    return Err(err);
                }
                Err(e) => {
                    ctx.record_failure(svc, AuditOperation::Apply, AuditOutcome::Failed, e.to_string());
                    return Err(e.into());
                }
            }
        }

        svc.advance(ServiceState::Verifying);
        self.verify(ctx, adapter, svc, step.target())
    }
}
