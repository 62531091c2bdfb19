//! Bookkeeping shared by every run kind: the run id, audit helpers and the
//! per-service report being built.

use tracing::{debug, warn};

use convoy_core::errors::{AdapterError, OrchestratorError, OrchestratorResult};
use convoy_core::types::{AuditOperation, AuditOutcome, NewAuditEntry, RunId, ServiceId};

use super::report::{RunError, RunKind, RunReport, ServiceReport};
use super::state::ServiceState;
use super::Orchestrator;

pub(crate) struct RunContext<'a> {
    orch: &'a Orchestrator,
    pub(crate) run_id: RunId,
    kind: RunKind,
    started_at: chrono::DateTime<chrono::Utc>,
    services: Vec<ServiceReport>,
}

impl<'a> RunContext<'a> {
    /// Open a run. Fails if the audit log cannot take the opening entry:
    /// nothing may happen that is not recorded.
    pub(crate) fn start(orch: &'a Orchestrator, kind: RunKind) -> Result<Self, RunError> {
        let ctx = Self {
            orch,
            run_id: RunId::new(),
            kind,
            started_at: orch.clock.now(),
            services: Vec::new(),
        };
        if let Err(e) = ctx.record_run(AuditOperation::Run, AuditOutcome::Started, kind.as_str()) {
            return Err(ctx.fail(e));
        }
        debug!(run_id = %ctx.run_id, kind = kind.as_str(), "Run started");
        Ok(ctx)
    }

    fn entry(&self, operation: AuditOperation, outcome: AuditOutcome) -> NewAuditEntry {
        NewAuditEntry::new(self.orch.actor.as_str(), operation, outcome).run(&self.run_id)
    }

    /// Run-level entry, not tied to a service.
    pub(crate) fn record_run(
        &self,
        operation: AuditOperation,
        outcome: AuditOutcome,
        detail: impl Into<String>,
    ) -> OrchestratorResult<()> {
        self.orch
            .audit
            .append(self.entry(operation, outcome).detail(detail))?;
        Ok(())
    }

    pub(crate) fn record(
        &self,
        svc: &mut ServiceRun,
        operation: AuditOperation,
        outcome: AuditOutcome,
        detail: impl Into<String>,
    ) -> OrchestratorResult<()> {
        let entry = self.orch.audit.append(
            self.entry(operation, outcome)
                .service(svc.id())
                .detail(detail),
        )?;
        svc.report.note_audit(entry.sequence_no);
        Ok(())
    }

    /// Record on a failure path. The error being reported matters more than
    /// a second error from the audit log, so that one is only logged.
    pub(crate) fn record_failure(
        &self,
        svc: &mut ServiceRun,
        operation: AuditOperation,
        outcome: AuditOutcome,
        detail: impl Into<String>,
    ) {
        if let Err(e) = self.record(svc, operation, outcome, detail) {
            warn!(run_id = %self.run_id, service = %svc.id(), error = %e, "Audit append failed on error path");
        }
    }

    pub(crate) fn push(&mut self, svc: ServiceRun) {
        self.services.push(svc.report);
    }

    fn report(self, error: Option<&OrchestratorError>) -> RunReport {
        RunReport {
            run_id: self.run_id,
            kind: self.kind,
            actor: self.orch.actor.clone(),
            started_at: self.started_at,
            finished_at: self.orch.clock.now(),
            services: self.services,
            error: error.map(|e| e.to_string()),
            exit_code: error.map(|e| e.exit_code()).unwrap_or(0),
        }
    }

    pub(crate) fn finish(self) -> Result<RunReport, RunError> {
        if let Err(e) = self.record_run(AuditOperation::Run, AuditOutcome::Ok, self.kind.as_str()) {
            return Err(self.fail(e));
        }
        let orch = self.orch;
        let report = self.report(None);
        orch.notifier.notify(&report);
        Ok(report)
    }

    pub(crate) fn fail(self, source: OrchestratorError) -> RunError {
        if let Err(e) = self.record_run(AuditOperation::Run, AuditOutcome::Failed, source.to_string()) {
            warn!(run_id = %self.run_id, error = %e, "Could not record run failure");
        }
        let orch = self.orch;
        let report = self.report(Some(&source));
        orch.notifier.notify(&report);
        RunError {
            report: Box::new(report),
            source,
        }
    }
}

/// One service's progress through the state machine within a run.
pub(crate) struct ServiceRun {
    pub(crate) report: ServiceReport,
}

impl ServiceRun {
    pub(crate) fn new(service_id: ServiceId, from: Option<convoy_core::types::RevisionId>) -> Self {
        Self {
            report: ServiceReport::new(service_id, from),
        }
    }

    pub(crate) fn id(&self) -> &ServiceId {
        &self.report.service_id
    }

    pub(crate) fn advance(&mut self, next: ServiceState) {
        debug_assert!(
            self.report.state.can_transition_to(next),
            "illegal transition {} -> {}",
            self.report.state,
            next
        );
        debug!(service = %self.report.service_id, from = %self.report.state, to = %next, "State change");
        self.report.state = next;
    }

    /// Move to the matching terminal state. No-op once terminal.
    pub(crate) fn fail(&mut self, error: &OrchestratorError) {
        if self.report.state.is_terminal() {
            return;
        }
        let next = match error {
            OrchestratorError::Adapter(AdapterError::Blocked { .. }) => ServiceState::Blocked,
            _ => ServiceState::Failed,
        };
        self.advance(next);
        self.report.error = Some(error.to_string());
    }
}
