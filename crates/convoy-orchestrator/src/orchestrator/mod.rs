//! The orchestrator: drives every configured service through
//! lock, backup, apply, verify and unlock, in declared order.
//!
//! Services are processed strictly one after another. A failure stops the
//! run at the failing service; earlier services keep their new revisions and
//! later ones are not touched. Rolling back is always an explicit operator
//! action.

mod apply;
mod builder;
mod lease;
mod maintenance;
mod notifier;
mod plan;
mod report;
mod restore;
mod rollback;
mod run;
mod state;
mod status;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::{info, warn};

use convoy_core::config::LockConfig;
use convoy_core::errors::{
    AdapterError, LockError, OrchestratorError, OrchestratorResult,
};
use convoy_core::traits::{Clock, ServiceAdapter};
use convoy_core::types::{
    display_revision, AdapterStatus, AuditOperation, AuditOutcome, BackupArtifact, ServiceId,
};
use convoy_core::ConvoyConfig;

use crate::audit::AuditLog;
use crate::backup::BackupManager;
use crate::lock::LockManager;

pub use builder::OrchestratorBuilder;
pub use notifier::{LogNotifier, RunNotifier};
pub use report::{BackupPointer, RunError, RunKind, RunReport, ServiceReport};
pub use state::ServiceState;
pub use status::{OverallStatus, ServiceStatus, StatusReport};

use lease::LockLease;
use run::{RunContext, ServiceRun};

/// Cooperative cancellation. Checked before each service and before each
/// revision; a revision already running is never interrupted.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct Orchestrator {
    adapters: Vec<Arc<dyn ServiceAdapter>>,
    index: FxHashMap<ServiceId, usize>,
    locks: LockManager,
    backups: BackupManager,
    audit: AuditLog,
    clock: Arc<dyn Clock>,
    actor: String,
    lock_config: LockConfig,
    notifier: Arc<dyn RunNotifier>,
    cancel: CancelHandle,
}

impl Orchestrator {
    /// Build from a validated config with the default clock and notifier.
    pub fn from_config(config: &ConvoyConfig) -> OrchestratorResult<Self> {
        OrchestratorBuilder::from_config(config).build()
    }

    pub fn builder(state_dir: impl AsRef<std::path::Path>) -> OrchestratorBuilder {
        OrchestratorBuilder::new(state_dir)
    }

    /// Service ids in declared order.
    pub fn service_ids(&self) -> impl Iterator<Item = &ServiceId> {
        self.adapters.iter().map(|a| a.service_id())
    }

    pub fn adapter(&self, service: &ServiceId) -> OrchestratorResult<&Arc<dyn ServiceAdapter>> {
        self.index
            .get(service)
            .map(|&i| &self.adapters[i])
            .ok_or_else(|| OrchestratorError::UnknownService(service.clone()))
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    // ─── Shared step machinery ──────────────────────────────────────────

    /// Hold the service lock around `body`. The lock is released whatever
    /// `body` returns; the service ends DONE only if both succeeded.
    fn with_service_lock<F>(
        &self,
        ctx: &RunContext<'_>,
        svc: &mut ServiceRun,
        body: F,
    ) -> OrchestratorResult<()>
    where
        F: FnOnce(&mut ServiceRun, &mut LockLease<'_>) -> OrchestratorResult<()>,
    {
        svc.advance(ServiceState::Locking);
        let mut lease = self.acquire_lease(ctx, svc)?;
        let outcome = body(svc, &mut lease);
        if outcome.is_ok() {
            svc.advance(ServiceState::Unlocking);
        }
        let released = self.release_lease(ctx, svc, lease);
        let result = outcome.and(released);
        if result.is_ok() {
            svc.advance(ServiceState::Done);
        }
        result
    }

    fn acquire_lease<'s>(
        &'s self,
        ctx: &RunContext<'_>,
        svc: &mut ServiceRun,
    ) -> OrchestratorResult<LockLease<'s>> {
        let service = svc.id().clone();
        let attempts = self.lock_config.acquire_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.locks.acquire(&service, self.lock_config.ttl()) {
                Ok(grant) => {
                    if let Some(previous) = &grant.reclaimed {
                        ctx.record(
                            svc,
                            AuditOperation::Lock,
                            AuditOutcome::Reclaimed,
                            format!(
                                "expired lock of {} (expired {}) reclaimed",
                                previous.holder_id, previous.expires_at
                            ),
                        )?;
                    }
                    let lease = LockLease::new(&self.locks, self.clock.as_ref(), grant.token);
                    ctx.record(
                        svc,
                        AuditOperation::Lock,
                        AuditOutcome::Acquired,
                        format!("ttl {}s", self.lock_config.ttl_secs),
                    )?;
                    return Ok(lease);
                }
                Err(LockError::Held { .. }) if attempt < attempts => {
                    info!(service = %service, attempt, "Lock held, retrying");
                    attempt += 1;
                    std::thread::sleep(self.lock_config.retry_delay());
                }
                Err(e) => {
                    let outcome = match &e {
                        LockError::Held { .. } => AuditOutcome::Held,
                        _ => AuditOutcome::Failed,
                    };
                    ctx.record_failure(svc, AuditOperation::Lock, outcome, e.to_string());
                    return Err(e.into());
                }
            }
        }
    }

    fn release_lease(
        &self,
        ctx: &RunContext<'_>,
        svc: &mut ServiceRun,
        lease: LockLease<'_>,
    ) -> OrchestratorResult<()> {
        match lease.release() {
            Ok(()) => {
                ctx.record(svc, AuditOperation::Lock, AuditOutcome::Released, "")?;
                Ok(())
            }
            Err(e) => {
                ctx.record_failure(svc, AuditOperation::Lock, AuditOutcome::Failed, e.to_string());
                Err(e.into())
            }
        }
    }

    /// Fresh adapter status under the lock. Unreachable or inconsistent
    /// services stop the step here, before any mutation.
    fn locked_status(
        &self,
        ctx: &RunContext<'_>,
        adapter: &dyn ServiceAdapter,
        svc: &mut ServiceRun,
        operation: AuditOperation,
    ) -> OrchestratorResult<AdapterStatus> {
        let status = match adapter.status() {
            Ok(status) => status,
            Err(e) => {
                let outcome = match &e {
                    AdapterError::Unavailable { .. } => AuditOutcome::Unavailable,
                    _ => AuditOutcome::Failed,
                };
                ctx.record_failure(svc, operation, outcome, e.to_string());
                return Err(e.into());
            }
        };
        if let Some(reason) = status.inconsistency() {
            ctx.record_failure(svc, operation, AuditOutcome::Blocked, reason);
            return Err(AdapterError::Blocked {
                service: svc.id().clone(),
                reason: reason.to_string(),
            }
            .into());
        }
        Ok(status)
    }

    /// Pre-mutation snapshot. The lease is renewed between copy steps.
    fn snapshot(
        &self,
        ctx: &RunContext<'_>,
        adapter: &dyn ServiceAdapter,
        svc: &mut ServiceRun,
        lease: &mut LockLease<'_>,
    ) -> OrchestratorResult<BackupArtifact> {
        let result = {
            let mut heartbeat = || {
                lease
                    .renew_if_due()
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            };
            self.backups.snapshot_with_heartbeat(
                adapter.service_id(),
                &ctx.run_id,
                adapter.backup_source(),
                &mut heartbeat,
            )
        };
        match result {
            Ok(artifact) => {
                svc.report.backup = Some(BackupPointer {
                    artifact_id: artifact.id.clone(),
                    storage_path: artifact.storage_path.clone(),
                });
                ctx.record(
                    svc,
                    AuditOperation::Backup,
                    AuditOutcome::Ok,
                    format!("{} ({} bytes)", artifact.id, artifact.size_bytes),
                )?;
                Ok(artifact)
            }
            Err(e) => {
                ctx.record_failure(svc, AuditOperation::Backup, AuditOutcome::Failed, e.to_string());
                Err(e.into())
            }
        }
    }

    /// Renew the lease if due; a lost lock stops the step before the next
    /// mutation.
    fn heartbeat(
        &self,
        ctx: &RunContext<'_>,
        svc: &mut ServiceRun,
        lease: &mut LockLease<'_>,
    ) -> OrchestratorResult<()> {
        match lease.renew_if_due() {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(service = %svc.id(), error = %e, "Lock lost mid-run");
                ctx.record_failure(svc, AuditOperation::Lock, AuditOutcome::Failed, e.to_string());
                Err(e.into())
            }
        }
    }

    fn check_cancelled(
        &self,
        ctx: &RunContext<'_>,
        svc: &mut ServiceRun,
        operation: AuditOperation,
    ) -> OrchestratorResult<()> {
        if !self.cancel.is_cancelled() {
            return Ok(());
        }
        let at = display_revision(svc.report.to.as_ref());
        ctx.record_failure(
            svc,
            operation,
            AuditOutcome::Cancelled,
            format!("stopped at {at}"),
        );
        Err(OrchestratorError::Cancelled {
            service: svc.id().clone(),
            at,
        })
    }

    /// Confirm the service sits at `expected` with consistent state.
    fn verify(
        &self,
        ctx: &RunContext<'_>,
        adapter: &dyn ServiceAdapter,
        svc: &mut ServiceRun,
        expected: Option<&convoy_core::types::RevisionId>,
    ) -> OrchestratorResult<()> {
        let status = match adapter.status() {
            Ok(status) => status,
            Err(e) => {
                ctx.record_failure(svc, AuditOperation::Verify, AuditOutcome::Failed, e.to_string());
                return Err(e.into());
            }
        };
        let actual = status.current();
        if actual == expected && status.is_consistent() {
            svc.report.to = actual.cloned();
            ctx.record(
                svc,
                AuditOperation::Verify,
                AuditOutcome::Ok,
                format!("at {}", display_revision(actual)),
            )?;
            return Ok(());
        }

        let actual_text = match status.inconsistency() {
            Some(reason) => format!("{} ({reason})", display_revision(actual)),
            None => display_revision(actual),
        };
        let err = OrchestratorError::VerificationMismatch {
            service: svc.id().clone(),
            expected: display_revision(expected),
            actual: actual_text,
        };
        ctx.record_failure(svc, AuditOperation::Verify, AuditOutcome::Mismatch, err.to_string());
        Err(err)
    }
}
