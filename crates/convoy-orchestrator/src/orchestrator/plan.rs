//! Planning. Read-only and lock-free: safe to run at any time, alongside
//! anything else.

use std::sync::Arc;

use rustc_hash::FxHashSet;
use tracing::{info, warn};

use convoy_core::errors::OrchestratorResult;
use convoy_core::traits::ServiceAdapter;
use convoy_core::types::{display_revision, MigrationPlan, PlanStep, ServiceId};

use super::Orchestrator;

impl Orchestrator {
    /// Pending revisions for every service, in declared order.
    /// An unreachable service aborts planning.
    pub fn plan_all(&self) -> OrchestratorResult<MigrationPlan> {
        self.plan_adapters(self.adapters.iter())
    }

    /// Plan a subset. Declared order wins over the order given here.
    pub fn plan(&self, services: &[ServiceId]) -> OrchestratorResult<MigrationPlan> {
        for service in services {
            self.adapter(service)?;
        }
        let wanted: FxHashSet<&ServiceId> = services.iter().collect();
        self.plan_adapters(
            self.adapters
                .iter()
                .filter(|a| wanted.contains(a.service_id())),
        )
    }

    fn plan_adapters<'a>(
        &self,
        adapters: impl Iterator<Item = &'a Arc<dyn ServiceAdapter>>,
    ) -> OrchestratorResult<MigrationPlan> {
        let mut steps = Vec::new();
        for adapter in adapters {
            let status = adapter.status()?;
            if let Some(reason) = status.inconsistency() {
                warn!(service = %adapter.service_id(), reason, "Service is blocked");
            }
            steps.push(PlanStep {
                service_id: adapter.service_id().clone(),
                current: status.current().cloned(),
                pending: status.pending.clone(),
                blocked: status.inconsistency().map(str::to_string),
            });
        }
        let plan = MigrationPlan {
            created_at: self.clock.now(),
            steps,
        };
        info!(
            services = plan.steps.len(),
            pending = plan.total_pending(),
            "Plan built"
        );
        Ok(plan)
    }
}

/// One-line description of a plan, for the audit log.
pub(crate) fn plan_summary(plan: &MigrationPlan) -> String {
    if plan.steps.is_empty() {
        return "no services".to_string();
    }
    plan.steps
        .iter()
        .map(|step| {
            let current = display_revision(step.current.as_ref());
            match (&step.blocked, step.pending.len()) {
                (Some(_), _) => format!("{}: blocked at {current}", step.service_id),
                (None, 0) => format!("{}: up to date at {current}", step.service_id),
                (None, n) => format!(
                    "{}: {current} -> {} ({n} pending)",
                    step.service_id,
                    display_revision(step.target())
                ),
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}
