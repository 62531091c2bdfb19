//! `status_all`: a lock-free, read-only view of every service, suitable for
//! dashboards and `--json` output.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use convoy_core::errors::AdapterError;
use convoy_core::types::{LockInfo, RevisionId};

use super::Orchestrator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    UpToDate,
    Pending,
    Blocked,
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub engine: String,
    pub current_revision: Option<RevisionId>,
    pub latest_revision: Option<RevisionId>,
    pub pending_count: usize,
    pub blocked: Option<String>,
    /// Set when the adapter could not be queried at all.
    pub unavailable: Option<String>,
    pub lock: Option<LockInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub generated_at: DateTime<Utc>,
    pub overall_status: OverallStatus,
    pub per_service: BTreeMap<String, ServiceStatus>,
}

impl StatusReport {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn overall(services: &BTreeMap<String, ServiceStatus>) -> OverallStatus {
    let any = |f: fn(&ServiceStatus) -> bool| services.values().any(f);
    if any(|s| s.unavailable.is_some()) {
        OverallStatus::Degraded
    } else if any(|s| s.blocked.is_some()) {
        OverallStatus::Blocked
    } else if any(|s| s.pending_count > 0) {
        OverallStatus::Pending
    } else {
        OverallStatus::UpToDate
    }
}

impl Orchestrator {
    /// Status of every service. Unreachable services are reported, not fatal.
    pub fn status_all(&self) -> StatusReport {
        let mut per_service = BTreeMap::new();
        for adapter in &self.adapters {
            let service = adapter.service_id();
            let lock = self.locks.holder(service).unwrap_or_else(|e| {
                warn!(service = %service, error = %e, "Could not read lock state");
                None
            });
            let entry = match adapter.status() {
                Ok(status) => ServiceStatus {
                    engine: adapter.engine().to_string(),
                    current_revision: status.current().cloned(),
                    latest_revision: status.latest_available().cloned(),
                    pending_count: status.pending.len(),
                    blocked: status.inconsistency().map(str::to_string),
                    unavailable: None,
                    lock,
                },
                Err(e) => {
                    let (blocked, unavailable) = match &e {
                        AdapterError::Blocked { reason, .. } => (Some(reason.clone()), None),
                        other => (None, Some(other.to_string())),
                    };
                    ServiceStatus {
                        engine: adapter.engine().to_string(),
                        current_revision: None,
                        latest_revision: None,
                        pending_count: 0,
                        blocked,
                        unavailable,
                        lock,
                    }
                }
            };
            per_service.insert(service.to_string(), entry);
        }
        StatusReport {
            generated_at: self.clock.now(),
            overall_status: overall(&per_service),
            per_service,
        }
    }
}
