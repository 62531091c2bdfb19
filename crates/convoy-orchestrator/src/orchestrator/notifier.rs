//! Run notification hook. Called once per finished run, successful or not.

use tracing::{error, info};

use super::report::RunReport;

pub trait RunNotifier: Send + Sync {
    fn notify(&self, report: &RunReport);
}

/// Default notifier: one structured log line per service, plus the run outcome.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl RunNotifier for LogNotifier {
    fn notify(&self, report: &RunReport) {
        for svc in &report.services {
            info!(
                run_id = %report.run_id,
                service = %svc.service_id,
                state = svc.state.as_str(),
                applied = svc.applied.len(),
                reverted = svc.reverted.len(),
                backup = svc.backup.as_ref().map(|b| b.artifact_id.as_str()).unwrap_or("-"),
                "Service finished"
            );
        }
        match &report.error {
            None => info!(
                run_id = %report.run_id,
                kind = report.kind.as_str(),
                services = report.services.len(),
                "Run completed"
            ),
            Some(e) => error!(
                run_id = %report.run_id,
                kind = report.kind.as_str(),
                exit_code = report.exit_code,
                error = %e,
                "Run failed"
            ),
        }
    }
}
