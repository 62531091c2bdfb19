//! End-to-end orchestration: lock, backup, apply, verify and unlock across
//! services, plus the operator actions around a run.

use std::time::Duration as StdDuration;

use chrono::Duration;

use convoy_core::config::BackupConfig;
use convoy_core::errors::{
    AdapterError, BackupError, ConfigError, LockError, OrchestratorError, RollbackCause,
};
use convoy_core::types::{AuditEntry, RevisionId, RunId, ServiceId};
use convoy_core::ConvoyConfig;
use convoy_orchestrator::{
    CoordinatorDb, LockManager, Orchestrator, OrchestratorBuilder, OverallStatus, RunError,
    ServiceState,
};

mod common;

use common::TestEnv;

fn rev(n: u64) -> RevisionId {
    RevisionId::Number(n)
}

fn labels(entries: &[AuditEntry]) -> Vec<String> {
    entries.iter().map(|e| e.label()).collect()
}

fn service_labels(orch: &Orchestrator, run: &RunId, service: &str) -> Vec<String> {
    let service = ServiceId::from(service);
    let entries: Vec<AuditEntry> = orch
        .audit_log()
        .by_run(run)
        .unwrap()
        .into_iter()
        .filter(|e| e.service_id.as_ref() == Some(&service))
        .collect();
    labels(&entries)
}

/// A second coordinator process holding locks in the same store.
fn other_operator(env: &TestEnv, holder: &str) -> LockManager {
    let db = CoordinatorDb::open(env.state_dir().join("convoy.db")).unwrap();
    LockManager::new(db, env.clock(), holder)
}

#[test]
fn applies_pending_revisions_with_one_backup() {
    let env = TestEnv::new();
    let users = env.fake("users", 5, 2);
    let orch = env.orchestrator(&[&users]);

    let plan = orch.plan_all().unwrap();
    let step = plan.step(users.id()).unwrap();
    assert_eq!(step.current, Some(rev(2)));
    assert_eq!(step.pending, [rev(3), rev(4), rev(5)]);

    let report = orch.apply_all(&plan).unwrap();
    assert!(report.succeeded());
    assert_eq!(report.exit_code, 0);
    assert_eq!(users.current(), Some(rev(5)));

    let svc = report.service(users.id()).unwrap();
    assert_eq!(svc.state, ServiceState::Done);
    assert_eq!(svc.from, Some(rev(2)));
    assert_eq!(svc.to, Some(rev(5)));
    assert_eq!(svc.applied, [rev(3), rev(4), rev(5)]);

    let entries = orch.audit_log().by_run(&report.run_id).unwrap();
    let applied = entries.iter().filter(|e| e.label() == "apply:ok").count();
    assert_eq!(applied, 3);

    let backups = orch.backups().list(Some(users.id())).unwrap();
    assert_eq!(backups.len(), 1);
    assert_eq!(backups[0].run_id, report.run_id);
    assert!(backups[0].verified);
    assert_eq!(
        svc.backup.as_ref().map(|b| b.artifact_id.as_str()),
        Some(backups[0].id.as_str())
    );
}

#[test]
fn backup_is_taken_before_any_mutation_and_restores_the_pre_state() {
    let env = TestEnv::new();
    let users = env.fake("users", 5, 2);
    let orch = env.orchestrator(&[&users]);

    let report = orch.apply_all(&orch.plan_all().unwrap()).unwrap();
    assert_eq!(
        service_labels(&orch, &report.run_id, "users"),
        [
            "lock:acquired",
            "backup:ok",
            "apply:ok",
            "apply:ok",
            "apply:ok",
            "verify:ok",
            "lock:released",
        ]
    );
    let run_entries = labels(&orch.audit_log().by_run(&report.run_id).unwrap());
    assert_eq!(run_entries.first().map(String::as_str), Some("run:started"));
    assert_eq!(run_entries.get(1).map(String::as_str), Some("plan:ok"));
    assert_eq!(run_entries.last().map(String::as_str), Some("run:ok"));

    let svc = report.service(users.id()).unwrap();
    assert!(svc.first_audit_seq.unwrap() < svc.last_audit_seq.unwrap());

    let artifact_id = svc.backup.as_ref().unwrap().artifact_id.clone();
    env.clock.advance(Duration::minutes(1));
    let restored = orch.restore_service(users.id(), &artifact_id).unwrap();
    assert_eq!(users.current(), Some(rev(2)));
    let restored_svc = restored.service(users.id()).unwrap();
    assert_eq!(restored_svc.from, Some(rev(5)));
    assert_eq!(restored_svc.to, Some(rev(2)));
    assert!(
        restored_svc.backup.is_some(),
        "restore snapshots the current database first"
    );
    assert_eq!(orch.backups().list(Some(users.id())).unwrap().len(), 2);
}

#[test]
fn lock_held_elsewhere_stops_the_run_before_mutating() {
    let env = TestEnv::new();
    let users = env.fake("users", 3, 1);
    let billing = env.fake("billing", 4, 1);
    let orch = env.orchestrator(&[&users, &billing]);

    let operator = other_operator(&env, "operator-a");
    operator
        .acquire(billing.id(), StdDuration::from_secs(600))
        .unwrap();

    let err = orch.apply_all(&orch.plan_all().unwrap()).unwrap_err();
    assert_eq!(err.exit_code(), 2);
    assert_eq!(err.report.exit_code, 2);
    match &err.source {
        OrchestratorError::Lock(LockError::Held { holder, .. }) => assert_eq!(holder, "operator-a"),
        other => panic!("expected LockHeld, got {other:?}"),
    }

    assert_eq!(users.current(), Some(rev(3)), "earlier service keeps its work");
    assert_eq!(billing.apply_calls(), 0);
    assert_eq!(billing.current(), Some(rev(1)));

    let billing_report = err.report.service(billing.id()).unwrap();
    assert_eq!(billing_report.state, ServiceState::Failed);
    assert!(billing_report.backup.is_none());
    assert_eq!(
        service_labels(&orch, &err.report.run_id, "billing"),
        ["lock:held"]
    );
    assert!(orch.backups().list(Some(billing.id())).unwrap().is_empty());
    assert_eq!(
        operator.holder(billing.id()).unwrap().map(|l| l.holder_id),
        Some("operator-a".to_string())
    );
}

#[test]
fn failed_backup_blocks_every_mutation() {
    let env = TestEnv::new();
    let users = env.fake("users", 4, 1);
    let blocker = env.dir.path().join("backups-file");
    std::fs::write(&blocker, b"not a directory").unwrap();
    let orch = env
        .builder("tester", &[&users])
        .backup_dir(&blocker)
        .build()
        .unwrap();

    let err = orch.apply_all(&orch.plan_all().unwrap()).unwrap_err();
    assert!(matches!(
        err.source,
        OrchestratorError::Backup(BackupError::Failed { .. })
    ));
    assert_eq!(err.exit_code(), 3);
    assert_eq!(users.apply_calls(), 0);
    assert_eq!(users.current(), Some(rev(1)));
    assert_eq!(
        service_labels(&orch, &err.report.run_id, "users"),
        ["lock:acquired", "backup:failed", "lock:released"]
    );
    assert!(orch.locks().holder(users.id()).unwrap().is_none());
}

#[test]
fn rollback_without_down_script_leaves_the_revision_alone() {
    let env = TestEnv::new();
    let users = env.fake("users", 5, 5);
    users.without_down_scripts();
    let orch = env.orchestrator(&[&users]);

    let err = orch.rollback_service(users.id(), None).unwrap_err();
    match &err.source {
        OrchestratorError::Adapter(AdapterError::RollbackFailed {
            cause: RollbackCause::NoDownScript { revision },
            ..
        }) => assert_eq!(revision, &rev(5)),
        other => panic!("expected NoDownScript, got {other:?}"),
    }
    assert_eq!(err.exit_code(), 1);
    assert_eq!(users.current(), Some(rev(5)));
    assert_eq!(orch.backups().list(Some(users.id())).unwrap().len(), 1);
    assert!(orch.locks().holder(users.id()).unwrap().is_none());
}

#[test]
fn second_apply_of_fresh_plan_is_a_fixed_point() {
    let env = TestEnv::new();
    let users = env.fake("users", 3, 0);
    let billing = env.fake("billing", 2, 2);
    let orch = env.orchestrator(&[&users, &billing]);

    orch.apply_all(&orch.plan_all().unwrap()).unwrap();
    let backups_after_first = orch.backups().list(None).unwrap().len();
    assert_eq!(backups_after_first, 1, "billing was already up to date");

    let plan = orch.plan_all().unwrap();
    assert_eq!(plan.total_pending(), 0);
    let report = orch.apply_all(&plan).unwrap();
    for svc in &report.services {
        assert_eq!(svc.state, ServiceState::Done);
        assert!(svc.applied.is_empty());
        assert!(svc.backup.is_none());
    }
    assert_eq!(orch.backups().list(None).unwrap().len(), backups_after_first);
    assert_eq!(users.apply_calls(), 3);
    assert_eq!(
        service_labels(&orch, &report.run_id, "users"),
        ["lock:acquired", "apply:noop", "lock:released"]
    );
}

#[test]
fn blocked_service_stops_the_run() {
    let env = TestEnv::new();
    let users = env.fake("users", 3, 1);
    let search = env.fake("search", 3, 1);
    search.set_inconsistent(Some("interrupted migration 2 (up)"));
    let orch = env.orchestrator(&[&users, &search]);

    let plan = orch.plan_all().unwrap();
    assert!(plan.step(search.id()).unwrap().blocked.is_some());

    let err = orch.apply_all(&plan).unwrap_err();
    assert!(matches!(
        err.source,
        OrchestratorError::Adapter(AdapterError::Blocked { .. })
    ));
    assert_eq!(err.exit_code(), 1);
    assert_eq!(search.apply_calls(), 0);
    assert_eq!(
        err.report.service(search.id()).unwrap().state,
        ServiceState::Blocked
    );
    assert_eq!(
        service_labels(&orch, &err.report.run_id, "search"),
        ["apply:blocked"]
    );
}

#[test]
fn unreachable_service_fails_planning_and_applying() {
    let env = TestEnv::new();
    let users = env.fake("users", 3, 1);
    let orch = env.orchestrator(&[&users]);

    let plan = orch.plan_all().unwrap();
    users.set_unavailable(true);
    assert!(matches!(
        orch.plan_all(),
        Err(OrchestratorError::Adapter(AdapterError::Unavailable { .. }))
    ));

    let err = orch.apply_all(&plan).unwrap_err();
    assert_eq!(err.exit_code(), 1);
    assert_eq!(users.apply_calls(), 0);
    assert_eq!(
        service_labels(&orch, &err.report.run_id, "users"),
        ["lock:acquired", "apply:unavailable", "lock:released"]
    );
    assert!(orch.backups().list(None).unwrap().is_empty());
}

#[test]
fn plan_that_went_stale_is_refused() {
    let env = TestEnv::new();
    let users = env.fake("users", 4, 1);
    let orch = env.orchestrator(&[&users]);

    let plan = orch.plan_all().unwrap();
    orch.apply_all(&plan).unwrap();
    let calls = users.apply_calls();

    let err = orch.apply_all(&plan).unwrap_err();
    match &err.source {
        OrchestratorError::StalePlan {
            planned, actual, ..
        } => {
            assert_eq!(planned, "1");
            assert_eq!(actual, "4");
        }
        other => panic!("expected StalePlan, got {other:?}"),
    }
    assert_eq!(users.apply_calls(), calls);
    assert_eq!(orch.backups().list(None).unwrap().len(), 1);
}

#[test]
fn cancel_stops_between_revisions() {
    let env = TestEnv::new();
    let users = env.fake("users", 5, 2);
    let billing = env.fake("billing", 2, 0);
    let orch = env.orchestrator(&[&users, &billing]);

    let cancel = orch.cancel_handle();
    users.after_apply(move |_| cancel.cancel());

    let err = orch.apply_all(&orch.plan_all().unwrap()).unwrap_err();
    match &err.source {
        OrchestratorError::Cancelled { service, at } => {
            assert_eq!(service, users.id());
            assert_eq!(at, "3");
        }
        other => panic!("expected Cancelled, got {other:?}"),
    }
    assert_eq!(users.current(), Some(rev(3)));
    assert_eq!(billing.apply_calls(), 0);
    assert!(service_labels(&orch, &err.report.run_id, "users").contains(&"apply:cancelled".to_string()));
    assert!(orch.locks().holder(users.id()).unwrap().is_none());

    orch.cancel_handle().reset();
    users.after_apply(|_| {});
    orch.apply_all(&orch.plan_all().unwrap()).unwrap();
    assert_eq!(users.current(), Some(rev(5)));
    assert_eq!(billing.current(), Some(rev(2)));
}

#[test]
fn adapter_reporting_the_wrong_revision_is_a_mismatch() {
    let env = TestEnv::new();
    let users = env.fake("users", 4, 1);
    users.misreport_as(9u64);
    let orch = env.orchestrator(&[&users]);

    let err = orch.apply_all(&orch.plan_all().unwrap()).unwrap_err();
    assert!(matches!(
        err.source,
        OrchestratorError::VerificationMismatch { .. }
    ));
    assert_eq!(err.exit_code(), 3);
    assert_eq!(users.apply_calls(), 1);
    assert_eq!(
        err.report.service(users.id()).unwrap().state,
        ServiceState::Failed
    );
}

#[test]
fn failure_leaves_later_services_untouched() {
    let env = TestEnv::new();
    let users = env.fake("users", 3, 1);
    let billing = env.fake("billing", 3, 1);
    let search = env.fake("search", 3, 1);
    billing.fail_on(3u64);
    let orch = env.orchestrator(&[&users, &billing, &search]);

    let err = orch.apply_all(&orch.plan_all().unwrap()).unwrap_err();
    assert!(matches!(
        err.source,
        OrchestratorError::Adapter(AdapterError::ApplyFailed { .. })
    ));

    assert_eq!(users.current(), Some(rev(3)));
    assert_eq!(billing.current(), Some(rev(2)), "revision 2 stays applied");
    assert_eq!(search.apply_calls(), 0);

    let reached: Vec<&str> = err
        .report
        .services
        .iter()
        .map(|s| s.service_id.as_str())
        .collect();
    assert_eq!(reached, ["users", "billing"]);
    let billing_report = err.report.service(billing.id()).unwrap();
    assert_eq!(billing_report.applied, [rev(2)]);
    assert_eq!(billing_report.to, Some(rev(2)));
    assert!(billing_report.error.as_deref().unwrap().contains("syntax error"));
    assert_eq!(users.rollback_calls() + billing.rollback_calls(), 0);
}

#[test]
fn plan_subset_keeps_declared_order() {
    let env = TestEnv::new();
    let users = env.fake("users", 2, 0);
    let billing = env.fake("billing", 2, 0);
    let search = env.fake("search", 2, 0);
    let orch = env.orchestrator(&[&users, &billing, &search]);

    let plan = orch
        .plan(&[search.id().clone(), users.id().clone()])
        .unwrap();
    let order: Vec<&str> = plan.steps.iter().map(|s| s.service_id.as_str()).collect();
    assert_eq!(order, ["users", "search"]);

    assert!(matches!(
        orch.plan(&[ServiceId::from("ghost")]),
        Err(OrchestratorError::UnknownService(_))
    ));
}

#[test]
fn rollback_to_a_target_reverts_head_first() {
    let env = TestEnv::new();
    let users = env.fake("users", 5, 5);
    let orch = env.orchestrator(&[&users]);

    let report = orch.rollback_service(users.id(), Some(&rev(3))).unwrap();
    assert_eq!(users.current(), Some(rev(3)));
    let svc = report.service(users.id()).unwrap();
    assert_eq!(svc.reverted, [rev(5), rev(4)]);
    assert_eq!(svc.from, Some(rev(5)));
    assert_eq!(svc.to, Some(rev(3)));
    assert_eq!(
        service_labels(&orch, &report.run_id, "users"),
        [
            "lock:acquired",
            "backup:ok",
            "rollback:ok",
            "rollback:ok",
            "verify:ok",
            "lock:released",
        ]
    );

    env.clock.advance(Duration::minutes(1));
    orch.rollback_service(users.id(), None).unwrap();
    assert_eq!(users.current(), Some(rev(2)));
}

#[test]
fn rollback_to_an_unapplied_revision_is_refused() {
    let env = TestEnv::new();
    let users = env.fake("users", 5, 2);
    let orch = env.orchestrator(&[&users]);

    let err = orch.rollback_service(users.id(), Some(&rev(4))).unwrap_err();
    assert!(matches!(
        err.source,
        OrchestratorError::UnknownRevision { .. }
    ));
    assert_eq!(users.rollback_calls(), 0);
    assert!(orch.backups().list(None).unwrap().is_empty());

    let err = orch
        .rollback_service(&ServiceId::from("ghost"), None)
        .unwrap_err();
    assert!(matches!(err.source, OrchestratorError::UnknownService(_)));
}

#[test]
fn restore_refuses_another_services_artifact() {
    let env = TestEnv::new();
    let users = env.fake("users", 3, 1);
    let billing = env.fake("billing", 3, 1);
    let orch = env.orchestrator(&[&users, &billing]);

    let report = orch.apply_all(&orch.plan(&[users.id().clone()]).unwrap()).unwrap();
    let users_artifact = report.services[0].backup.as_ref().unwrap().artifact_id.clone();

    let err: RunError = orch
        .restore_service(billing.id(), &users_artifact)
        .unwrap_err();
    assert!(matches!(
        err.source,
        OrchestratorError::Backup(BackupError::NotFound(_))
    ));
    assert_eq!(billing.current(), Some(rev(1)));

    let err = orch.restore_service(users.id(), "users_nope").unwrap_err();
    assert!(matches!(
        err.source,
        OrchestratorError::Backup(BackupError::NotFound(_))
    ));
}

#[test]
fn restore_unsticks_a_blocked_service() {
    let env = TestEnv::new();
    let users = env.fake("users", 4, 1);
    let orch = env.orchestrator(&[&users]);

    let report = orch.apply_all(&orch.plan_all().unwrap()).unwrap();
    let artifact_id = report.services[0].backup.as_ref().unwrap().artifact_id.clone();

    users.set_inconsistent(Some("checksum of migration 3 changed on disk"));
    assert!(matches!(
        orch.apply_all(&orch.plan_all().unwrap()).unwrap_err().source,
        OrchestratorError::Adapter(AdapterError::Blocked { .. })
    ));

    env.clock.advance(Duration::minutes(1));
    let err = orch.restore_service(users.id(), &artifact_id).unwrap_err();
    assert!(
        matches!(err.source, OrchestratorError::VerificationMismatch { .. }),
        "restore ran but the adapter still reports trouble"
    );
    assert_eq!(users.current(), Some(rev(1)));

    users.set_inconsistent(None);
    env.clock.advance(Duration::minutes(1));
    orch.restore_service(users.id(), &artifact_id).unwrap();
    assert_eq!(users.current(), Some(rev(1)));
}

#[test]
fn break_lock_is_audited_and_frees_the_service() {
    let env = TestEnv::new();
    let users = env.fake("users", 2, 0);
    let orch = env.orchestrator(&[&users]);

    other_operator(&env, "crashed-host")
        .acquire(users.id(), StdDuration::from_secs(600))
        .unwrap();
    assert_eq!(
        orch.apply_all(&orch.plan_all().unwrap()).unwrap_err().exit_code(),
        2
    );

    let removed = orch.break_lock(users.id()).unwrap().unwrap();
    assert_eq!(removed.holder_id, "crashed-host");
    let last = orch.audit_log().recent(1).unwrap().pop().unwrap();
    assert_eq!(last.label(), "lock:forced");
    assert_eq!(last.actor, "tester");
    assert!(last.detail.contains("crashed-host"));

    assert!(orch.break_lock(users.id()).unwrap().is_none());
    orch.apply_all(&orch.plan_all().unwrap()).unwrap();
    assert_eq!(users.current(), Some(rev(2)));
}

#[test]
fn prune_and_pin_are_audited() {
    let env = TestEnv::new();
    let users = env.fake("users", 5, 5);
    let orch = env
        .builder("tester", &[&users])
        .backup_config(BackupConfig {
            keep_last: 1,
            keep_daily: 0,
            keep_weekly: 0,
            ..BackupConfig::default()
        })
        .build()
        .unwrap();

    let mut artifacts = Vec::new();
    for _ in 0..3 {
        let report = orch.rollback_service(users.id(), None).unwrap();
        artifacts.push(report.services[0].backup.clone().unwrap().artifact_id);
        env.clock.advance(Duration::hours(1));
    }
    assert_eq!(users.current(), Some(rev(2)));

    let pinned = orch.set_backup_pinned(&artifacts[0], true).unwrap();
    assert!(pinned.pinned);
    assert_eq!(
        orch.audit_log().recent(1).unwrap()[0].detail,
        format!("pinned {}", artifacts[0])
    );

    let reports = orch.prune_backups(Some(users.id())).unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].removed, [artifacts[1].clone()]);
    assert_eq!(reports[0].pinned, [artifacts[0].clone()]);

    let last = orch.audit_log().recent(1).unwrap().pop().unwrap();
    assert_eq!(last.label(), "prune:ok");
    assert_eq!(last.service_id.as_ref(), Some(users.id()));
    assert!(last.detail.contains(&artifacts[1]));

    let remaining: Vec<String> = orch
        .backups()
        .list(Some(users.id()))
        .unwrap()
        .into_iter()
        .map(|a| a.id)
        .collect();
    assert_eq!(remaining, [artifacts[2].clone(), artifacts[0].clone()]);

    assert!(matches!(
        orch.set_backup_pinned("users_nope", true),
        Err(OrchestratorError::Backup(BackupError::NotFound(_)))
    ));
}

#[test]
fn status_reports_every_service_without_failing() {
    let env = TestEnv::new();
    let users = env.fake("users", 4, 1);
    let billing = env.fake("billing", 2, 2);
    let orch = env.orchestrator(&[&users, &billing]);

    let status = orch.status_all();
    assert_eq!(status.overall_status, OverallStatus::Pending);
    let users_status = &status.per_service["users"];
    assert_eq!(users_status.engine, "fake");
    assert_eq!(users_status.current_revision, Some(rev(1)));
    assert_eq!(users_status.latest_revision, Some(rev(4)));
    assert_eq!(users_status.pending_count, 3);
    assert_eq!(status.per_service["billing"].pending_count, 0);

    other_operator(&env, "operator-a")
        .acquire(billing.id(), StdDuration::from_secs(600))
        .unwrap();
    let status = orch.status_all();
    assert_eq!(
        status.per_service["billing"]
            .lock
            .as_ref()
            .map(|l| l.holder_id.as_str()),
        Some("operator-a")
    );

    billing.set_inconsistent(Some("dirty"));
    assert_eq!(orch.status_all().overall_status, OverallStatus::Blocked);

    users.set_unavailable(true);
    let status = orch.status_all();
    assert_eq!(status.overall_status, OverallStatus::Degraded);
    assert!(status.per_service["users"].unavailable.is_some());
    assert!(status.to_json().unwrap().contains("\"overallStatus\": \"degraded\""));

    let audited = orch.audit_log().count().unwrap();
    orch.status_all();
    assert_eq!(orch.audit_log().count().unwrap(), audited, "status is read-only");
}

#[test]
fn status_and_plan_run_alongside_an_apply() {
    let env = TestEnv::new();
    let users = env.fake("users", 30, 0);
    let orch = env.orchestrator(&[&users]);
    let plan = orch.plan_all().unwrap();

    std::thread::scope(|s| {
        let apply = s.spawn(|| orch.apply_all(&plan));
        for _ in 0..20 {
            let status = orch.status_all();
            let users_status = &status.per_service["users"];
            assert!(users_status.unavailable.is_none());
            assert!(users_status.pending_count <= 30);
            orch.plan_all().unwrap();
        }
        apply.join().unwrap().unwrap();
    });

    assert_eq!(orch.status_all().overall_status, OverallStatus::UpToDate);
}

#[test]
fn notifier_hears_about_every_run() {
    let env = TestEnv::new();
    let users = env.fake("users", 3, 0);
    let orch = env.orchestrator(&[&users]);

    orch.apply_all(&orch.plan_all().unwrap()).unwrap();
    env.clock.advance(Duration::minutes(1));
    users.without_down_scripts();
    orch.rollback_service(users.id(), None).unwrap_err();

    let reports = env.notifier.reports();
    assert_eq!(reports.len(), 2);
    assert!(reports[0].succeeded());
    assert_eq!(reports[0].actor, "tester");
    assert!(!reports[1].succeeded());
    assert_eq!(reports[1].exit_code, 1);
    assert!(reports[1].to_string().contains("FAILED"));
}

#[test]
fn duplicate_service_ids_are_rejected_at_build() {
    let env = TestEnv::new();
    let users = env.fake("users", 1, 0);
    let result = env.builder("tester", &[&users, &users]).build();
    assert!(matches!(result, Err(OrchestratorError::Config(_))));
}

#[test]
fn retention_that_keeps_nothing_is_rejected_at_build() {
    let env = TestEnv::new();
    let users = env.fake("users", 1, 0);
    let result = env
        .builder("tester", &[&users])
        .backup_config(BackupConfig {
            keep_last: 0,
            keep_daily: 0,
            keep_weekly: 0,
            ..BackupConfig::default()
        })
        .build();
    assert!(matches!(
        result,
        Err(OrchestratorError::Config(ConfigError::Invalid(_)))
    ));
}

#[test]
fn runs_real_engines_from_a_config_file() {
    let env = TestEnv::new();
    let root = env.dir.path();

    let users_migrations = root.join("migrations/users");
    std::fs::create_dir_all(&users_migrations).unwrap();
    std::fs::write(
        users_migrations.join("0001_create_users.up.sql"),
        "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL);",
    )
    .unwrap();
    std::fs::write(users_migrations.join("0001_create_users.down.sql"), "DROP TABLE users;")
        .unwrap();
    std::fs::write(
        users_migrations.join("0002_add_email.up.sql"),
        "ALTER TABLE users ADD COLUMN email TEXT;",
    )
    .unwrap();
    std::fs::write(
        users_migrations.join("0002_add_email.down.sql"),
        "ALTER TABLE users DROP COLUMN email;",
    )
    .unwrap();

    std::fs::write(
        root.join("billing_revisions.toml"),
        r#"
        [[revision]]
        id = "ab12"
        upgrade = "CREATE TABLE plans (code TEXT PRIMARY KEY);"
        downgrade = "DROP TABLE plans;"

        [[revision]]
        id = "cd34"
        parent = "ab12"
        upgrade = "CREATE TABLE invoices (id INTEGER PRIMARY KEY, plan TEXT REFERENCES plans(code));"
        downgrade = "DROP TABLE invoices;"
        "#,
    )
    .unwrap();

    common::create_db(&env.services_dir().join("users.db"));
    common::create_db(&env.services_dir().join("billing.db"));

    let config_path = root.join("convoy.toml");
    std::fs::write(
        &config_path,
        r#"
        state_dir = "state"
        actor = "deploy-bot"

        [lock]
        ttl_secs = 300

        [backup]
        keep_last = 2

        [[services]]
        id = "users"
        database = "services/users.db"
        engine = "numbered_sql"
        migrations_dir = "migrations/users"

        [[services]]
        id = "billing"
        database = "services/billing.db"
        engine = "revision_chain"
        revisions_file = "billing_revisions.toml"
        "#,
    )
    .unwrap();

    let config = ConvoyConfig::load(&config_path).unwrap();
    let orch = OrchestratorBuilder::from_config(&config)
        .clock(env.clock())
        .notifier(env.notifier.clone())
        .build()
        .unwrap();
    let order: Vec<&str> = orch.service_ids().map(|s| s.as_str()).collect();
    assert_eq!(order, ["users", "billing"]);

    let plan = orch.plan_all().unwrap();
    assert_eq!(plan.total_pending(), 4);
    let report = orch.apply_all(&plan).unwrap();
    assert_eq!(report.actor, "deploy-bot");
    assert_eq!(
        report.service(&ServiceId::from("billing")).unwrap().to,
        Some(RevisionId::Label("cd34".into()))
    );
    assert_eq!(orch.status_all().overall_status, OverallStatus::UpToDate);
    assert!(env.state_dir().join("convoy.db").is_file());
    assert_eq!(orch.backups().list(None).unwrap().len(), 2);

    env.clock.advance(Duration::minutes(1));
    let report = orch
        .rollback_service(&ServiceId::from("billing"), None)
        .unwrap();
    assert_eq!(
        report.services[0].to,
        Some(RevisionId::Label("ab12".into()))
    );
    let status = orch.status_all();
    assert_eq!(status.overall_status, OverallStatus::Pending);
    assert_eq!(status.per_service["billing"].engine, "revision_chain");
    assert_eq!(status.per_service["users"].engine, "numbered_sql");
}
