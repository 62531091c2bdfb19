//! Property tests: audit ordering, lock exclusion against a model, and
//! apply/rollback symmetry on the numbered-SQL engine.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;
use rusqlite::Connection;

use convoy_core::traits::{Clock, ManualClock, ServiceAdapter};
use convoy_core::types::{AuditOperation, AuditOutcome, NewAuditEntry, RevisionId, ServiceId};
use convoy_orchestrator::{AuditLog, CoordinatorDb, LockManager, NumberedSqlAdapter};

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap()
}

const OPERATIONS: [AuditOperation; 5] = [
    AuditOperation::Plan,
    AuditOperation::Lock,
    AuditOperation::Backup,
    AuditOperation::Apply,
    AuditOperation::Verify,
];

// Sequence numbers are strictly increasing and `recent` returns exactly what
// was appended, in order.
proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_audit_sequence_is_monotonic(
        appends in prop::collection::vec((0usize..5, prop::option::of(0usize..3)), 1..40)
    ) {
        let dir = tempfile::tempdir().unwrap();
        let db = CoordinatorDb::open(dir.path().join("convoy.db")).unwrap();
        let log = AuditLog::new(db, Arc::new(ManualClock::new(start())));
        let services = ["users", "billing", "search"].map(ServiceId::from);

        let mut written = Vec::new();
        for (op, service) in &appends {
            let mut entry = NewAuditEntry::new("prop", OPERATIONS[*op], AuditOutcome::Ok);
            if let Some(s) = service {
                entry = entry.service(&services[*s]);
            }
            written.push(log.append(entry).unwrap());
        }

        for pair in written.windows(2) {
            prop_assert!(pair[0].sequence_no < pair[1].sequence_no);
        }
        prop_assert_eq!(log.recent(appends.len()).unwrap(), written.clone());
        for service in &services {
            let expected: Vec<_> = written
                .iter()
                .filter(|e| e.service_id.as_ref() == Some(service))
                .cloned()
                .collect();
            prop_assert_eq!(log.by_service(service).unwrap(), expected);
        }
    }
}

#[derive(Debug, Clone)]
enum LockStep {
    Acquire(usize),
    Release(usize),
    Advance(i64),
}

fn lock_step() -> impl Strategy<Value = LockStep> {
    prop_oneof![
        (0usize..3).prop_map(LockStep::Acquire),
        (0usize..3).prop_map(LockStep::Release),
        (0i64..15).prop_map(LockStep::Advance),
    ]
}

/// Expected lock row: holder index, the token's acquire ordinal, expiry.
#[derive(Debug, Clone, Copy)]
struct ModelLock {
    holder: usize,
    ordinal: usize,
    expires_at: DateTime<Utc>,
}

// At most one live holder at any instant, and acquire/release agree with a
// single-row model of `service_locks`.
proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_lock_exclusion_matches_model(steps in prop::collection::vec(lock_step(), 1..40)) {
        let dir = tempfile::tempdir().unwrap();
        let db = CoordinatorDb::open(dir.path().join("convoy.db")).unwrap();
        let clock = Arc::new(ManualClock::new(start()));
        let managers: Vec<LockManager> = (0..3)
            .map(|i| {
                let clock: Arc<dyn Clock> = clock.clone();
                LockManager::new(db.clone(), clock, format!("holder-{i}"))
            })
            .collect();
        let service = ServiceId::from("users");
        let ttl = Duration::from_secs(600);

        let mut model: Option<ModelLock> = None;
        let mut tokens = vec![None, None, None];
        let mut ordinal = 0;

        for step in steps {
            let now = clock.now();
            match step {
                LockStep::Acquire(h) => {
                    let live = model.filter(|m| now <= m.expires_at);
                    let result = managers[h].acquire(&service, ttl);
                    match live {
                        Some(m) => {
                            prop_assert!(result.is_err(), "acquired over holder-{}", m.holder);
                        }
                        None => {
                            let grant = result.unwrap();
                            ordinal += 1;
                            model = Some(ModelLock {
                                holder: h,
                                ordinal,
                                expires_at: grant.token.expires_at,
                            });
                            tokens[h] = Some((ordinal, grant.token));
                        }
                    }
                }
                LockStep::Release(h) => {
                    if let Some((token_ordinal, token)) = &tokens[h] {
                        managers[h].release(token).unwrap();
                        if model.map(|m| m.ordinal) == Some(*token_ordinal) {
                            model = None;
                        }
                    }
                }
                LockStep::Advance(minutes) => clock.advance(chrono::Duration::minutes(minutes)),
            }

            let now = clock.now();
            let expected = model.filter(|m| now <= m.expires_at).map(|m| format!("holder-{}", m.holder));
            let actual = managers[0].holder(&service).unwrap().map(|info| info.holder_id);
            prop_assert_eq!(actual, expected);
            prop_assert!(managers[0].active_locks().unwrap().len() <= 1);
        }
    }
}

// Applying k revisions then rolling back j leaves the service exactly where
// applying k - j would have.
proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_rollback_undoes_apply(
        (total, applied, reverted) in (1u64..6)
            .prop_flat_map(|total| (Just(total), 0..=total))
            .prop_flat_map(|(total, applied)| (Just(total), Just(applied), 0..=applied))
    ) {
        let dir = tempfile::tempdir().unwrap();
        let database = dir.path().join("svc.db");
        let migrations = dir.path().join("migrations");
        std::fs::create_dir_all(&migrations).unwrap();
        Connection::open(&database)
            .unwrap()
            .execute_batch("CREATE TABLE app_data (k TEXT);")
            .unwrap();
        for v in 1..=total {
            std::fs::write(
                migrations.join(format!("{v:04}_t{v}.up.sql")),
                format!("CREATE TABLE t{v} (id INTEGER);"),
            )
            .unwrap();
            std::fs::write(
                migrations.join(format!("{v:04}_t{v}.down.sql")),
                format!("DROP TABLE t{v};"),
            )
            .unwrap();
        }
        let adapter = NumberedSqlAdapter::new(ServiceId::from("svc"), &database, &migrations);

        for _ in 0..applied {
            adapter.apply_next().unwrap();
        }
        for _ in 0..reverted {
            adapter.rollback_last().unwrap();
        }

        let remaining = applied - reverted;
        let status = adapter.status().unwrap();
        prop_assert!(status.is_consistent());
        prop_assert_eq!(
            status.applied,
            (1..=remaining).map(RevisionId::Number).collect::<Vec<_>>()
        );
        prop_assert_eq!(status.pending.len() as u64, total - remaining);

        let conn = Connection::open(&database).unwrap();
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name GLOB 't[0-9]*'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        prop_assert_eq!(tables as u64, remaining);
    }
}
