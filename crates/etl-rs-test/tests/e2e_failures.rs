//! Runs that do not complete: each must leave the source and the target as
//! they were, release the run lock and explain itself in `failure.json`.
//! The last tests change the source from outside while a run is going.

use std::sync::Arc;

use etl_rs_migrate::{RunLock, RunOutcome, RunReport, RunStatus, TargetFingerprint};
use etl_rs_profile::ProfileReport;
use etl_rs_test::{EventsMix, Fault, FaultyBackend, TamperingHost, TestWorkspace};
use tokio_util::sync::CancellationToken;

struct Baseline {
    source: String,
    target: TargetFingerprint,
}

async fn baseline(ws: &TestWorkspace) -> Baseline {
    Baseline {
        source: ws.source_checksum(),
        target: ws.target().unwrap().fingerprint().await.unwrap(),
    }
}

/// The run left everything as it found it and said why.
async fn assert_untouched(ws: &TestWorkspace, before: &Baseline, outcome: &RunOutcome) {
    assert_eq!(ws.source_checksum(), before.source, "source changed");
    let after = ws.target().unwrap().fingerprint().await.unwrap();
    assert_eq!(after.differences(&before.target), Vec::<String>::new());
    assert_eq!(after, before.target);

    assert_eq!(outcome.exit_code(), 1);
    assert!(outcome.report_path.ends_with("failure.json"));
    let written = RunReport::load(&outcome.report_path).unwrap();
    let failure = written.failure.unwrap();
    assert!(!failure.reason.is_empty());
    assert!(!failure.code.is_empty());

    let identity = ws.target().unwrap().identity().to_string();
    assert!(!RunLock::path_for(&ws.settings().paths.state_dir, &identity).exists());
    let record = ws.ledger().get(outcome.report.run_id).unwrap().unwrap();
    assert_eq!(record.status, outcome.status());
    assert!(record.status.is_terminal());
    assert_eq!(record.failure.as_ref().map(|f| f.code.as_str()), Some(failure.code.as_str()));
}

async fn run_with_fault(fault: Fault) -> (TestWorkspace, Baseline, RunOutcome) {
    let ws = TestWorkspace::with_events(EventsMix::scenario());
    let before = baseline(&ws).await;
    let target = FaultyBackend::install(ws.target().unwrap(), fault);
    let outcome = ws
        .pipeline_with(target)
        .run(&ws.source_path())
        .await
        .unwrap();
    (ws, before, outcome)
}

fn failure(outcome: &RunOutcome) -> (&str, &str) {
    let f = outcome.report.failure.as_ref().unwrap();
    (f.stage.as_str(), f.code.as_str())
}

#[tokio::test]
async fn test_rollback_from_canary() {
    let (ws, before, outcome) = run_with_fault(Fault::Fail {
        nth: 1,
        transient: false,
    })
    .await;
    assert_eq!(outcome.status(), RunStatus::RolledBack);
    assert_eq!(failure(&outcome), ("canary", "TARGET_ERROR"));
    let rollback = outcome.report.migration.as_ref().unwrap().rollback.clone().unwrap();
    assert!(rollback.verified);
    assert_untouched(&ws, &before, &outcome).await;
}

#[tokio::test]
async fn test_rollback_from_full_load() {
    // 50-row batches: two for the canary, the rest in the full load.
    let (ws, before, outcome) = run_with_fault(Fault::Fail {
        nth: 7,
        transient: false,
    })
    .await;
    assert_eq!(outcome.status(), RunStatus::RolledBack);
    assert_eq!(failure(&outcome), ("full_load", "TARGET_ERROR"));
    assert_untouched(&ws, &before, &outcome).await;

    let history: Vec<RunStatus> = outcome
        .report
        .migration
        .as_ref()
        .unwrap()
        .run_statuses();
    assert_eq!(
        history,
        vec![
            RunStatus::CanaryMigrating,
            RunStatus::FullMigrating,
            RunStatus::RolledBack
        ]
    );
}

#[tokio::test]
async fn test_rollback_from_verify() {
    let (ws, before, outcome) = run_with_fault(Fault::Drop { nth: 12 }).await;
    assert_eq!(outcome.status(), RunStatus::RolledBack);
    assert_eq!(failure(&outcome), ("verify", "INTEGRITY_ERROR"));
    assert_untouched(&ws, &before, &outcome).await;
}

#[tokio::test]
async fn test_transient_target_error_is_retried() {
    let (ws, _, outcome) = run_with_fault(Fault::Fail {
        nth: 5,
        transient: true,
    })
    .await;
    assert_eq!(outcome.status(), RunStatus::Completed, "{:?}", outcome.report.failure);
    let rows = ws
        .target()
        .unwrap()
        .backend()
        .query_one("SELECT COUNT(*) AS n FROM events", &[])
        .await
        .unwrap()
        .get::<i64>("n")
        .unwrap();
    assert_eq!(rows, 1000);
}

#[tokio::test]
async fn test_cancel_during_full_load_rolls_back() {
    let ws = TestWorkspace::with_events(EventsMix::scenario());
    let before = baseline(&ws).await;
    let cancel = CancellationToken::new();
    let target = FaultyBackend::install(
        ws.target().unwrap(),
        Fault::Cancel {
            nth: 4,
            token: cancel.clone(),
        },
    );
    let outcome = ws
        .pipeline_with(target)
        .run_until(&ws.source_path(), &cancel)
        .await
        .unwrap();
    assert_eq!(outcome.status(), RunStatus::RolledBack);
    assert_eq!(failure(&outcome), ("full_load", "CANCELLED"));
    assert_untouched(&ws, &before, &outcome).await;
}

#[tokio::test]
async fn test_cancel_before_start_fails_cleanly() {
    let ws = TestWorkspace::with_events(EventsMix::scenario());
    let before = baseline(&ws).await;
    let cancel = CancellationToken::new();
    cancel.cancel();
    let outcome = ws
        .pipeline()
        .unwrap()
        .run_until(&ws.source_path(), &cancel)
        .await
        .unwrap();
    assert_eq!(outcome.status(), RunStatus::Failed);
    assert_eq!(failure(&outcome), ("preflight", "CANCELLED"));
    assert!(outcome.report.migration.is_none());
    assert_untouched(&ws, &before, &outcome).await;
}

#[tokio::test]
async fn test_circuit_breaker_halts_at_fifteen_percent() {
    let ws = TestWorkspace::with_events(EventsMix::with_unparseable(1000, 15));
    let before = baseline(&ws).await;
    let outcome = ws.pipeline().unwrap().run(&ws.source_path()).await.unwrap();

    assert_eq!(outcome.status(), RunStatus::Failed);
    assert_eq!(failure(&outcome), ("profile", "CIRCUIT_BREAKER_HALT"));
    let profile = ProfileReport::load(outcome.report.profile_report.as_ref().unwrap()).unwrap();
    assert!(profile.is_halt());
    assert!(!profile.circuit_breaker.reason.is_empty());
    assert!(outcome.report.cleaned_snapshot.is_none());
    // Only the source was backed up.
    assert_eq!(outcome.report.backups.len(), 1);
    assert_untouched(&ws, &before, &outcome).await;
}

#[tokio::test]
async fn test_circuit_breaker_proceeds_at_five_percent() {
    let ws = TestWorkspace::with_events(EventsMix::with_unparseable(1000, 5));
    let outcome = ws.pipeline().unwrap().run(&ws.source_path()).await.unwrap();

    assert_eq!(outcome.status(), RunStatus::Completed, "{:?}", outcome.report.failure);
    let profile = ProfileReport::load(outcome.report.profile_report.as_ref().unwrap()).unwrap();
    assert!(profile
        .remediation
        .unparseable_to_null
        .contains(&"events.day".to_string()));
    assert_eq!(
        outcome.report.metrics.counters.get("clean.unparseable_to_null"),
        Some(&50)
    );
    let nulls = ws
        .target()
        .unwrap()
        .backend()
        .query_one("SELECT COUNT(*) AS n FROM events WHERE day IS NULL", &[])
        .await
        .unwrap()
        .get::<i64>("n")
        .unwrap();
    assert_eq!(nulls, 50);
}

#[tokio::test]
async fn test_runs_against_one_target_are_serialized() {
    let ws = TestWorkspace::with_events(EventsMix::scenario());
    let before = baseline(&ws).await;
    let pipeline = ws.pipeline().unwrap();
    let identity = pipeline.orchestrator().target().identity().to_string();

    let held = RunLock::acquire(&ws.settings().paths.state_dir, &identity, 99).unwrap();
    let refused = pipeline.run(&ws.source_path()).await.unwrap();
    assert_eq!(refused.status(), RunStatus::Failed);
    assert_eq!(failure(&refused), ("lock", "ENVIRONMENT_ERROR"));
    assert!(refused.report.backups.is_empty());
    assert_eq!(ws.source_checksum(), before.source);
    assert_eq!(ws.target().unwrap().fingerprint().await.unwrap(), before.target);
    held.release().unwrap();

    let accepted = pipeline.run(&ws.source_path()).await.unwrap();
    assert_eq!(accepted.status(), RunStatus::Completed);
    assert_eq!(accepted.report.run_id, refused.report.run_id + 1);
}

#[tokio::test]
async fn test_missing_source_fails_before_any_stage() {
    let ws = TestWorkspace::new();
    let outcome = ws
        .pipeline()
        .unwrap()
        .run(&ws.path().join("absent.db"))
        .await
        .unwrap();
    assert_eq!(outcome.status(), RunStatus::Failed);
    assert_eq!(failure(&outcome).0, "source");
    assert!(outcome.report_path.ends_with("failure.json"));
    assert!(outcome.report.backups.is_empty());
}

#[tokio::test]
async fn test_source_changed_during_load_fails_completed_run() {
    let ws = TestWorkspace::with_events(EventsMix::scenario());
    let target = FaultyBackend::install(
        ws.target().unwrap(),
        Fault::Touch {
            nth: 7,
            path: ws.source_path(),
        },
    );
    let outcome = ws
        .pipeline_with(target)
        .run(&ws.source_path())
        .await
        .unwrap();

    let history = outcome.report.migration.as_ref().unwrap().run_statuses();
    assert_eq!(history.last(), Some(&RunStatus::Completed));
    assert_eq!(outcome.status(), RunStatus::Failed);
    assert_eq!(outcome.exit_code(), 1);
    assert_eq!(failure(&outcome), ("source_check", "INTEGRITY_ERROR"));
    assert!(outcome.report_path.ends_with("failure.json"));

    let record = ws.ledger().get(outcome.report.run_id).unwrap().unwrap();
    assert_eq!(record.status, RunStatus::Failed);
    assert_eq!(
        record.failure.as_ref().map(|f| f.stage.as_str()),
        Some("source_check")
    );
}

#[tokio::test]
async fn test_source_changed_before_load_leaves_target_untouched() {
    let ws = TestWorkspace::with_events(EventsMix::scenario());
    let before = baseline(&ws).await;
    let outcome = ws
        .pipeline()
        .unwrap()
        .with_probe(Arc::new(TamperingHost::new(ws.source_path())))
        .run(&ws.source_path())
        .await
        .unwrap();

    assert_eq!(outcome.status(), RunStatus::Failed);
    assert_eq!(failure(&outcome), ("source_check", "INTEGRITY_ERROR"));
    assert!(outcome.report.migration.is_none());
    assert_ne!(ws.source_checksum(), before.source);
    assert_eq!(ws.target().unwrap().fingerprint().await.unwrap(), before.target);
    assert_eq!(outcome.exit_code(), 1);
    let record = ws.ledger().get(outcome.report.run_id).unwrap().unwrap();
    assert_eq!(record.status, RunStatus::Failed);
}
