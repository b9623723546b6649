//! End-to-end Migration Runs against a SQLite target.
//!
//! The main scenario: 1,000 events whose TIMESTAMP-declared, text-stored day
//! column holds 9 `DD/MM/YYYY` values amid `YYYY-MM-DD` ones, and whose
//! integer amount column holds 5 empty strings.

use etl_rs_backup::BackupManager;
use etl_rs_migrate::{RunReport, RunStatus};
use etl_rs_profile::{ProfileReport, TimestampFormat};
use etl_rs_test::{seeded_target, EventsMix, TestWorkspace};

async fn count(ws: &TestWorkspace, sql: &str) -> i64 {
    ws.target()
        .unwrap()
        .backend()
        .query_one(sql, &[])
        .await
        .unwrap()
        .get("n")
        .unwrap()
}

#[tokio::test]
async fn test_scenario_completes_with_verified_target() {
    let ws = TestWorkspace::with_events(EventsMix::scenario());
    let before = ws.source_checksum();

    let outcome = ws.pipeline().unwrap().run(&ws.source_path()).await.unwrap();
    assert_eq!(outcome.status(), RunStatus::Completed, "{:?}", outcome.report.failure);
    assert_eq!(outcome.exit_code(), 0);
    assert!(outcome.report_path.ends_with("report.json"));

    // Profile: the minority layout is flagged, confidence stays above the floor.
    let profile = ProfileReport::load(outcome.report.profile_report.as_ref().unwrap()).unwrap();
    assert!(!profile.is_halt());
    let day = profile.column("events", "day").unwrap();
    assert_eq!(day.format, Some(TimestampFormat::IsoDate));
    assert!(day.confidence >= 0.95);
    assert!(!day.ambiguous);
    assert!(day
        .alternate_formats
        .iter()
        .any(|f| f.format == TimestampFormat::DayMonthYearSlash));
    assert!(profile
        .remediation
        .reencode_timestamps
        .contains(&"events.day".to_string()));
    assert!(profile
        .remediation
        .empty_to_null
        .contains(&"events.amount".to_string()));

    // Migration: 1,000 rows verified by count and digest.
    let migration = outcome.report.migration.as_ref().unwrap();
    assert!(migration.is_completed());
    let events = &migration.tables[0];
    assert_eq!(events.table, "events");
    assert_eq!(events.source_rows, 1000);
    assert_eq!(events.target_rows, Some(1000));
    assert_eq!(events.digest_match, Some(true));
    assert_eq!(events.canary_rows, 100);

    // Cleaning: 9 days re-encoded, 5 amounts nulled.
    let metrics = &outcome.report.metrics;
    assert_eq!(metrics.counters.get("clean.reencoded"), Some(&9));
    assert_eq!(metrics.counters.get("clean.empty_to_null"), Some(&5));

    assert_eq!(count(&ws, "SELECT COUNT(*) AS n FROM events").await, 1000);
    assert_eq!(
        count(&ws, "SELECT COUNT(*) AS n FROM events WHERE day LIKE '__/__/____'").await,
        0
    );
    assert_eq!(
        count(&ws, "SELECT COUNT(*) AS n FROM events WHERE amount IS NULL").await,
        5
    );
    assert_eq!(count(&ws, "SELECT COUNT(*) AS n FROM customers").await, 3);
    assert_eq!(
        count(
            &ws,
            "SELECT COUNT(*) AS n FROM sqlite_master WHERE name LIKE '\\_etl\\_stage%' ESCAPE '\\'"
        )
        .await,
        0
    );

    // Source untouched.
    assert_eq!(ws.source_checksum(), before);
}

#[tokio::test]
async fn test_scenario_records_run_and_artifacts() {
    let ws = TestWorkspace::with_events(EventsMix::scenario());
    let outcome = ws.pipeline().unwrap().run(&ws.source_path()).await.unwrap();
    assert_eq!(outcome.status(), RunStatus::Completed);

    let report = RunReport::load(&outcome.report_path).unwrap();
    assert_eq!(report.status, outcome.report.status);
    assert_eq!(report.correlation_id, outcome.report.correlation_id);
    assert_eq!(report.run_id, 1);
    assert_eq!(report.source_checksum, ws.source_checksum());
    assert_eq!(
        report.preflight.as_ref().unwrap()["exit_code"].as_i64(),
        Some(0)
    );

    // Source, cleaned snapshot and target were all backed up and verify.
    assert_eq!(report.backups.len(), 3);
    let manager = BackupManager::from_settings(&ws.settings().paths);
    for artifact in &report.backups {
        assert!(manager.verify(artifact).await.unwrap(), "{}", artifact.path.display());
    }
    assert!(manager
        .verify_against_source(&ws.source_path(), &report.backups[0])
        .await
        .unwrap());

    let record = ws.ledger().get(1).unwrap().unwrap();
    assert_eq!(record.status, RunStatus::Completed);
    assert!(record.finished_at.is_some());
    assert_eq!(record.report.as_deref(), Some(outcome.report_path.as_path()));
    assert_eq!(record.backups.len(), 3);
    assert!(record.cleaned_snapshot.unwrap().exists());
    assert!(ws.ledger().protected_artifacts().unwrap().is_empty());
}

#[tokio::test]
async fn test_second_run_replaces_live_table() {
    let ws = TestWorkspace::with_events(EventsMix::scenario());
    let pipeline = ws.pipeline().unwrap();

    let first = pipeline.run(&ws.source_path()).await.unwrap();
    let second = pipeline.run(&ws.source_path()).await.unwrap();
    assert_eq!(first.status(), RunStatus::Completed);
    assert_eq!(second.status(), RunStatus::Completed);
    assert_eq!(second.report.run_id, 2);
    assert_ne!(first.report_path, second.report_path);
    assert_eq!(count(&ws, "SELECT COUNT(*) AS n FROM events").await, 1000);
}

#[tokio::test]
async fn test_reencoded_key_collision_still_loads() {
    // `13/01/2024` cleans to the same date as the ISO row `2024-01-13`.
    let ws = TestWorkspace::new();
    seeded_target(&ws.target_path()).unwrap();
    let conn = rusqlite::Connection::open(ws.source_path()).unwrap();
    conn.execute_batch("CREATE TABLE days (day TIMESTAMP PRIMARY KEY, v INTEGER)")
        .unwrap();
    for i in 0..99 {
        let day = format!("2024-{:02}-{:02}", i / 28 + 1, i % 28 + 1);
        conn.execute("INSERT INTO days VALUES (?1, ?2)", rusqlite::params![day, i])
            .unwrap();
    }
    conn.execute("INSERT INTO days VALUES ('13/01/2024', 99)", [])
        .unwrap();
    drop(conn);

    let outcome = ws.pipeline().unwrap().run(&ws.source_path()).await.unwrap();
    assert_eq!(outcome.status(), RunStatus::Completed, "{:?}", outcome.report.failure);
    assert_eq!(count(&ws, "SELECT COUNT(*) AS n FROM days").await, 100);
    assert_eq!(
        count(&ws, "SELECT COUNT(*) AS n FROM days WHERE day = '2024-01-13'").await,
        2
    );
}
