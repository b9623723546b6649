//! Drives the `etl-rs` command line in-process.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use etl_rs_clean::{CleanedSnapshot, Cleaner};
use etl_rs_cli::{run_cli, ExitStatus};
use etl_rs_core::health::StaticProbe;
use etl_rs_core::{RunContext, Settings};
use etl_rs_db::SourceSnapshot;
use etl_rs_profile::{ProfileReport, Profiler};
use tokio_util::sync::CancellationToken;

fn write_config(dir: &Path) -> PathBuf {
    let path = dir.join("etl.toml");
    let root = dir.display();
    std::fs::write(
        &path,
        format!(
            "log_level = \"warn\"\n\
             [paths]\n\
             state_dir = \"{root}/state\"\n\
             backup_dir = \"{root}/backups\"\n\
             work_dir = \"{root}/work\"\n\
             report_dir = \"{root}/reports\"\n\
             [target]\n\
             engine = \"sqlite\"\n\
             name = \"{root}/target.db\"\n"
        ),
    )
    .unwrap();
    path
}

/// `events(id, day, amount)` with `dmy` of `rows` days written DD/MM/YYYY.
fn make_source(dir: &Path, rows: usize, dmy: usize) -> PathBuf {
    let path = dir.join("app.db");
    let conn = rusqlite::Connection::open(&path).unwrap();
    conn.execute_batch("CREATE TABLE events (id INTEGER PRIMARY KEY, day TIMESTAMP, amount INTEGER)")
        .unwrap();
    for i in 0..rows {
        let day = if i < dmy {
            format!("{:02}/07/2024", i % 15 + 13)
        } else {
            format!("2024-{:02}-{:02}", i % 12 + 1, i % 28 + 1)
        };
        conn.execute(
            "INSERT INTO events (day, amount) VALUES (?1, ?2)",
            rusqlite::params![day, i64::try_from(i).unwrap()],
        )
        .unwrap();
    }
    path
}

async fn cli(args: &[&str]) -> ExitStatus {
    let mut argv = vec!["etl-rs"];
    argv.extend_from_slice(args);
    run_cli(argv, CancellationToken::new()).await
}

fn s(p: &Path) -> &str {
    p.to_str().unwrap()
}

#[tokio::test]
async fn test_backup_then_restore() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    let source = make_source(dir.path(), 20, 0);

    assert_eq!(
        cli(&["backup", "--config", s(&config), "--source", s(&source)]).await,
        ExitStatus::Success
    );
    let artifact = std::fs::read_dir(dir.path().join("backups"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .find(|p| p.extension().map_or(true, |e| e != "sha256"))
        .unwrap();

    let restored = dir.path().join("restored.db");
    assert_eq!(
        cli(&[
            "restore",
            "--config",
            s(&config),
            "--source",
            s(&artifact),
            "--output",
            s(&restored)
        ])
        .await,
        ExitStatus::Success
    );
    assert_eq!(std::fs::read(&restored).unwrap(), std::fs::read(&artifact).unwrap());
}

#[tokio::test]
async fn test_restore_rejects_unknown_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    let stray = dir.path().join("stray.db");
    std::fs::write(&stray, b"x").unwrap();
    let status = cli(&[
        "restore",
        "--config",
        s(&config),
        "--source",
        s(&stray),
        "--output",
        s(&dir.path().join("out.db")),
    ])
    .await;
    assert_eq!(status, ExitStatus::Failure);
    assert!(!dir.path().join("out.db").exists());
}

#[tokio::test]
async fn test_profile_writes_report_and_proceeds() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    let source = make_source(dir.path(), 200, 2);
    let report = dir.path().join("profile.json");

    let status = cli(&[
        "profile",
        "--json",
        "--config",
        s(&config),
        "--source",
        s(&source),
        "--output",
        s(&report),
    ])
    .await;
    assert_eq!(status, ExitStatus::Success);
    let loaded = ProfileReport::load(&report).unwrap();
    assert!(!loaded.is_halt());
    assert_eq!(loaded.tables[0].row_count, 200);
}

#[tokio::test]
async fn test_profile_halt_exits_1() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    // 30% of the only date column is DD/MM/YYYY.
    let source = make_source(dir.path(), 100, 30);
    let status = cli(&["profile", "--config", s(&config), "--source", s(&source)]).await;
    assert_eq!(status, ExitStatus::Failure);
    assert!(dir.path().join("reports").join("profile-app.json").exists());
}

#[tokio::test]
async fn test_migrate_dry_run_scores_without_touching_target() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    let source = make_source(dir.path(), 120, 0);

    let ctx = RunContext::new(1, Settings::default());
    let snapshot = SourceSnapshot::open(&source).await.unwrap();
    let report = Profiler::new(ctx.settings.profile.clone())
        .profile(&ctx, &snapshot)
        .await
        .unwrap();
    let cleaned: CleanedSnapshot = Cleaner::new(Arc::new(StaticProbe::healthy()))
        .clean(&ctx, &snapshot, &report, &dir.path().join("app.cleaned.db"))
        .await
        .unwrap();

    let status = cli(&[
        "migrate",
        "--dry-run",
        "--config",
        s(&config),
        "--source",
        s(&cleaned.path),
    ])
    .await;
    assert_eq!(status, ExitStatus::Success);
    assert!(!dir.path().join("target.db").exists());
}

#[tokio::test]
async fn test_sweep_on_empty_backup_dir() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    assert_eq!(
        cli(&["sweep", "--config", s(&config), "--json"]).await,
        ExitStatus::Success
    );
}

#[tokio::test]
async fn test_usage_and_config_errors_exit_1() {
    assert_eq!(cli(&["profile"]).await, ExitStatus::Failure);
    assert_eq!(cli(&["nonsense"]).await, ExitStatus::Failure);
    assert_eq!(
        cli(&["sweep", "--config", "/nonexistent/etl.toml"]).await,
        ExitStatus::Failure
    );
}
