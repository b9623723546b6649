//! Built-in preflight checks.

use std::path::Path;

use etl_rs_core::health::nearest_existing;
use etl_rs_core::utils::fs::with_suffix;
use etl_rs_db::{postgres_driver_available, BackendType};

use crate::check::{CheckResult, PreflightCheck, PreflightInput};

const MIB: u64 = 1024 * 1024;

/// The 16-byte header every `SQLite` 3 database starts with.
pub const SQLITE_MAGIC: &[u8; 16] = b"SQLite format 3\0";

/// Tools a `PostgreSQL` target needs for snapshots and rollback restores.
pub const PG_TOOLS: &[&str] = &["pg_dump", "pg_restore"];

#[allow(clippy::cast_precision_loss)]
fn mib(bytes: u64) -> f64 {
    bytes as f64 / MIB as f64
}

// ============================================================
// Source
// ============================================================

/// The source exists, is a regular file and carries the `SQLite` header.
#[derive(Debug, Default)]
pub struct SourceReadable;

#[async_trait::async_trait]
impl PreflightCheck for SourceReadable {
    fn name(&self) -> &'static str {
        "source_readable"
    }

    async fn run(&self, input: &PreflightInput) -> CheckResult {
        let name = self.name();
        let meta = match tokio::fs::metadata(&input.source).await {
            Ok(m) => m,
            Err(e) => {
                return CheckResult::fail(name, format!("cannot stat {}: {e}", input.source.display()))
                    .with_hint("Pass the path of an existing SQLite file with --source");
            }
        };
        if !meta.is_file() {
            return CheckResult::fail(name, format!("{} is not a file", input.source.display()));
        }
        match read_header(&input.source).await {
            Ok(header) if &header == SQLITE_MAGIC => CheckResult::pass(
                name,
                format!("{} ({:.1} MiB)", input.source.display(), mib(meta.len())),
            ),
            Ok(_) => CheckResult::fail(
                name,
                format!("{} is not a SQLite 3 database", input.source.display()),
            ),
            Err(e) => CheckResult::fail(name, format!("cannot read {}: {e}", input.source.display())),
        }
    }
}

async fn read_header(path: &Path) -> std::io::Result<[u8; 16]> {
    use tokio::io::AsyncReadExt;
    let mut file = tokio::fs::File::open(path).await?;
    let mut header = [0u8; 16];
    file.read_exact(&mut header).await?;
    Ok(header)
}

/// Warns when the source has a live write-ahead log.
#[derive(Debug, Default)]
pub struct SourceWal;

#[async_trait::async_trait]
impl PreflightCheck for SourceWal {
    fn name(&self) -> &'static str {
        "source_wal"
    }

    async fn run(&self, input: &PreflightInput) -> CheckResult {
        let wal = with_suffix(&input.source, "-wal");
        match tokio::fs::metadata(&wal).await {
            Ok(m) if m.len() > 0 => CheckResult::warning(
                self.name(),
                format!("{} holds {} bytes of uncheckpointed frames", wal.display(), m.len()),
            )
            .with_hint("Stop writers and checkpoint the source before migrating"),
            _ => CheckResult::pass(self.name(), "no pending write-ahead log"),
        }
    }
}

// ============================================================
// Host
// ============================================================

/// Free space for backups and cleaned snapshots is at least
/// `disk_multiplier` times the source size.
#[derive(Debug, Default)]
pub struct DiskSpace;

#[async_trait::async_trait]
impl PreflightCheck for DiskSpace {
    fn name(&self) -> &'static str {
        "disk_space"
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    async fn run(&self, input: &PreflightInput) -> CheckResult {
        let name = self.name();
        let Ok(meta) = tokio::fs::metadata(&input.source).await else {
            return CheckResult::fail(name, "cannot size the source");
        };
        let required = (meta.len() as f64 * input.settings.disk_multiplier).ceil() as u64;

        let mut observed = Vec::new();
        for dir in [&input.paths.backup_dir, &input.paths.work_dir] {
            match input.probe.free_disk_bytes(dir).await {
                Ok(free) if free >= required => {
                    observed.push(format!("{}: {:.1} MiB free", dir.display(), mib(free)));
                }
                Ok(free) => {
                    return CheckResult::fail(
                        name,
                        format!(
                            "{}: {:.1} MiB free, {:.1} MiB required ({}x source)",
                            dir.display(),
                            mib(free),
                            mib(required),
                            input.settings.disk_multiplier
                        ),
                    )
                    .with_hint("Free disk space or point paths.backup_dir/work_dir elsewhere");
                }
                Err(e) => return CheckResult::fail(name, e.reason()),
            }
        }
        CheckResult::pass(name, observed.join("; "))
    }
}

/// Available memory is at least `min_memory_mb`.
#[derive(Debug, Default)]
pub struct Memory;

#[async_trait::async_trait]
impl PreflightCheck for Memory {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn run(&self, input: &PreflightInput) -> CheckResult {
        let floor = input.settings.min_memory_mb * MIB;
        match input.probe.memory().await {
            Ok(m) if m.available_bytes >= floor => CheckResult::pass(
                self.name(),
                format!("{:.0} MiB available", mib(m.available_bytes)),
            ),
            Ok(m) => CheckResult::fail(
                self.name(),
                format!(
                    "{:.0} MiB available, {} MiB required",
                    mib(m.available_bytes),
                    input.settings.min_memory_mb
                ),
            )
            .with_hint("Free memory or lower preflight.min_memory_mb"),
            Err(e) => CheckResult::fail(self.name(), e.reason()),
        }
    }
}

/// Every output directory (or its nearest existing ancestor) accepts new
/// files. The probe file is anonymous and vanishes when closed.
#[derive(Debug, Default)]
pub struct DirectoriesWritable;

#[async_trait::async_trait]
impl PreflightCheck for DirectoriesWritable {
    fn name(&self) -> &'static str {
        "directories_writable"
    }

    async fn run(&self, input: &PreflightInput) -> CheckResult {
        let dirs = input.output_dirs();
        let outcome = tokio::task::spawn_blocking(move || {
            let mut problems = Vec::new();
            for (label, dir) in dirs {
                let probe_at = nearest_existing(&dir);
                if let Err(e) = tempfile::tempfile_in(&probe_at) {
                    problems.push(format!("{label} ({}): {e}", probe_at.display()));
                }
            }
            problems
        })
        .await;
        match outcome {
            Ok(problems) if problems.is_empty() => {
                CheckResult::pass(self.name(), "all output directories are writable")
            }
            Ok(problems) => CheckResult::fail(self.name(), problems.join("; "))
                .with_hint("Fix permissions on the paths.* directories"),
            Err(e) => CheckResult::fail(self.name(), format!("probe task failed: {e}")),
        }
    }
}

// ============================================================
// Target
// ============================================================

/// The target answers a ping within the connect timeout.
#[derive(Debug, Default)]
pub struct TargetConnectivity;

#[async_trait::async_trait]
impl PreflightCheck for TargetConnectivity {
    fn name(&self) -> &'static str {
        "target_connectivity"
    }

    async fn run(&self, input: &PreflightInput) -> CheckResult {
        if input.target_backend.is_none()
            && input.target.backend == BackendType::SQLite
            && !Path::new(&input.target.name).exists()
        {
            // Opening would create the file.
            let parent = nearest_existing(Path::new(&input.target.name));
            return CheckResult::pass(
                self.name(),
                format!("{} will be created under {}", input.target.name, parent.display()),
            );
        }
        let backend = match &input.target_backend {
            Some(b) => std::sync::Arc::clone(b),
            None => match etl_rs_db::connect(&input.target) {
                Ok(b) => b,
                Err(e) => return CheckResult::fail(self.name(), e.reason()),
            },
        };
        let timeout = std::time::Duration::from_secs(input.target.connect_timeout_secs);
        match tokio::time::timeout(timeout, backend.ping()).await {
            Ok(Ok(())) => CheckResult::pass(
                self.name(),
                format!("{} reachable", input.target.identity()),
            ),
            Ok(Err(e)) => CheckResult::fail(self.name(), e.reason())
                .with_hint("Check target.host/port/user/password and that the server is up"),
            Err(_) => CheckResult::fail(
                self.name(),
                format!(
                    "{} did not answer within {}s",
                    input.target.identity(),
                    input.target.connect_timeout_secs
                ),
            ),
        }
    }
}

/// Tools for snapshotting and restoring the target are present.
#[derive(Debug, Default)]
pub struct BackupTooling;

#[async_trait::async_trait]
impl PreflightCheck for BackupTooling {
    fn name(&self) -> &'static str {
        "backup_tooling"
    }

    async fn run(&self, input: &PreflightInput) -> CheckResult {
        if input.target.backend == BackendType::SQLite {
            return CheckResult::pass(self.name(), "SQLite online backup is built in");
        }
        let missing: Vec<&str> = PG_TOOLS
            .iter()
            .copied()
            .filter(|t| input.tools.find(t).is_none())
            .collect();
        if missing.is_empty() {
            return CheckResult::pass(self.name(), format!("found {}", PG_TOOLS.join(", ")));
        }
        let message = format!("not on PATH: {}", missing.join(", "));
        let result = if input.settings.require_backup_tool {
            CheckResult::fail(self.name(), message)
        } else {
            CheckResult::warning(self.name(), format!("{message}; target rollback cannot restore"))
        };
        result.with_hint("Install the PostgreSQL client tools")
    }
}

/// The drivers this run needs are compiled in.
#[derive(Debug, Default)]
pub struct DriverAvailability;

#[async_trait::async_trait]
impl PreflightCheck for DriverAvailability {
    fn name(&self) -> &'static str {
        "driver_availability"
    }

    async fn run(&self, input: &PreflightInput) -> CheckResult {
        let sqlite = etl_rs_db::sqlite_version();
        if input.target.backend == BackendType::PostgreSQL && !postgres_driver_available() {
            return CheckResult::fail(
                self.name(),
                format!("SQLite {sqlite}; no PostgreSQL driver in this build"),
            )
            .with_hint("Rebuild with the `postgres` feature");
        }
        CheckResult::pass(
            self.name(),
            format!("SQLite {sqlite}; target driver {}", input.target.backend),
        )
    }
}

/// Every built-in check with its tags.
pub fn builtins() -> Vec<(Box<dyn PreflightCheck>, &'static [&'static str])> {
    vec![
        (Box::new(SourceReadable), &["source"]),
        (Box::new(SourceWal), &["source"]),
        (Box::new(DiskSpace), &["host"]),
        (Box::new(Memory), &["host"]),
        (Box::new(DirectoriesWritable), &["host"]),
        (Box::new(TargetConnectivity), &["target"]),
        (Box::new(BackupTooling), &["target", "host"]),
        (Box::new(DriverAvailability), &["target"]),
    ]
}
