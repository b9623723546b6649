//! Settings for etl-rs.
//!
//! [`Settings`] holds every tunable of the pipeline with sensible defaults.
//! There is deliberately no global instance: a run's settings travel inside
//! its [`RunContext`](crate::context::RunContext).

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EtlError;

/// Filesystem locations used by a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathSettings {
    /// Run ledger and run locks.
    pub state_dir: PathBuf,
    /// Backup artifacts and their checksum files.
    pub backup_dir: PathBuf,
    /// Cleaned snapshots.
    pub work_dir: PathBuf,
    /// Profile reports, run reports and failure reports.
    pub report_dir: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(".etl/state"),
            backup_dir: PathBuf::from(".etl/backups"),
            work_dir: PathBuf::from(".etl/work"),
            report_dir: PathBuf::from(".etl/reports"),
        }
    }
}

/// Target database connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetSettings {
    /// The target engine: `postgresql` or `sqlite`.
    pub engine: String,
    /// The database name (or file path for `SQLite`).
    pub name: String,
    /// The database host.
    pub host: String,
    /// The database port.
    pub port: u16,
    /// The database user.
    pub user: String,
    /// The database password.
    pub password: String,
    /// The schema that holds live tables (`PostgreSQL` only).
    pub schema: String,
    /// Timeout for establishing a connection or answering a ping.
    pub connect_timeout_secs: u64,
}

impl Default for TargetSettings {
    fn default() -> Self {
        Self {
            engine: "postgresql".to_string(),
            name: "postgres".to_string(),
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            schema: "public".to_string(),
            connect_timeout_secs: 5,
        }
    }
}

impl TargetSettings {
    /// Returns the connect/ping timeout.
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Returns `true` if the target is a `SQLite` database.
    pub fn is_sqlite(&self) -> bool {
        matches!(self.engine.to_lowercase().as_str(), "sqlite" | "sqlite3")
    }
}

/// Preflight thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreflightSettings {
    /// Free disk space must be at least this multiple of the source size.
    pub disk_multiplier: f64,
    /// Minimum available memory in MiB.
    pub min_memory_mb: u64,
    /// Timeout for each external probe.
    pub probe_timeout_secs: u64,
    /// Whether missing backup tooling is a failure (otherwise a warning).
    pub require_backup_tool: bool,
}

impl Default for PreflightSettings {
    fn default() -> Self {
        Self {
            disk_multiplier: 2.0,
            min_memory_mb: 256,
            probe_timeout_secs: 5,
            require_backup_tool: true,
        }
    }
}

/// Profiler and circuit-breaker policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileSettings {
    /// Rows sampled per table (the whole table when smaller).
    pub sample_size: usize,
    /// Minimum confidence for a column to count as unambiguous.
    pub confidence_floor: f64,
    /// HALT when more than this fraction of columns is ambiguous.
    pub max_ambiguous_column_ratio: f64,
    /// HALT when more than this fraction of sampled rows carries a malformed
    /// timestamp in a date column.
    pub max_malformed_timestamp_ratio: f64,
    /// Seed for the row sampler.
    pub seed: u64,
    /// Run the target DDL/DML dry-run against the sample.
    pub dry_run: bool,
}

impl Default for ProfileSettings {
    fn default() -> Self {
        Self {
            sample_size: 5000,
            confidence_floor: 0.95,
            max_ambiguous_column_ratio: 0.10,
            max_malformed_timestamp_ratio: 0.20,
            seed: 0x5EED,
            dry_run: false,
        }
    }
}

/// Cleaner cadence and health thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanSettings {
    /// Rows between cancellation/health check points.
    pub batch_size: usize,
    /// Interval of the background health monitor.
    pub health_interval_ms: u64,
    /// Abort when free disk drops below this many MiB.
    pub min_free_disk_mb: u64,
    /// Abort when memory usage exceeds this percentage.
    pub max_memory_percent: f64,
}

impl Default for CleanSettings {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            health_interval_ms: 1000,
            min_free_disk_mb: 1024,
            max_memory_percent: 90.0,
        }
    }
}

/// Retry policy for target calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay_ms: u64,
    /// Upper bound on any single delay.
    pub max_delay_ms: u64,
    /// Jitter as a fraction of the delay, in `[0, 1]`.
    pub jitter: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            base_delay_ms: 200,
            max_delay_ms: 5000,
            jitter: 0.2,
        }
    }
}

/// Migration orchestrator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrateSettings {
    /// Minimum quality score (0-100) required to touch the target.
    pub quality_floor: f64,
    /// Fraction of each table loaded during the canary phase.
    pub canary_fraction: f64,
    /// Rows per insert transaction.
    pub batch_size: usize,
    /// Interval of the background health monitor during the full load.
    pub health_interval_ms: u64,
    /// Retry policy for transient target failures.
    pub retry: RetrySettings,
}

impl Default for MigrateSettings {
    fn default() -> Self {
        Self {
            quality_floor: 80.0,
            canary_fraction: 0.10,
            batch_size: 500,
            health_interval_ms: 2000,
            retry: RetrySettings::default(),
        }
    }
}

/// Backup retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSettings {
    /// Artifacts older than this many days are swept.
    pub retention_days: u32,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self { retention_days: 7 }
    }
}

/// The complete set of pipeline settings.
///
/// # Examples
///
/// ```
/// use etl_rs_core::settings::Settings;
///
/// let settings = Settings::default();
/// assert_eq!(settings.profile.sample_size, 5000);
/// assert!((settings.migrate.quality_floor - 80.0).abs() < f64::EPSILON);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Whether debug mode (pretty logs) is enabled.
    pub debug: bool,
    /// The log level filter (e.g. "info", "etl_rs_clean=debug").
    pub log_level: String,
    /// `pretty` or `json`.
    pub log_format: String,

    /// Filesystem locations.
    pub paths: PathSettings,
    /// Target connection.
    pub target: TargetSettings,
    /// Preflight thresholds.
    pub preflight: PreflightSettings,
    /// Profiler policy.
    pub profile: ProfileSettings,
    /// Cleaner settings.
    pub clean: CleanSettings,
    /// Orchestrator settings.
    pub migrate: MigrateSettings,
    /// Backup retention.
    pub backup: BackupSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debug: false,
            log_level: "info".to_string(),
            log_format: "json".to_string(),
            paths: PathSettings::default(),
            target: TargetSettings::default(),
            preflight: PreflightSettings::default(),
            profile: ProfileSettings::default(),
            clean: CleanSettings::default(),
            migrate: MigrateSettings::default(),
            backup: BackupSettings::default(),
        }
    }
}

impl Settings {
    /// Checks that every threshold is inside its valid range.
    pub fn validate(&self) -> Result<(), EtlError> {
        let unit = |name: &str, v: f64| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(EtlError::Configuration(format!(
                    "{name} must be within [0, 1], got {v}"
                )))
            }
        };
        unit("profile.confidence_floor", self.profile.confidence_floor)?;
        unit(
            "profile.max_ambiguous_column_ratio",
            self.profile.max_ambiguous_column_ratio,
        )?;
        unit(
            "profile.max_malformed_timestamp_ratio",
            self.profile.max_malformed_timestamp_ratio,
        )?;
        unit("migrate.retry.jitter", self.migrate.retry.jitter)?;

        if self.migrate.canary_fraction <= 0.0 || self.migrate.canary_fraction > 1.0 {
            return Err(EtlError::Configuration(format!(
                "migrate.canary_fraction must be within (0, 1], got {}",
                self.migrate.canary_fraction
            )));
        }
        if !(0.0..=100.0).contains(&self.migrate.quality_floor) {
            return Err(EtlError::Configuration(format!(
                "migrate.quality_floor must be within [0, 100], got {}",
                self.migrate.quality_floor
            )));
        }
        if self.profile.sample_size == 0 {
            return Err(EtlError::Configuration(
                "profile.sample_size must be positive".into(),
            ));
        }
        if self.clean.batch_size == 0 || self.migrate.batch_size == 0 {
            return Err(EtlError::Configuration(
                "batch sizes must be positive".into(),
            ));
        }
        if self.migrate.retry.max_attempts == 0 {
            return Err(EtlError::Configuration(
                "migrate.retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.preflight.disk_multiplier < 1.0 {
            return Err(EtlError::Configuration(format!(
                "preflight.disk_multiplier must be at least 1, got {}",
                self.preflight.disk_multiplier
            )));
        }
        Ok(())
    }
}
