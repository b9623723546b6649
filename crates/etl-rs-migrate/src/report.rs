//! Run and migration reports.
//!
//! Every run ends with one JSON document under its report directory:
//! `report.json` when it completed, `failure.json` otherwise. Both carry the
//! machine-readable code and the human-readable reason of the failure, if
//! any, so nothing is swallowed silently.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use etl_rs_backup::BackupArtifact;
use etl_rs_core::observability::MetricsSnapshot;
use etl_rs_core::utils::fs::write_json_atomic;
use etl_rs_core::{EtlError, EtlResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::quality::QualityScore;
use crate::state::{MigrationPhase, PhaseChange, RunStatus};

/// Why a run or migration did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    pub run_id: u64,
    /// Stage or phase that failed.
    pub stage: String,
    /// Machine-readable code, e.g. `TARGET_ERROR`.
    pub code: String,
    /// Human-readable reason.
    pub reason: String,
}

impl FailureReport {
    pub fn new(
        run_id: u64,
        stage: impl Into<String>,
        code: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            run_id,
            stage: stage.into(),
            code: code.into(),
            reason: reason.into(),
        }
    }

    /// Builds the report of `error` raised in `stage`.
    pub fn from_error(run_id: u64, stage: impl Into<String>, error: &EtlError) -> Self {
        Self::new(run_id, stage, error.code(), error.reason())
    }
}

/// What happened to one table during a migration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableLoad {
    pub table: String,
    /// Rows in the cleaned snapshot.
    pub source_rows: u64,
    /// Rows loaded during the canary.
    pub canary_rows: u64,
    /// Rows loaded in total (canary included).
    pub loaded_rows: u64,
    /// Rows counted in the target's staging table at verification.
    #[serde(default)]
    pub target_rows: Option<u64>,
    /// Whether the target's content digest matched the cleaned snapshot.
    #[serde(default)]
    pub digest_match: Option<bool>,
}

/// How a rollback went.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackReport {
    /// Staging objects of the run were dropped.
    pub staging_dropped: bool,
    /// The target was restored from its pre-migration backup.
    pub restored: bool,
    /// The target's fingerprint equals the pre-migration one.
    pub verified: bool,
    /// Differences still present after the rollback.
    #[serde(default)]
    pub differences: Vec<String>,
}

/// Outcome of [`Orchestrator::migrate`](crate::Orchestrator::migrate).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationResult {
    pub run_id: u64,
    /// Terminal phase: `Completed`, `RolledBack` or `Failed`.
    pub status: MigrationPhase,
    #[serde(default)]
    pub quality: Option<QualityScore>,
    pub tables: Vec<TableLoad>,
    /// Pre-migration backup of the target.
    #[serde(default)]
    pub target_backup: Option<BackupArtifact>,
    #[serde(default)]
    pub rollback: Option<RollbackReport>,
    #[serde(default)]
    pub failure: Option<FailureReport>,
    pub history: Vec<PhaseChange>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl MigrationResult {
    pub fn is_completed(&self) -> bool {
        self.status == MigrationPhase::Completed
    }

    /// Rows loaded across all tables.
    pub fn rows_loaded(&self) -> u64 {
        self.tables.iter().map(|t| t.loaded_rows).sum()
    }

    /// The run statuses this migration passed through, in order and without
    /// repeats.
    pub fn run_statuses(&self) -> Vec<RunStatus> {
        let mut out: Vec<RunStatus> = Vec::new();
        for change in &self.history {
            let status = change.phase.run_status();
            if status != RunStatus::Pending && out.last() != Some(&status) {
                out.push(status);
            }
        }
        out
    }
}

/// Report of one Migration Run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: u64,
    pub correlation_id: Uuid,
    pub status: RunStatus,
    pub source: PathBuf,
    pub source_checksum: String,
    pub target: String,
    /// Preflight report as emitted by the checker.
    #[serde(default)]
    pub preflight: Option<serde_json::Value>,
    #[serde(default)]
    pub profile_report: Option<PathBuf>,
    #[serde(default)]
    pub cleaned_snapshot: Option<PathBuf>,
    pub backups: Vec<BackupArtifact>,
    #[serde(default)]
    pub migration: Option<MigrationResult>,
    pub metrics: MetricsSnapshot,
    #[serde(default)]
    pub failure: Option<FailureReport>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    /// File name used for this report: `report.json` for a completed run,
    /// `failure.json` otherwise.
    pub fn file_name(&self) -> &'static str {
        if self.status == RunStatus::Completed {
            "report.json"
        } else {
            "failure.json"
        }
    }

    /// Writes the report into `dir` and returns its path.
    pub fn write(&self, dir: &Path) -> EtlResult<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(self.file_name());
        write_json_atomic(&path, self)?;
        Ok(path)
    }

    /// Reads a report written by [`write`](Self::write).
    pub fn load(path: &Path) -> EtlResult<Self> {
        Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
    }
}
