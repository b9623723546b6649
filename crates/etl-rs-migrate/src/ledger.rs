//! The run ledger.
//!
//! One JSON file in the state directory records every Migration Run: its
//! monotonic id, status, the artifacts it produced and how it ended. Every
//! update is a read-modify-write under a short-lived lock file, written
//! atomically, so concurrent processes never lose an id or a status change.
//! Status changes go through [`RunStatus::transition`].
//!
//! Waiting for that lock blocks the calling thread. Async callers go through
//! [`RunLedger::blocking`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use etl_rs_core::utils::fs::write_json_atomic;
use etl_rs_core::{EtlError, EtlResult};
use serde::{Deserialize, Serialize};

use crate::lock::LockFile;
use crate::report::FailureReport;
use crate::state::RunStatus;

const LEDGER_FILE: &str = "runs.json";
const LEDGER_LOCK: &str = "runs.json.lock";
const LOCK_WAIT: Duration = Duration::from_secs(10);

/// One Migration Run as recorded in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Monotonic run id, starting at 1.
    pub id: u64,
    pub status: RunStatus,
    /// Source database, or the cleaned snapshot for a migrate-only run.
    pub source: PathBuf,
    /// Identity of the target.
    pub target: String,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set when the run reaches a terminal status.
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub profile_report: Option<PathBuf>,
    #[serde(default)]
    pub cleaned_snapshot: Option<PathBuf>,
    /// Backup artifacts the run created.
    #[serde(default)]
    pub backups: Vec<PathBuf>,
    /// The run report, once written.
    #[serde(default)]
    pub report: Option<PathBuf>,
    /// Why the run did not complete.
    #[serde(default)]
    pub failure: Option<FailureReport>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    last_id: u64,
    runs: Vec<RunRecord>,
}

/// Reads and updates the run ledger in a state directory.
#[derive(Debug, Clone)]
pub struct RunLedger {
    dir: PathBuf,
}

impl RunLedger {
    /// The ledger kept in `state_dir`.
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: state_dir.into(),
        }
    }

    /// Path of the ledger file.
    pub fn path(&self) -> PathBuf {
        self.dir.join(LEDGER_FILE)
    }

    /// Runs `f` against this ledger on the blocking thread pool.
    pub async fn blocking<T, F>(&self, f: F) -> EtlResult<T>
    where
        F: FnOnce(&Self) -> EtlResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let ledger = self.clone();
        tokio::task::spawn_blocking(move || f(&ledger))
            .await
            .map_err(|e| EtlError::Environment(format!("run ledger task failed: {e}")))?
    }

    fn read(path: &Path) -> EtlResult<LedgerFile> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(LedgerFile::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn modify<T>(&self, f: impl FnOnce(&mut LedgerFile) -> EtlResult<T>) -> EtlResult<T> {
        std::fs::create_dir_all(&self.dir)?;
        let lock = LockFile::acquire_within(&self.dir.join(LEDGER_LOCK), 0, "run ledger", LOCK_WAIT)?;
        let path = self.path();
        let mut file = Self::read(&path)?;
        let out = f(&mut file)?;
        write_json_atomic(&path, &file)?;
        lock.release()?;
        Ok(out)
    }

    /// Records a new run in [`RunStatus::Pending`] and returns it. Ids
    /// start at 1 and never repeat.
    pub fn begin(&self, source: &Path, target: &str) -> EtlResult<RunRecord> {
        self.modify(|file| {
            file.last_id += 1;
            let now = Utc::now();
            let record = RunRecord {
                id: file.last_id,
                status: RunStatus::Pending,
                source: source.to_path_buf(),
                target: target.to_string(),
                started_at: now,
                updated_at: now,
                finished_at: None,
                profile_report: None,
                cleaned_snapshot: None,
                backups: Vec::new(),
                report: None,
                failure: None,
            };
            file.runs.push(record.clone());
            Ok(record)
        })
    }

    /// Applies `f` to run `id`.
    pub fn update(&self, id: u64, f: impl FnOnce(&mut RunRecord)) -> EtlResult<RunRecord> {
        self.modify(|file| {
            let record = find(file, id)?;
            f(record);
            record.updated_at = Utc::now();
            Ok(record.clone())
        })
    }

    /// Moves run `id` to `status`.
    pub fn transition(&self, id: u64, status: RunStatus) -> EtlResult<RunRecord> {
        self.modify(|file| {
            let record = find(file, id)?;
            record.status.transition(status)?;
            let now = Utc::now();
            record.updated_at = now;
            if status.is_terminal() {
                record.finished_at = Some(now);
            }
            tracing::debug!(run_id = id, status = %status, "Run status");
            Ok(record.clone())
        })
    }

    /// Ends run `id` in `status` with `failure`.
    pub fn finish_failed(
        &self,
        id: u64,
        status: RunStatus,
        failure: FailureReport,
    ) -> EtlResult<RunRecord> {
        self.modify(|file| {
            let record = find(file, id)?;
            record.status.transition(status)?;
            let now = Utc::now();
            record.updated_at = now;
            record.finished_at = Some(now);
            record.failure = Some(failure);
            Ok(record.clone())
        })
    }

    /// Looks up run `id`.
    pub fn get(&self, id: u64) -> EtlResult<Option<RunRecord>> {
        Ok(Self::read(&self.path())?
            .runs
            .into_iter()
            .find(|r| r.id == id))
    }

    /// Every recorded run, oldest first.
    pub fn runs(&self) -> EtlResult<Vec<RunRecord>> {
        Ok(Self::read(&self.path())?.runs)
    }

    /// Backup artifacts referenced by runs that have not finished. The
    /// retention sweep must not delete these.
    pub fn protected_artifacts(&self) -> EtlResult<HashSet<PathBuf>> {
        Ok(self
            .runs()?
            .into_iter()
            .filter(|r| !r.status.is_terminal())
            .flat_map(|r| r.backups)
            .collect())
    }
}

fn find(file: &mut LedgerFile, id: u64) -> EtlResult<&mut RunRecord> {
    file.runs
        .iter_mut()
        .find(|r| r.id == id)
        .ok_or_else(|| EtlError::Configuration(format!("run {id} is not in the ledger")))
}
