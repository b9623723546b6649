//! Check results and the check trait.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use etl_rs_core::health::SystemProbe;
use etl_rs_core::settings::{PathSettings, PreflightSettings};
use etl_rs_db::{DatabaseBackend, DatabaseConfig};
use serde::{Deserialize, Serialize};

use crate::tools::ToolLocator;

/// Outcome of one check. Ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckStatus {
    /// The requirement is met.
    Pass,
    /// Non-blocking problem the operator should look at.
    Warning,
    /// Hard failure; the run must not start.
    Fail,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => write!(f, "PASS"),
            Self::Warning => write!(f, "WARNING"),
            Self::Fail => write!(f, "FAIL"),
        }
    }
}

/// The result of one preflight check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Check name (e.g. `disk_space`).
    pub name: String,
    /// Outcome.
    pub status: CheckStatus,
    /// What was observed.
    pub message: String,
    /// How to fix a warning or failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Wall time spent on the check.
    pub elapsed_ms: u64,
}

impl CheckResult {
    /// Creates a result with the given status.
    pub fn new(name: &str, status: CheckStatus, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            message: message.into(),
            hint: None,
            elapsed_ms: 0,
        }
    }

    /// A passing result.
    pub fn pass(name: &str, message: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Pass, message)
    }

    /// A warning.
    pub fn warning(name: &str, message: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Warning, message)
    }

    /// A hard failure.
    pub fn fail(name: &str, message: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Fail, message)
    }

    /// Attaches a remediation hint.
    #[must_use]
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.status, self.name, self.message)?;
        if let Some(ref hint) = self.hint {
            write!(f, "\n\tHINT: {hint}")?;
        }
        Ok(())
    }
}

/// Everything the checks need to look at.
///
/// Checks only read: they never create directories, open the source for
/// writing or change the target.
#[derive(Clone)]
pub struct PreflightInput {
    /// The source database file.
    pub source: PathBuf,
    /// Target connection parameters.
    pub target: DatabaseConfig,
    /// An already-open target, used instead of connecting from `target`.
    pub target_backend: Option<Arc<dyn DatabaseBackend>>,
    /// Thresholds.
    pub settings: PreflightSettings,
    /// Directories the run will write to.
    pub paths: PathSettings,
    /// Disk and memory probe.
    pub probe: Arc<dyn SystemProbe>,
    /// Finds external tools.
    pub tools: Arc<dyn ToolLocator>,
}

impl fmt::Debug for PreflightInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreflightInput")
            .field("source", &self.source)
            .field("target", &self.target.identity())
            .field("paths", &self.paths)
            .finish_non_exhaustive()
    }
}

impl PreflightInput {
    /// Directories the run writes to, in a stable order.
    pub fn output_dirs(&self) -> Vec<(&'static str, PathBuf)> {
        vec![
            ("state_dir", self.paths.state_dir.clone()),
            ("backup_dir", self.paths.backup_dir.clone()),
            ("work_dir", self.paths.work_dir.clone()),
            ("report_dir", self.paths.report_dir.clone()),
        ]
    }
}

/// A single preflight probe.
#[async_trait::async_trait]
pub trait PreflightCheck: Send + Sync {
    /// Stable check name used in reports.
    fn name(&self) -> &'static str;

    /// Runs the probe.
    async fn run(&self, input: &PreflightInput) -> CheckResult;
}
