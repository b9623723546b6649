//! # etl-rs-preflight
//!
//! Validates the environment before any stage runs. Each check is a
//! read-only probe that classifies its finding as Pass, Warning or Fail;
//! [`PreflightReport::exit_code`] folds them into 0 (all pass), 1 (abort)
//! or 2 (warnings only).
//!
//! Checks run under the configured probe timeout. A check that does not
//! finish in time fails.
//!
//! ## Examples
//!
//! ```no_run
//! # async fn run(input: etl_rs_preflight::PreflightInput) {
//! use etl_rs_preflight::PreflightChecker;
//!
//! let report = PreflightChecker::with_builtins().run(&input, None).await;
//! std::process::exit(report.exit_code());
//! # }
//! ```

pub mod check;
pub mod checks;
pub mod report;
pub mod tools;

use std::sync::Arc;
use std::time::{Duration, Instant};

use etl_rs_core::health::HostProbe;
use etl_rs_core::settings::Settings;
use etl_rs_core::EtlResult;
use etl_rs_db::DatabaseConfig;

pub use check::{CheckResult, CheckStatus, PreflightCheck, PreflightInput};
pub use report::PreflightReport;
pub use tools::{PathLocator, ToolLocator};

struct RegisteredCheck {
    check: Box<dyn PreflightCheck>,
    tags: Vec<String>,
}

/// Registry of preflight checks with tag-based filtering.
pub struct PreflightChecker {
    checks: Vec<RegisteredCheck>,
}

impl PreflightChecker {
    /// An empty checker.
    pub const fn new() -> Self {
        Self { checks: Vec::new() }
    }

    /// A checker with every built-in check registered.
    pub fn with_builtins() -> Self {
        let mut checker = Self::new();
        for (check, tags) in checks::builtins() {
            checker.register(check, tags);
        }
        checker
    }

    /// Registers a check under `tags`.
    pub fn register(&mut self, check: Box<dyn PreflightCheck>, tags: &[&str]) {
        self.checks.push(RegisteredCheck {
            check,
            tags: tags.iter().map(|t| (*t).to_string()).collect(),
        });
    }

    /// Number of registered checks.
    pub fn len(&self) -> usize {
        self.checks.len()
    }

    /// Returns `true` if no check is registered.
    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Runs every check, or only those carrying one of `tags`.
    pub async fn run(&self, input: &PreflightInput, tags: Option<&[&str]>) -> PreflightReport {
        let timeout = Duration::from_secs(input.settings.probe_timeout_secs);
        let mut results = Vec::with_capacity(self.checks.len());

        for registered in &self.checks {
            let selected = tags.map_or(true, |wanted| {
                wanted.iter().any(|t| registered.tags.iter().any(|own| own == t))
            });
            if !selected {
                continue;
            }

            let name = registered.check.name();
            let started = Instant::now();
            let mut result = match tokio::time::timeout(timeout, registered.check.run(input)).await {
                Ok(result) => result,
                Err(_) => CheckResult::fail(
                    name,
                    format!("timed out after {}s", timeout.as_secs()),
                ),
            };
            result.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            match result.status {
                CheckStatus::Pass => tracing::debug!(check = name, "{}", result.message),
                CheckStatus::Warning => tracing::warn!(check = name, "{}", result.message),
                CheckStatus::Fail => tracing::error!(check = name, "{}", result.message),
            }
            results.push(result);
        }

        let report = PreflightReport::new(results);
        tracing::info!(
            status = %report.status(),
            exit_code = report.exit_code(),
            "Preflight finished"
        );
        report
    }
}

impl Default for PreflightChecker {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds the input for a run against the host: real disk/memory probes and
/// the process `PATH`.
pub fn host_input(source: impl Into<std::path::PathBuf>, settings: &Settings) -> EtlResult<PreflightInput> {
    let timeout = Duration::from_secs(settings.preflight.probe_timeout_secs);
    Ok(PreflightInput {
        source: source.into(),
        target: DatabaseConfig::from_target(&settings.target)?,
        target_backend: None,
        settings: settings.preflight.clone(),
        paths: settings.paths.clone(),
        probe: Arc::new(HostProbe::new(timeout)),
        tools: Arc::new(PathLocator::from_env()),
    })
}
