//! The aggregated preflight result.

use std::fmt;

use etl_rs_core::{EtlError, EtlResult};
use serde::{Deserialize, Serialize};

use crate::check::{CheckResult, CheckStatus};

/// Every check result of one preflight run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreflightReport {
    /// Results in execution order.
    pub checks: Vec<CheckResult>,
}

impl PreflightReport {
    /// Builds a report from results.
    pub const fn new(checks: Vec<CheckResult>) -> Self {
        Self { checks }
    }

    /// The worst status, or `Pass` for an empty report.
    pub fn status(&self) -> CheckStatus {
        self.checks
            .iter()
            .map(|c| c.status)
            .max()
            .unwrap_or(CheckStatus::Pass)
    }

    /// 0 when everything passed, 1 on any failure, 2 on warnings only.
    pub fn exit_code(&self) -> i32 {
        match self.status() {
            CheckStatus::Pass => 0,
            CheckStatus::Fail => 1,
            CheckStatus::Warning => 2,
        }
    }

    /// Failed checks.
    pub fn failures(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks.iter().filter(|c| c.status == CheckStatus::Fail)
    }

    /// Checks that produced a warning.
    pub fn warnings(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks.iter().filter(|c| c.status == CheckStatus::Warning)
    }

    /// Looks up a check by name.
    pub fn get(&self, name: &str) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.name == name)
    }

    /// Converts failures into an [`EtlError::Environment`] naming each one.
    pub fn into_result(self) -> EtlResult<Self> {
        if self.status() < CheckStatus::Fail {
            return Ok(self);
        }
        let reasons: Vec<String> = self
            .failures()
            .map(|c| format!("{}: {}", c.name, c.message))
            .collect();
        Err(EtlError::Environment(format!(
            "preflight failed ({})",
            reasons.join("; ")
        )))
    }

    /// Machine-readable JSON, including the exit code.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "status": self.status(),
            "exit_code": self.exit_code(),
            "checks": self.checks,
        })
    }
}

impl fmt::Display for PreflightReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for check in &self.checks {
            writeln!(f, "{check}")?;
        }
        write!(f, "Preflight: {} (exit {})", self.status(), self.exit_code())
    }
}
