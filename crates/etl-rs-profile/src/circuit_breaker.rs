//! The circuit-breaker policy evaluated once every column is profiled.

use std::fmt;

use etl_rs_core::settings::ProfileSettings;
use serde::{Deserialize, Serialize};

/// Whether the run may continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    /// Continue, applying the remediation plan.
    Proceed,
    /// Stop cleanly before anything is written.
    Halt,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Proceed => f.write_str("PROCEED"),
            Self::Halt => f.write_str("HALT"),
        }
    }
}

/// Verdict with its human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerDecision {
    /// The verdict.
    pub verdict: Verdict,
    /// Why.
    pub reason: String,
}

impl CircuitBreakerDecision {
    /// A PROCEED decision.
    pub fn proceed(reason: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Proceed,
            reason: reason.into(),
        }
    }

    /// A HALT decision.
    pub fn halt(reason: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Halt,
            reason: reason.into(),
        }
    }

    /// Returns `true` for HALT.
    pub fn is_halt(&self) -> bool {
        self.verdict == Verdict::Halt
    }
}

/// Signals the policy looks at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QualitySignals {
    /// Columns profiled.
    pub columns: usize,
    /// Qualified names of columns below the confidence floor.
    pub ambiguous: Vec<String>,
    /// Per table: `(table, sampled rows, rows with a malformed timestamp)`.
    pub malformed_rows: Vec<(String, usize, usize)>,
    /// Columns carrying remediation targets.
    pub remediated_columns: usize,
}

/// Halting thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircuitBreakerPolicy {
    /// HALT when ambiguous columns / columns exceeds this.
    pub max_ambiguous_column_ratio: f64,
    /// HALT when rows with malformed timestamps / sampled rows exceeds this
    /// for any table.
    pub max_malformed_timestamp_ratio: f64,
}

impl Default for CircuitBreakerPolicy {
    fn default() -> Self {
        Self::from(&ProfileSettings::default())
    }
}

impl From<&ProfileSettings> for CircuitBreakerPolicy {
    fn from(s: &ProfileSettings) -> Self {
        Self {
            max_ambiguous_column_ratio: s.max_ambiguous_column_ratio,
            max_malformed_timestamp_ratio: s.max_malformed_timestamp_ratio,
        }
    }
}

impl CircuitBreakerPolicy {
    /// Evaluates the policy.
    #[allow(clippy::cast_precision_loss)]
    pub fn evaluate(&self, signals: &QualitySignals) -> CircuitBreakerDecision {
        if signals.columns > 0 {
            let ratio = signals.ambiguous.len() as f64 / signals.columns as f64;
            if ratio > self.max_ambiguous_column_ratio {
                return CircuitBreakerDecision::halt(format!(
                    "{} of {} columns below the confidence floor ({:.1}% > {:.1}%): {}",
                    signals.ambiguous.len(),
                    signals.columns,
                    ratio * 100.0,
                    self.max_ambiguous_column_ratio * 100.0,
                    signals.ambiguous.join(", ")
                ));
            }
        }

        for (table, sampled, malformed) in &signals.malformed_rows {
            if *sampled == 0 {
                continue;
            }
            let ratio = *malformed as f64 / *sampled as f64;
            if ratio > self.max_malformed_timestamp_ratio {
                return CircuitBreakerDecision::halt(format!(
                    "{malformed} of {sampled} sampled rows of '{table}' carry malformed timestamps \
                     ({:.1}% > {:.1}%)",
                    ratio * 100.0,
                    self.max_malformed_timestamp_ratio * 100.0
                ));
            }
        }

        CircuitBreakerDecision::proceed(format!(
            "{} of {} columns above the confidence floor; {} flagged for remediation",
            signals.columns - signals.ambiguous.len(),
            signals.columns,
            signals.remediated_columns
        ))
    }
}
