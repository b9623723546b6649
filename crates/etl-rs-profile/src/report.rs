//! The Profile Report: per-column findings, the circuit-breaker verdict and
//! the remediation plan handed to the cleaner.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use etl_rs_core::utils::fs::write_json_atomic;
use etl_rs_core::{EtlError, EtlResult};
use etl_rs_db::{ColumnSpec, LogicalType, TableSpec};
use serde::{Deserialize, Serialize};

use crate::circuit_breaker::CircuitBreakerDecision;
use crate::formats::TimestampFormat;
use crate::inference::FormatCount;
use crate::remediation::ColumnRemediation;

/// Row counts of one profiled table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableProfile {
    /// Table name.
    pub name: String,
    /// Rows in the table.
    pub row_count: u64,
    /// Rows that were sampled.
    pub sampled_rows: usize,
}

/// Findings for one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnProfile {
    pub table: String,
    pub name: String,
    pub declared_type: String,
    pub inferred_type: LogicalType,
    /// Dominant layout for timestamp columns.
    pub format: Option<TimestampFormat>,
    #[serde(default)]
    pub has_time: bool,
    #[serde(default)]
    pub primary_key: bool,
    pub confidence: f64,
    pub empty_count: usize,
    pub null_count: usize,
    /// Non-null, non-empty values that took part in inference.
    pub sampled: usize,
    pub ambiguous: bool,
    #[serde(default)]
    pub alternate_formats: Vec<FormatCount>,
    #[serde(default)]
    pub malformed_count: usize,
}

impl ColumnProfile {
    /// `table.column`.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.table, self.name)
    }

    /// The column with its resolved type.
    pub fn spec(&self) -> ColumnSpec {
        ColumnSpec {
            name: self.name.clone(),
            logical_type: self.inferred_type,
            has_time: self.has_time,
            primary_key: self.primary_key,
        }
    }

    /// The canonical layout values of this column are written in.
    pub const fn canonical_format(&self) -> TimestampFormat {
        if self.has_time {
            TimestampFormat::IsoDateTime
        } else {
            TimestampFormat::IsoDate
        }
    }

    /// Whether timestamps need rewriting to the canonical layout.
    pub fn needs_reencoding(&self) -> bool {
        self.inferred_type == LogicalType::Timestamp
            && (self.format != Some(self.canonical_format()) || !self.alternate_formats.is_empty())
    }

    /// Cleaning rules for this column.
    pub fn remediation(&self) -> ColumnRemediation {
        let mut formats: Vec<TimestampFormat> = self.format.into_iter().collect();
        formats.extend(self.alternate_formats.iter().map(|a| a.format));
        ColumnRemediation::new(self.spec(), formats)
    }
}

/// Columns the cleaner has to act on, as `table.column`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemediationPlan {
    /// Timestamp columns with non-canonical or mixed layouts.
    pub reencode_timestamps: Vec<String>,
    /// Typed columns holding empty strings.
    pub empty_to_null: Vec<String>,
    /// Timestamp columns with values no layout parses.
    pub unparseable_to_null: Vec<String>,
}

impl RemediationPlan {
    /// Builds the plan from column findings.
    pub fn from_columns(columns: &[ColumnProfile]) -> Self {
        let mut plan = Self::default();
        for c in columns {
            if c.needs_reencoding() {
                plan.reencode_timestamps.push(c.qualified_name());
            }
            if c.inferred_type != LogicalType::String && c.empty_count > 0 {
                plan.empty_to_null.push(c.qualified_name());
            }
            if c.inferred_type == LogicalType::Timestamp && c.malformed_count > 0 {
                plan.unparseable_to_null.push(c.qualified_name());
            }
        }
        plan
    }

    /// Number of distinct columns carrying at least one target.
    pub fn column_count(&self) -> usize {
        let mut all: Vec<&String> = self
            .reencode_timestamps
            .iter()
            .chain(&self.empty_to_null)
            .chain(&self.unparseable_to_null)
            .collect();
        all.sort();
        all.dedup();
        all.len()
    }

    /// Returns `true` if nothing needs remediation.
    pub fn is_empty(&self) -> bool {
        self.reencode_timestamps.is_empty()
            && self.empty_to_null.is_empty()
            && self.unparseable_to_null.is_empty()
    }
}

/// Outcome of loading the remediated sample into the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DryRunOutcome {
    /// Target vendor.
    pub backend: String,
    /// Tables created.
    pub tables: usize,
    /// Sample rows inserted.
    pub rows: usize,
    /// Whether every statement succeeded.
    pub ok: bool,
    /// The target's error text on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-run profiling findings. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileReport {
    pub created_at: DateTime<Utc>,
    pub source_path: PathBuf,
    pub source_checksum: String,
    pub sample_size: usize,
    pub confidence_floor: f64,
    pub tables: Vec<TableProfile>,
    pub columns: Vec<ColumnProfile>,
    pub circuit_breaker: CircuitBreakerDecision,
    pub remediation: RemediationPlan,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<DryRunOutcome>,
}

impl ProfileReport {
    /// Findings for one column.
    pub fn column(&self, table: &str, name: &str) -> Option<&ColumnProfile> {
        self.columns
            .iter()
            .find(|c| c.table == table && c.name == name)
    }

    /// Findings for every column of `table`, in declaration order.
    pub fn columns_of<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a ColumnProfile> + 'a {
        self.columns.iter().filter(move |c| c.table == table)
    }

    /// The resolved spec of one table.
    pub fn table_spec(&self, table: &str) -> Option<TableSpec> {
        let columns: Vec<ColumnSpec> = self.columns_of(table).map(ColumnProfile::spec).collect();
        (!columns.is_empty()).then(|| TableSpec {
            name: table.to_string(),
            columns,
        })
    }

    /// Resolved specs of every table, in report order.
    pub fn table_specs(&self) -> Vec<TableSpec> {
        self.tables
            .iter()
            .filter_map(|t| self.table_spec(&t.name))
            .collect()
    }

    /// Cleaning rules for every column of `table`, in declaration order.
    pub fn remediation_for(&self, table: &str) -> Vec<ColumnRemediation> {
        self.columns_of(table).map(ColumnProfile::remediation).collect()
    }

    /// Returns `true` if the circuit breaker halted.
    pub fn is_halt(&self) -> bool {
        self.circuit_breaker.is_halt()
    }

    /// Fails with [`EtlError::CircuitBreakerHalt`] on a HALT verdict.
    pub fn ensure_proceed(&self) -> EtlResult<()> {
        if self.is_halt() {
            Err(EtlError::CircuitBreakerHalt(self.circuit_breaker.reason.clone()))
        } else {
            Ok(())
        }
    }

    /// Columns below the confidence floor.
    pub fn ambiguous_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.ambiguous)
            .map(ColumnProfile::qualified_name)
            .collect()
    }

    /// Serializes to pretty JSON.
    pub fn to_json(&self) -> EtlResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Writes the report atomically.
    pub fn write(&self, path: &Path) -> EtlResult<()> {
        write_json_atomic(path, self)
    }

    /// Reads a report written by [`ProfileReport::write`].
    pub fn load(path: &Path) -> EtlResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            EtlError::Configuration(format!("cannot read profile report {}: {e}", path.display()))
        })?;
        Ok(serde_json::from_str(&text)?)
    }
}
