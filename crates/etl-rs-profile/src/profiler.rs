//! The profiling stage: sample, infer, evaluate the circuit breaker and
//! optionally dry-run the target.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use etl_rs_core::settings::ProfileSettings;
use etl_rs_core::{EtlError, EtlResult, RunContext};
use etl_rs_db::sqlite::schemas;
use etl_rs_db::{editor_for, DatabaseBackend, LogicalType, SchemaEditor, SourceSnapshot, TableSchema};
use rayon::prelude::*;
use tracing::Instrument;

use crate::circuit_breaker::{CircuitBreakerDecision, CircuitBreakerPolicy, QualitySignals};
use crate::dry_run::{self, DryRunTable};
use crate::inference::{infer, is_malformed_timestamp, InferenceResult};
use crate::report::{ColumnProfile, ProfileReport, RemediationPlan, TableProfile};
use crate::sampler::{sample_table, TableSample};

/// Target the remediated sample is dry-run against.
pub struct DryRunTarget {
    backend: Arc<dyn DatabaseBackend>,
    editor: Box<dyn SchemaEditor>,
}

impl DryRunTarget {
    /// Dry-runs against `backend`; `schema` is the live `PostgreSQL` schema.
    pub fn new(backend: Arc<dyn DatabaseBackend>, schema: &str) -> Self {
        let editor = editor_for(backend.backend_type(), schema);
        Self { backend, editor }
    }
}

impl std::fmt::Debug for DryRunTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DryRunTarget")
            .field("vendor", &self.backend.vendor())
            .finish()
    }
}

/// Profiles a source snapshot.
#[derive(Debug)]
pub struct Profiler {
    settings: ProfileSettings,
    policy: CircuitBreakerPolicy,
    dry_run: Option<DryRunTarget>,
}

struct Sampled {
    schema: TableSchema,
    sample: TableSample,
}

impl Profiler {
    /// A profiler with the policy taken from `settings`.
    pub fn new(settings: ProfileSettings) -> Self {
        let policy = CircuitBreakerPolicy::from(&settings);
        Self {
            settings,
            policy,
            dry_run: None,
        }
    }

    /// Dry-runs the remediated sample against `target` after a PROCEED.
    #[must_use]
    pub fn with_dry_run(mut self, target: DryRunTarget) -> Self {
        self.dry_run = Some(target);
        self
    }

    /// Profiles every table of `snapshot`.
    ///
    /// A HALT is a successful outcome of this stage: the verdict is in the
    /// report and [`ProfileReport::ensure_proceed`] turns it into an error.
    pub async fn profile(&self, ctx: &RunContext, snapshot: &SourceSnapshot) -> EtlResult<ProfileReport> {
        let span = ctx.stage_span("profile");
        self.profile_inner(ctx, snapshot).instrument(span).await
    }

    async fn profile_inner(&self, ctx: &RunContext, snapshot: &SourceSnapshot) -> EtlResult<ProfileReport> {
        let started = Instant::now();
        tracing::info!(
            source = %snapshot.path().display(),
            sample_size = self.settings.sample_size,
            "Profiling source"
        );

        let owned_ctx = ctx.clone();
        let owned_snapshot = snapshot.clone();
        let settings = self.settings.clone();
        let (sampled, inferred) = tokio::task::spawn_blocking(move || {
            let sampled = sample_all(&owned_ctx, &owned_snapshot, &settings)?;
            owned_ctx.check_cancelled()?;
            let inferred = infer_all(&sampled, settings.confidence_floor);
            Ok::<_, EtlError>((sampled, inferred))
        })
        .await
        .map_err(|e| EtlError::Database(format!("Task join error: {e}")))??;

        let columns = column_profiles(&sampled, inferred);
        let tables: Vec<TableProfile> = sampled
            .iter()
            .map(|s| TableProfile {
                name: s.schema.name.clone(),
                row_count: s.sample.row_count,
                sampled_rows: s.sample.rows.len(),
            })
            .collect();
        let remediation = RemediationPlan::from_columns(&columns);

        let signals = QualitySignals {
            columns: columns.len(),
            ambiguous: columns
                .iter()
                .filter(|c| c.ambiguous)
                .map(ColumnProfile::qualified_name)
                .collect(),
            malformed_rows: malformed_rows(&sampled, &columns),
            remediated_columns: remediation.column_count(),
        };
        for name in &signals.ambiguous {
            tracing::warn!(column = %name, "Column below the confidence floor");
        }
        let mut decision = self.policy.evaluate(&signals);

        let mut report = ProfileReport {
            created_at: Utc::now(),
            source_path: snapshot.path().to_path_buf(),
            source_checksum: snapshot.sha256().to_string(),
            sample_size: self.settings.sample_size,
            confidence_floor: self.settings.confidence_floor,
            tables,
            columns,
            circuit_breaker: decision.clone(),
            remediation,
            dry_run: None,
        };

        if let (Some(target), false) = (&self.dry_run, decision.is_halt()) {
            ctx.check_cancelled()?;
            let tables = dry_run_tables(&report, sampled);
            let outcome =
                dry_run::run(target.backend.as_ref(), target.editor.as_ref(), ctx.run_id, &tables).await;
            if let Some(error) = &outcome.error {
                decision = CircuitBreakerDecision::halt(format!("target dry-run failed: {error}"));
            }
            report.dry_run = Some(outcome);
            report.circuit_breaker = decision.clone();
        }

        ctx.metrics.incr("profile.tables", report.tables.len() as u64);
        ctx.metrics.incr("profile.columns", report.columns.len() as u64);
        ctx.metrics
            .incr("profile.ambiguous_columns", signals.ambiguous.len() as u64);
        ctx.metrics.observe_duration("profile.duration", started.elapsed());

        if decision.is_halt() {
            tracing::error!(verdict = %decision.verdict, reason = %decision.reason, "Circuit breaker tripped");
        } else {
            tracing::info!(
                verdict = %decision.verdict,
                tables = report.tables.len(),
                columns = report.columns.len(),
                remediated = signals.remediated_columns,
                "Profiling finished"
            );
        }
        Ok(report)
    }
}

fn sample_all(ctx: &RunContext, snapshot: &SourceSnapshot, settings: &ProfileSettings) -> EtlResult<Vec<Sampled>> {
    let conn = snapshot.connect()?;
    schemas(&conn)?
        .into_iter()
        .map(|schema| {
            let sample = sample_table(ctx, &conn, &schema, settings.sample_size, settings.seed)?;
            tracing::debug!(
                table = %schema.name,
                rows = sample.row_count,
                sampled = sample.rows.len(),
                "Sampled table"
            );
            Ok(Sampled { schema, sample })
        })
        .collect()
}

/// Infers every column in parallel. Results come back in (table, column)
/// order regardless of scheduling.
fn infer_all(sampled: &[Sampled], confidence_floor: f64) -> Vec<InferenceResult> {
    let jobs: Vec<(usize, usize)> = sampled
        .iter()
        .enumerate()
        .flat_map(|(t, s)| (0..s.schema.columns.len()).map(move |c| (t, c)))
        .collect();
    jobs.par_iter()
        .map(|&(t, c)| {
            let table = &sampled[t];
            infer(
                &table.schema.columns[c].declared_type,
                &table.sample.column(c),
                confidence_floor,
            )
        })
        .collect()
}

fn column_profiles(sampled: &[Sampled], inferred: Vec<InferenceResult>) -> Vec<ColumnProfile> {
    let infos = sampled
        .iter()
        .flat_map(|s| s.schema.columns.iter().map(move |c| (&s.schema.name, c)));
    infos
        .zip(inferred)
        .map(|((table, info), r)| ColumnProfile {
            table: table.clone(),
            name: info.name.clone(),
            declared_type: info.declared_type.clone(),
            inferred_type: r.logical_type,
            format: r.format,
            has_time: r.has_time,
            primary_key: info.primary_key,
            confidence: r.confidence,
            empty_count: r.empty_count,
            null_count: r.null_count,
            sampled: r.sampled,
            ambiguous: r.ambiguous,
            alternate_formats: r.alternate_formats,
            malformed_count: r.malformed_count,
        })
        .collect()
}

/// Per table, sampled rows with at least one malformed value in a
/// timestamp column.
fn malformed_rows(sampled: &[Sampled], columns: &[ColumnProfile]) -> Vec<(String, usize, usize)> {
    sampled
        .iter()
        .filter_map(|s| {
            let ts_cols: Vec<usize> = s
                .schema
                .columns
                .iter()
                .enumerate()
                .filter(|(_, info)| {
                    columns.iter().any(|c| {
                        c.table == s.schema.name
                            && c.name == info.name
                            && c.inferred_type == LogicalType::Timestamp
                    })
                })
                .map(|(i, _)| i)
                .collect();
            if ts_cols.is_empty() {
                return None;
            }
            let bad = s
                .sample
                .rows
                .iter()
                .filter(|row| {
                    ts_cols
                        .iter()
                        .any(|&i| row.get(i).is_some_and(is_malformed_timestamp))
                })
                .count();
            Some((s.schema.name.clone(), s.sample.rows.len(), bad))
        })
        .collect()
}

fn dry_run_tables(report: &ProfileReport, sampled: Vec<Sampled>) -> Vec<DryRunTable> {
    sampled
        .into_iter()
        .filter_map(|s| {
            let spec = report.table_spec(&s.schema.name)?;
            Some(DryRunTable {
                rules: report.remediation_for(&s.schema.name),
                spec,
                rows: s.sample.rows,
            })
        })
        .collect()
}
