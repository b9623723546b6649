//! The cleaning stage.
//!
//! Rows are read from the read-only source, passed through the profile's
//! remediation rules and written to `{destination}.partial` inside one
//! exclusive transaction. Only a committed, checksummed file is renamed to
//! the destination, so nothing half-written is ever importable.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use etl_rs_core::context::check_token;
use etl_rs_core::health::{
    HealthCheck, HealthMonitor, HealthStatus, HealthThresholds, HostProbe, SystemHealthCheck, SystemProbe,
};
use etl_rs_core::observability::ProgressTracker;
use etl_rs_core::utils::fs::{remove_if_exists, with_suffix};
use etl_rs_core::utils::{sha256_file, RowDigest};
use etl_rs_core::{EtlError, EtlResult, RunContext};
use etl_rs_db::schema_editor::SqliteSchemaEditor;
use etl_rs_db::sqlite::{db_err, from_value_ref, to_sql_value};
use etl_rs_db::{quote_ident, SchemaEditor, SourceSnapshot, TableSpec};
use etl_rs_profile::{ColumnRemediation, Outcome, ProfileReport};
use rusqlite::TransactionBehavior;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::snapshot::{manifest_path, CleanStats, CleanedSnapshot, CleanedTable};

fn tx_err(e: &rusqlite::Error) -> EtlError {
    EtlError::Transaction(e.to_string())
}

fn join_err(e: &tokio::task::JoinError) -> EtlError {
    EtlError::Transaction(format!("Task join error: {e}"))
}

/// `CREATE TABLE` for the cleaned copy of `spec`. Declared types follow
/// the resolved logical types; constraints stay in the manifest.
pub fn create_table_sql(spec: &TableSpec) -> String {
    let cols: Vec<String> = spec
        .columns
        .iter()
        .map(|c| format!("{} {}", quote_ident(&c.name), SqliteSchemaEditor.column_type(c)))
        .collect();
    format!("CREATE TABLE {} ({})", quote_ident(&spec.name), cols.join(", "))
}

/// Whether two paths name the same file, whether or not they exist yet.
pub fn same_file(a: &Path, b: &Path) -> bool {
    fn canonical(p: &Path) -> Option<PathBuf> {
        std::fs::canonicalize(p).ok().or_else(|| {
            let name = p.file_name()?;
            let parent = p.parent().filter(|d| !d.as_os_str().is_empty()).unwrap_or(Path::new("."));
            std::fs::canonicalize(parent).ok().map(|d| d.join(name))
        })
    }
    match (canonical(a), canonical(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Writes cleaned snapshots.
#[derive(Debug, Clone)]
pub struct Cleaner {
    probe: Arc<dyn SystemProbe>,
}

impl Cleaner {
    /// A cleaner whose health checks use `probe`.
    pub fn new(probe: Arc<dyn SystemProbe>) -> Self {
        Self { probe }
    }

    /// A cleaner probing the local host.
    pub fn host(probe_timeout: Duration) -> Self {
        Self::new(Arc::new(HostProbe::new(probe_timeout)))
    }

    /// Cleans `source` into `destination` following `report`.
    ///
    /// A leftover destination from an earlier run is replaced. On any error
    /// the partial file is deleted and the previous destination, if any, is
    /// left as it was.
    pub async fn clean(
        &self,
        ctx: &RunContext,
        source: &SourceSnapshot,
        report: &ProfileReport,
        destination: &Path,
    ) -> EtlResult<CleanedSnapshot> {
        let span = ctx.stage_span("clean");
        self.clean_inner(ctx, source, report, destination)
            .instrument(span)
            .await
    }

    async fn clean_inner(
        &self,
        ctx: &RunContext,
        source: &SourceSnapshot,
        report: &ProfileReport,
        destination: &Path,
    ) -> EtlResult<CleanedSnapshot> {
        report.ensure_proceed()?;
        if report.source_checksum != source.sha256() {
            return Err(EtlError::Configuration(format!(
                "profile report was taken from a different source (sha256 {} != {})",
                report.source_checksum,
                source.sha256()
            )));
        }
        if same_file(source.path(), destination) {
            return Err(EtlError::Configuration(format!(
                "destination {} is the source",
                destination.display()
            )));
        }
        if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let started = Instant::now();
        let partial = with_suffix(destination, ".partial");
        discard_partial(&partial)?;

        let settings = &ctx.settings;
        let token = ctx.child_token();
        let watched = destination
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        let check: Arc<dyn HealthCheck> = Arc::new(SystemHealthCheck::new(
            Arc::clone(&self.probe),
            watched,
            HealthThresholds::from_clean(&settings.clean),
        ));
        if let HealthStatus::Unhealthy(reason) = check.check().await {
            return Err(EtlError::Environment(format!("health check failed before clean: {reason}")));
        }
        let monitor = HealthMonitor::spawn(
            vec![check],
            Duration::from_millis(settings.clean.health_interval_ms),
            Duration::from_secs(settings.preflight.probe_timeout_secs),
            token.clone(),
        );

        let total: u64 = report.tables.iter().map(|t| t.row_count).sum();
        tracing::info!(
            source = %source.path().display(),
            destination = %destination.display(),
            rows = total,
            "Cleaning source"
        );

        let job = CleanJob {
            source: source.clone(),
            partial: partial.clone(),
            tables: report
                .table_specs()
                .into_iter()
                .map(|spec| {
                    let rules = report.remediation_for(&spec.name);
                    let ambiguous = report
                        .columns_of(&spec.name)
                        .filter(|c| c.ambiguous)
                        .map(|c| c.name.clone())
                        .collect();
                    TablePlan {
                        spec,
                        rules,
                        ambiguous,
                    }
                })
                .collect(),
            batch_size: settings.clean.batch_size.max(1),
            token,
            progress: Arc::new(ProgressTracker::new("clean", total)),
        };
        let written = tokio::task::spawn_blocking(move || job.run())
            .await
            .map_err(|e| join_err(&e))
            .and_then(|r| r);
        let breach = monitor.stop().await;

        let tables = match (written, breach) {
            (Ok(tables), None) => tables,
            (Err(e), None) => {
                discard_partial(&partial)?;
                ctx.metrics.incr("clean.failures", 1);
                return Err(e);
            }
            (_, Some(reason)) => {
                discard_partial(&partial)?;
                ctx.metrics.incr("clean.failures", 1);
                return Err(EtlError::Environment(format!(
                    "health check failed during clean: {reason}"
                )));
            }
        };

        let finalize = {
            let partial = partial.clone();
            let destination = destination.to_path_buf();
            let source_checksum = source.sha256().to_string();
            tokio::task::spawn_blocking(move || finalize(&partial, &destination, source_checksum, tables))
        };
        let snapshot = match finalize.await.map_err(|e| join_err(&e)).and_then(|r| r) {
            Ok(s) => s,
            Err(e) => {
                discard_partial(&partial)?;
                return Err(e);
            }
        };

        let totals = snapshot.totals();
        ctx.metrics.incr("clean.rows", totals.rows);
        ctx.metrics.incr("clean.reencoded", totals.reencoded);
        ctx.metrics.incr("clean.empty_to_null", totals.empty_to_null);
        ctx.metrics
            .incr("clean.unparseable_to_null", totals.unparseable_to_null);
        ctx.metrics.observe_duration("clean.duration", started.elapsed());
        tracing::info!(
            destination = %snapshot.path.display(),
            rows = totals.rows,
            reencoded = totals.reencoded,
            empty_to_null = totals.empty_to_null,
            unparseable_to_null = totals.unparseable_to_null,
            sha256 = %snapshot.sha256,
            "Cleaned snapshot written"
        );
        Ok(snapshot)
    }
}

fn discard_partial(partial: &Path) -> EtlResult<()> {
    remove_if_exists(partial)?;
    remove_if_exists(&with_suffix(partial, "-journal"))?;
    Ok(())
}

/// Checksums the committed partial file, renames it into place and writes
/// the manifest.
fn finalize(
    partial: &Path,
    destination: &Path,
    source_checksum: String,
    tables: Vec<CleanedTable>,
) -> EtlResult<CleanedSnapshot> {
    let sha256 = sha256_file(partial)?;
    let size = std::fs::metadata(partial)?.len();
    remove_if_exists(&manifest_path(destination))?;
    std::fs::rename(partial, destination)?;
    let snapshot = CleanedSnapshot {
        path: destination.to_path_buf(),
        source_checksum,
        sha256,
        size,
        created_at: Utc::now(),
        tables,
    };
    snapshot.write_manifest()?;
    Ok(snapshot)
}

/// How one table is cleaned.
struct TablePlan {
    spec: TableSpec,
    rules: Vec<ColumnRemediation>,
    ambiguous: Vec<String>,
}

/// Everything the blocking writer needs.
struct CleanJob {
    source: SourceSnapshot,
    partial: PathBuf,
    tables: Vec<TablePlan>,
    batch_size: usize,
    token: CancellationToken,
    progress: Arc<ProgressTracker>,
}

impl CleanJob {
    fn run(&self) -> EtlResult<Vec<CleanedTable>> {
        let src = self.source.connect()?;
        let mut dst = rusqlite::Connection::open(&self.partial).map_err(|e| tx_err(&e))?;
        let tx = dst
            .transaction_with_behavior(TransactionBehavior::Exclusive)
            .map_err(|e| tx_err(&e))?;

        let mut out = Vec::with_capacity(self.tables.len());
        for plan in &self.tables {
            check_token(&self.token)?;
            let mut table = self.copy_table(&src, &tx, &plan.spec, &plan.rules)?;
            table.ambiguous.clone_from(&plan.ambiguous);
            tracing::debug!(table = %plan.spec.name, rows = table.stats.rows, "Cleaned table");
            out.push(table);
        }

        tx.commit().map_err(|e| tx_err(&e))?;
        self.progress.report();
        Ok(out)
    }

    fn copy_table(
        &self,
        src: &rusqlite::Connection,
        tx: &rusqlite::Transaction<'_>,
        spec: &TableSpec,
        rules: &[ColumnRemediation],
    ) -> EtlResult<CleanedTable> {
        tx.execute_batch(&create_table_sql(spec))
            .map_err(|e| tx_err(&e))?;

        let cols: Vec<String> = spec.columns.iter().map(|c| quote_ident(&c.name)).collect();
        let placeholders: Vec<String> = (1..=cols.len()).map(|i| format!("?{i}")).collect();
        let mut insert = tx
            .prepare(&format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote_ident(&spec.name),
                cols.join(", "),
                placeholders.join(", ")
            ))
            .map_err(|e| tx_err(&e))?;
        let mut select = src
            .prepare(&format!(
                "SELECT {} FROM {}",
                cols.join(", "),
                quote_ident(&spec.name)
            ))
            .map_err(|e| db_err(&e))?;
        let mut rows = select.query([]).map_err(|e| db_err(&e))?;

        let mut stats = CleanStats::default();
        let mut nulled = vec![0u64; rules.len()];
        let mut digest = RowDigest::new();
        let mut since_check = 0usize;
        while let Some(row) = rows.next().map_err(|e| db_err(&e))? {
            if since_check == self.batch_size {
                check_token(&self.token)?;
                self.progress.advance(since_check as u64);
                self.progress.maybe_report();
                since_check = 0;
            }

            let mut cleaned = Vec::with_capacity(rules.len());
            for (i, rule) in rules.iter().enumerate() {
                let raw = from_value_ref(row.get_ref(i).map_err(|e| db_err(&e))?);
                let r = rule.apply(&raw);
                match r.outcome {
                    Outcome::Unchanged => {}
                    Outcome::Reencoded => stats.reencoded += 1,
                    Outcome::EmptyToNull => stats.empty_to_null += 1,
                    Outcome::UnparseableToNull => {
                        stats.unparseable_to_null += 1;
                        nulled[i] += 1;
                    }
                }
                cleaned.push(r.value);
            }

            let rendered = spec.canonical_row(&cleaned);
            digest.add_row(rendered.iter().map(Option::as_deref));
            insert
                .execute(rusqlite::params_from_iter(cleaned.iter().map(to_sql_value)))
                .map_err(|e| tx_err(&e))?;
            stats.rows += 1;
            since_check += 1;
        }
        self.progress.advance(since_check as u64);

        let mut table = CleanedTable::new(spec.clone(), stats, digest.hex());
        table.nulled = spec
            .columns
            .iter()
            .zip(nulled)
            .filter(|(_, n)| *n > 0)
            .map(|(c, n)| (c.name.clone(), n))
            .collect();
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etl_rs_db::{ColumnSpec, LogicalType};

    #[test]
    fn test_create_table_sql() {
        let spec = TableSpec {
            name: "events".into(),
            columns: vec![
                ColumnSpec::new("id", LogicalType::Integer).primary(),
                ColumnSpec::new("day", LogicalType::Timestamp),
                ColumnSpec::new("at", LogicalType::Timestamp).with_time(),
            ],
        };
        assert_eq!(
            create_table_sql(&spec),
            "CREATE TABLE \"events\" (\"id\" INTEGER, \"day\" DATE, \"at\" TIMESTAMP)"
        );
    }

    #[test]
    fn test_same_file() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.db");
        std::fs::write(&a, b"x").unwrap();
        assert!(same_file(&a, &dir.path().join(".").join("a.db")));
        assert!(!same_file(&a, &dir.path().join("b.db")));
        assert!(same_file(&dir.path().join("new.db"), &dir.path().join("new.db")));
    }
}
