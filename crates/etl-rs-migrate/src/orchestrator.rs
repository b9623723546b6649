//! The Migration Orchestrator.
//!
//! Drives a cleaned snapshot into the target through the phases of
//! [`MigrationPhase`]:
//!
//! 1. **QualityGate** - re-score the cleaned snapshot; below the floor the run
//!    ends `RolledBack` without touching the target.
//! 2. **Canary** - fingerprint and back up the target, create one staging
//!    table per cleaned table, load the first slice of each and check it
//!    reads back exactly.
//! 3. **FullLoad** - append the remainder under a background health monitor.
//! 4. **Verify** - compare row counts and content digests of every staging
//!    table with the snapshot's manifest, then cut over in one transaction.
//!
//! Any failure after the gate drops the run's staging objects and, if the
//! target no longer matches its pre-migration fingerprint, restores it from
//! the backup taken before the canary.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use etl_rs_backup::{BackupArtifact, BackupManager};
use etl_rs_clean::{CleanedReader, CleanedSnapshot, CleanedTable};
use etl_rs_core::context::check_token;
use etl_rs_core::health::{
    HealthCheck, HealthMonitor, HealthStatus, HealthThresholds, HostProbe, SystemHealthCheck,
    SystemProbe,
};
use etl_rs_core::observability::ProgressTracker;
use etl_rs_core::utils::RowDigest;
use etl_rs_core::{EtlError, EtlResult, RetryPolicy, RunContext};
use etl_rs_db::{DatabaseBackend, Statement, TableSpec};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::quality::{self, QualityScore};
use crate::report::{FailureReport, MigrationResult, RollbackReport, TableLoad};
use crate::state::{MigrationPhase, PhaseMachine};
use crate::target::{TargetDatabase, TargetFingerprint};

/// Upper bound on bound parameters per `INSERT`.
const MAX_PARAMS: usize = 900;

/// Rows of `total` that go into the canary.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn canary_size(total: u64, fraction: f64) -> u64 {
    if total == 0 || fraction <= 0.0 {
        return 0;
    }
    let rows = (total as f64 * fraction - 1e-9).ceil().max(1.0) as u64;
    rows.min(total)
}

/// Pings the target.
#[derive(Clone)]
pub struct TargetConnectivityCheck {
    backend: Arc<dyn DatabaseBackend>,
}

impl TargetConnectivityCheck {
    pub fn new(backend: Arc<dyn DatabaseBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl HealthCheck for TargetConnectivityCheck {
    fn name(&self) -> &str {
        "target_connectivity"
    }

    async fn check(&self) -> HealthStatus {
        match self.backend.ping().await {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => HealthStatus::Unhealthy(format!("target did not answer: {}", e.reason())),
        }
    }
}

/// Loads cleaned snapshots into one target.
#[derive(Debug)]
pub struct Orchestrator {
    target: TargetDatabase,
    backups: BackupManager,
    probe: Arc<dyn SystemProbe>,
}

impl Orchestrator {
    /// An orchestrator for `target` that keeps its target backups in
    /// `backups` and probes the local host.
    pub fn new(target: TargetDatabase, backups: BackupManager) -> Self {
        Self {
            target,
            backups,
            probe: Arc::new(HostProbe::default()),
        }
    }

    /// Replaces the host probe used by the full-load health checks.
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn SystemProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub const fn target(&self) -> &TargetDatabase {
        &self.target
    }

    /// Migrates `cleaned` into the target.
    ///
    /// Every terminal outcome, rejection and rollback included, is returned
    /// as `Ok` with its [`MigrationResult::failure`] set. `Err` is reserved
    /// for sequencing bugs.
    pub async fn migrate(
        &self,
        ctx: &RunContext,
        cleaned: &CleanedSnapshot,
    ) -> EtlResult<MigrationResult> {
        let span = ctx.stage_span("migrate");
        self.migrate_inner(ctx, cleaned).instrument(span).await
    }

    async fn migrate_inner(
        &self,
        ctx: &RunContext,
        cleaned: &CleanedSnapshot,
    ) -> EtlResult<MigrationResult> {
        let started = Instant::now();
        let mut run = Migration::new(self, ctx, cleaned);
        let result = run.drive().await;
        ctx.metrics.observe_duration("migrate.duration", started.elapsed());
        let result = result?;
        match &result.failure {
            None => tracing::info!(
                rows = result.rows_loaded(),
                tables = result.tables.len(),
                "Migration completed"
            ),
            Some(f) => tracing::error!(
                status = %result.status,
                code = %f.code,
                stage = %f.stage,
                reason = %f.reason,
                "Migration did not complete"
            ),
        }
        Ok(result)
    }
}

/// State of one `migrate` call.
struct Migration<'a> {
    orch: &'a Orchestrator,
    ctx: &'a RunContext,
    cleaned: &'a CleanedSnapshot,
    machine: PhaseMachine,
    retry: RetryPolicy,
    quality: Option<QualityScore>,
    baseline: Option<TargetFingerprint>,
    backup: Option<BackupArtifact>,
    loads: Vec<TableLoad>,
    cursors: Vec<Option<i64>>,
    progress: Arc<ProgressTracker>,
    started_at: chrono::DateTime<Utc>,
}

impl<'a> Migration<'a> {
    fn new(orch: &'a Orchestrator, ctx: &'a RunContext, cleaned: &'a CleanedSnapshot) -> Self {
        let loads = cleaned
            .tables
            .iter()
            .map(|t| TableLoad {
                table: t.spec.name.clone(),
                source_rows: t.stats.rows,
                ..TableLoad::default()
            })
            .collect();
        Self {
            orch,
            ctx,
            cleaned,
            machine: PhaseMachine::new(),
            retry: RetryPolicy::from(&ctx.settings.migrate.retry),
            quality: None,
            baseline: None,
            backup: None,
            loads,
            cursors: vec![None; cleaned.tables.len()],
            progress: Arc::new(ProgressTracker::new("migrate", cleaned.total_rows())),
            started_at: Utc::now(),
        }
    }

    async fn drive(&mut self) -> EtlResult<MigrationResult> {
        if let Err(e) = self.cleaned.verify() {
            self.machine.advance(MigrationPhase::Failed)?;
            return Ok(self.finish(Some(FailureReport::from_error(self.ctx.run_id, "pending", &e)), None));
        }

        self.machine.advance(MigrationPhase::QualityGate)?;
        let floor = self.ctx.settings.migrate.quality_floor;
        let score = match quality::score(self.ctx, self.cleaned).await {
            Ok(s) => s,
            Err(e) => return self.fail_untouched("quality_gate", &e),
        };
        let passes = score.passes(floor);
        tracing::info!(score = score.score, floor, passes, "Quality gate");
        if !passes {
            let reason = format!(
                "quality score {:.2} is below the floor of {floor:.2} (non-conforming columns: {})",
                score.score,
                score.offending_columns().join(", ")
            );
            self.quality = Some(score);
            self.ctx.metrics.incr("migrate.quality_gate_rejections", 1);
            self.machine.advance(MigrationPhase::RolledBack)?;
            let e = EtlError::CircuitBreakerHalt(reason);
            return Ok(self.finish(
                Some(FailureReport::from_error(self.ctx.run_id, "quality_gate", &e)),
                None,
            ));
        }
        self.quality = Some(score);

        // Nothing below this point runs unless the target is recoverable.
        if let Err(e) = self.protect_target().await {
            return self.fail_untouched("quality_gate", &e);
        }

        self.machine.advance(MigrationPhase::Canary)?;
        if let Err(e) = self.canary().await {
            return self.roll_back("canary", &e).await;
        }

        self.machine.advance(MigrationPhase::FullLoad)?;
        if let Err(e) = self.full_load().await {
            return self.roll_back("full_load", &e).await;
        }

        self.machine.advance(MigrationPhase::Verify)?;
        if let Err(e) = self.verify_and_cut_over().await {
            return self.roll_back("verify", &e).await;
        }

        self.machine.advance(MigrationPhase::Completed)?;
        Ok(self.finish(None, None))
    }

    fn fail_untouched(&mut self, stage: &str, e: &EtlError) -> EtlResult<MigrationResult> {
        self.machine.advance(MigrationPhase::Failed)?;
        Ok(self.finish(Some(FailureReport::from_error(self.ctx.run_id, stage, e)), None))
    }

    fn finish(
        &self,
        failure: Option<FailureReport>,
        rollback: Option<RollbackReport>,
    ) -> MigrationResult {
        MigrationResult {
            run_id: self.ctx.run_id,
            status: self.machine.current(),
            quality: self.quality.clone(),
            tables: self.loads.clone(),
            target_backup: self.backup.clone(),
            rollback,
            failure,
            history: self.machine.history().to_vec(),
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }

    fn target(&self) -> &TargetDatabase {
        &self.orch.target
    }

    /// Records the target's fingerprint and backs it up.
    async fn protect_target(&mut self) -> EtlResult<()> {
        let baseline = self.target().fingerprint().await?;
        tracing::info!(
            target = self.target().identity(),
            tables = baseline.tables.len(),
            digest = %baseline.digest(),
            "Target fingerprint taken"
        );
        let artifact = self.target().snapshot(&self.orch.backups).await?;
        tracing::info!(artifact = %artifact.path.display(), sha256 = %artifact.sha256, "Target backed up");
        self.baseline = Some(baseline);
        self.backup = Some(artifact);
        Ok(())
    }

    /// Runs `statements` in one transaction with the retry policy.
    async fn transact(&self, op: &str, statements: &[Statement], token: &CancellationToken) -> EtlResult<u64> {
        let backend = self.target().backend();
        self.retry
            .run(op, token, || backend.execute_transaction(statements))
            .await
    }

    async fn canary(&mut self) -> EtlResult<()> {
        let token = self.ctx.cancel_token().clone();
        let fraction = self.ctx.settings.migrate.canary_fraction;
        let reader = CleanedReader::open(self.cleaned)?;
        let run_id = self.ctx.run_id;
        let cleaned = self.cleaned;

        for (i, table) in cleaned.tables.iter().enumerate() {
            let spec = &table.spec;
            let create: Vec<Statement> = self
                .target()
                .editor()
                .create_staging(run_id, spec)
                .into_iter()
                .map(Statement::ddl)
                .collect();
            self.transact("create staging", &create, &token).await?;

            let want = canary_size(table.stats.rows, fraction);
            let batch = self.load(&reader, spec, None, Some(want), &token).await?;
            let (rows, digest) = self.read_staging(spec).await?;
            if rows != batch.rows {
                return Err(EtlError::Integrity(format!(
                    "canary of {}: staging holds {rows} rows, {} were loaded",
                    spec.name, batch.rows
                )));
            }
            if digest != batch.digest.hex() {
                return Err(EtlError::Integrity(format!(
                    "canary of {}: rows read back from the target differ from the cleaned snapshot",
                    spec.name
                )));
            }
            self.loads[i].canary_rows = batch.rows;
            self.loads[i].loaded_rows = batch.rows;
            self.cursors[i] = batch.cursor;
            self.ctx.metrics.incr("migrate.canary_rows", batch.rows);
            tracing::info!(table = %spec.name, rows = batch.rows, "Canary loaded");
        }
        Ok(())
    }

    async fn full_load(&mut self) -> EtlResult<()> {
        let settings = &self.ctx.settings;
        let token = self.ctx.child_token();
        let checks: Vec<Arc<dyn HealthCheck>> = vec![
            Arc::new(TargetConnectivityCheck::new(Arc::clone(self.target().backend()))),
            Arc::new(SystemHealthCheck::new(
                Arc::clone(&self.orch.probe),
                settings.paths.work_dir.clone(),
                HealthThresholds::from_clean(&settings.clean),
            )),
        ];
        for check in &checks {
            if let HealthStatus::Unhealthy(reason) = check.check().await {
                return Err(EtlError::Environment(format!(
                    "{} check failed before full load: {reason}",
                    check.name()
                )));
            }
        }
        let monitor = HealthMonitor::spawn(
            checks,
            Duration::from_millis(settings.migrate.health_interval_ms),
            Duration::from_secs(settings.preflight.probe_timeout_secs),
            token.clone(),
        );

        let loaded = self.load_remainder(&token).await;
        let breach = monitor.stop().await;
        match (loaded, breach) {
            (Ok(()), None) => Ok(()),
            (Err(e), None) => Err(e),
            (_, Some(reason)) => Err(EtlError::Environment(format!(
                "health check failed during full load: {reason}"
            ))),
        }
    }

    async fn load_remainder(&mut self, token: &CancellationToken) -> EtlResult<()> {
        let reader = CleanedReader::open(self.cleaned)?;
        let cleaned = self.cleaned;
        for (i, table) in cleaned.tables.iter().enumerate() {
            let batch = self
                .load(&reader, &table.spec, self.cursors[i], None, token)
                .await?;
            self.loads[i].loaded_rows += batch.rows;
            self.cursors[i] = batch.cursor;
            tracing::info!(
                table = %table.spec.name,
                rows = self.loads[i].loaded_rows,
                "Table loaded"
            );
        }
        self.progress.report();
        Ok(())
    }

    /// Copies rows of `spec` after `after` into its staging table, at most
    /// `limit` rows when given.
    async fn load(
        &self,
        reader: &CleanedReader,
        spec: &TableSpec,
        after: Option<i64>,
        limit: Option<u64>,
        token: &CancellationToken,
    ) -> EtlResult<Loaded> {
        let batch_size = self.ctx.settings.migrate.batch_size.max(1);
        let editor = self.target().editor();
        let staging = editor.staging_table(self.ctx.run_id, &spec.name);
        let width = spec.columns.len().max(1);
        let per_stmt = (MAX_PARAMS / width).max(1);

        let mut out = Loaded {
            rows: 0,
            cursor: after,
            digest: RowDigest::new(),
        };
        loop {
            check_token(token)?;
            let want = limit.map_or(batch_size, |l| {
                usize::try_from(l - out.rows).unwrap_or(usize::MAX).min(batch_size)
            });
            if want == 0 {
                break;
            }
            let page = reader.page(spec, out.cursor, want).await?;
            if page.is_empty() {
                break;
            }

            let statements: Vec<Statement> = page
                .rows
                .chunks(per_stmt)
                .map(|chunk| {
                    let params = chunk
                        .iter()
                        .flat_map(|row| {
                            row.iter()
                                .zip(&spec.columns)
                                .map(move |(v, c)| editor.bind_value(v, c))
                        })
                        .collect();
                    Statement::new(editor.insert_sql(&staging, spec, chunk.len()), params)
                })
                .collect();
            self.transact("insert batch", &statements, token).await?;

            for row in &page.rows {
                let rendered = spec.canonical_row(row);
                out.digest.add_row(rendered.iter().map(Option::as_deref));
            }
            let n = page.rows.len() as u64;
            out.rows += n;
            out.cursor = page.last_rowid;
            self.progress.advance(n);
            self.progress.maybe_report();
            self.ctx.metrics.incr("migrate.rows_loaded", n);
            self.ctx.metrics.incr("migrate.batches", 1);
        }
        Ok(out)
    }

    /// Row count and content digest of `spec`'s staging table.
    async fn read_staging(&self, spec: &TableSpec) -> EtlResult<(u64, String)> {
        let editor = self.target().editor();
        let staging = editor.staging_table(self.ctx.run_id, &spec.name);
        let rows = self
            .target()
            .backend()
            .query(&editor.select_sql(&staging, spec), &[])
            .await?;
        let mut digest = RowDigest::new();
        for row in &rows {
            let rendered = spec.canonical_row(row.values());
            digest.add_row(rendered.iter().map(Option::as_deref));
        }
        Ok((rows.len() as u64, digest.hex()))
    }

    async fn staging_count(&self, table: &CleanedTable) -> EtlResult<u64> {
        let editor = self.target().editor();
        let staging = editor.staging_table(self.ctx.run_id, table.name());
        let row = self
            .target()
            .backend()
            .query_one(&editor.count_sql(&staging), &[])
            .await?;
        let n: i64 = row.get("n")?;
        Ok(u64::try_from(n).unwrap_or_default())
    }

    async fn verify_and_cut_over(&mut self) -> EtlResult<()> {
        self.ctx.check_cancelled()?;
        let cleaned = self.cleaned;
        for (i, table) in cleaned.tables.iter().enumerate() {
            let count = self.staging_count(table).await?;
            self.loads[i].target_rows = Some(count);
            if count != table.stats.rows {
                self.loads[i].digest_match = Some(false);
                return Err(EtlError::Integrity(format!(
                    "{}: target holds {count} rows, cleaned snapshot has {}",
                    table.name(),
                    table.stats.rows
                )));
            }
            let (_, digest) = self.read_staging(&table.spec).await?;
            let matches = digest == table.digest;
            self.loads[i].digest_match = Some(matches);
            if !matches {
                return Err(EtlError::Integrity(format!(
                    "{}: target content digest {digest} does not match the cleaned snapshot's {}",
                    table.name(),
                    table.digest
                )));
            }
            tracing::info!(table = %table.name(), rows = count, "Table verified");
        }

        self.ctx.check_cancelled()?;
        let names = self.cleaned.table_names();
        let cutover: Vec<Statement> = self
            .target()
            .editor()
            .cutover(self.ctx.run_id, &names)
            .into_iter()
            .map(Statement::ddl)
            .collect();
        self.transact("cutover", &cutover, self.ctx.cancel_token()).await?;
        tracing::info!(tables = names.len(), "Cutover committed");
        Ok(())
    }

    /// Undoes whatever the run did to the target.
    async fn roll_back(&mut self, stage: &str, cause: &EtlError) -> EtlResult<MigrationResult> {
        tracing::warn!(stage, code = cause.code(), reason = %cause.reason(), "Rolling back");
        self.ctx.metrics.incr("migrate.rollbacks", 1);
        // The run token may be the reason for the rollback; cleanup must not
        // observe it.
        let token = CancellationToken::new();
        let mut report = RollbackReport::default();

        let names = self.cleaned.table_names();
        let drop: Vec<Statement> = self
            .target()
            .editor()
            .drop_staging(self.ctx.run_id, &names)
            .into_iter()
            .map(Statement::ddl)
            .collect();
        match self.transact("drop staging", &drop, &token).await {
            Ok(_) => report.staging_dropped = true,
            Err(e) => tracing::error!(error = %e, "Dropping staging objects failed"),
        }

        let differences = self.differences_from_baseline().await;
        if differences.is_empty() {
            report.verified = true;
        } else if let Some(artifact) = self.backup.clone() {
            tracing::warn!(?differences, "Target differs from its pre-migration state");
            match self.target().restore(&self.orch.backups, &artifact).await {
                Ok(()) => {
                    report.restored = true;
                    let remaining = self.differences_from_baseline().await;
                    report.verified = remaining.is_empty();
                    report.differences = remaining;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Restoring the target failed");
                    report.differences = differences;
                }
            }
        } else {
            report.differences = differences;
        }

        let status = if report.verified {
            MigrationPhase::RolledBack
        } else {
            MigrationPhase::Failed
        };
        self.machine.advance(status)?;
        let mut failure = FailureReport::from_error(self.ctx.run_id, stage, cause);
        if !report.verified {
            failure.reason = format!(
                "{}; rollback incomplete: {}",
                failure.reason,
                report.differences.join("; ")
            );
        }
        Ok(self.finish(Some(failure), Some(report)))
    }

    async fn differences_from_baseline(&self) -> Vec<String> {
        let Some(baseline) = &self.baseline else {
            return vec!["no pre-migration fingerprint".to_string()];
        };
        match self.target().fingerprint().await {
            Ok(now) => baseline.differences(&now),
            Err(e) => vec![format!("cannot fingerprint target: {}", e.reason())],
        }
    }
}

/// Rows copied by one [`Migration::load`] call.
struct Loaded {
    rows: u64,
    cursor: Option<i64>,
    digest: RowDigest,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canary_size() {
        assert_eq!(canary_size(1000, 0.10), 100);
        assert_eq!(canary_size(1001, 0.10), 101);
        assert_eq!(canary_size(5, 0.10), 1);
        assert_eq!(canary_size(0, 0.10), 0);
        assert_eq!(canary_size(10, 1.0), 10);
    }

    #[tokio::test]
    async fn test_connectivity_check() {
        let backend = Arc::new(etl_rs_db::SqliteBackend::memory().unwrap());
        let check = TargetConnectivityCheck::new(backend);
        assert_eq!(check.check().await, HealthStatus::Healthy);
        assert_eq!(check.name(), "target_connectivity");
    }
}
