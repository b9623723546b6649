//! End-to-end Migration Runs.
//!
//! [`Pipeline::run`] executes every stage in order for one source:
//!
//! ```text
//! Preflight -> Backup(source) -> Profile -> [circuit breaker]
//!           -> Clean -> Backup(cleaned) -> Migrate -> report
//! ```
//!
//! The run is recorded in the [`RunLedger`] from the first moment, holds the
//! target's [`RunLock`] for its whole duration and always ends with a report
//! under `{report_dir}/run-{id}/`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use etl_rs_backup::{BackupArtifact, BackupManager, SweepReport};
use etl_rs_clean::{CleanedSnapshot, Cleaner};
use etl_rs_core::health::{HostProbe, SystemProbe};
use etl_rs_core::observability::MetricsSnapshot;
use etl_rs_core::{EtlError, EtlResult, RunContext, Settings};
use etl_rs_db::SourceSnapshot;
use etl_rs_preflight::{host_input, PathLocator, PreflightChecker, ToolLocator};
use etl_rs_profile::{DryRunTarget, ProfileReport, Profiler};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::ledger::{RunLedger, RunRecord};
use crate::lock::RunLock;
use crate::orchestrator::Orchestrator;
use crate::report::{FailureReport, RunReport};
use crate::state::RunStatus;
use crate::target::TargetDatabase;

/// A stage failure before the orchestrator takes over.
struct StageError {
    stage: &'static str,
    error: EtlError,
}

fn at(stage: &'static str) -> impl FnOnce(EtlError) -> StageError {
    move |error| StageError { stage, error }
}

/// How a run ended.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub report: RunReport,
    /// Where the report was written.
    pub report_path: PathBuf,
}

impl RunOutcome {
    pub fn status(&self) -> RunStatus {
        self.report.status
    }

    /// 0 for a completed run, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        i32::from(self.report.status != RunStatus::Completed)
    }
}

/// Runs the whole pipeline against one target.
#[derive(Debug)]
pub struct Pipeline {
    settings: Settings,
    orchestrator: Orchestrator,
    backups: BackupManager,
    probe: Arc<dyn SystemProbe>,
    tools: Arc<dyn ToolLocator>,
}

impl Pipeline {
    /// A pipeline writing to `target`, probing the local host.
    pub fn new(settings: Settings, target: TargetDatabase) -> Self {
        let probe: Arc<dyn SystemProbe> = Arc::new(HostProbe::new(std::time::Duration::from_secs(
            settings.preflight.probe_timeout_secs,
        )));
        let backups = BackupManager::from_settings(&settings.paths);
        Self {
            orchestrator: Orchestrator::new(target, backups.clone()).with_probe(Arc::clone(&probe)),
            backups,
            probe,
            tools: Arc::new(PathLocator::from_env()),
            settings,
        }
    }

    /// A pipeline writing to the target named in `settings`.
    pub fn connect(settings: Settings) -> EtlResult<Self> {
        let target = TargetDatabase::connect(&settings.target)?;
        Ok(Self::new(settings, target))
    }

    /// Replaces the host probe used by preflight, cleaning and loading.
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn SystemProbe>) -> Self {
        self.orchestrator = self.orchestrator.with_probe(Arc::clone(&probe));
        self.probe = probe;
        self
    }

    /// Replaces the locator preflight uses to find backup tooling.
    #[must_use]
    pub fn with_tools(mut self, tools: Arc<dyn ToolLocator>) -> Self {
        self.tools = tools;
        self
    }

    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn ledger(&self) -> RunLedger {
        RunLedger::new(&self.settings.paths.state_dir)
    }

    pub const fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Directory holding the reports of run `id`.
    pub fn run_dir(&self, id: u64) -> PathBuf {
        self.settings.paths.report_dir.join(format!("run-{id}"))
    }

    /// Runs the pipeline for `source`.
    pub async fn run(&self, source: &Path) -> EtlResult<RunOutcome> {
        self.run_until(source, &CancellationToken::new()).await
    }

    /// Runs the pipeline for `source`; cancelling `cancel` stops it at the
    /// next check point and rolls the target back if it was touched.
    pub async fn run_until(&self, source: &Path, cancel: &CancellationToken) -> EtlResult<RunOutcome> {
        let ledger = self.ledger();
        let record = {
            let source = source.to_path_buf();
            let target = self.orchestrator.target().identity().to_string();
            ledger
                .blocking(move |l| l.begin(&source, &target))
                .await?
        };
        let ctx = RunContext::new(record.id, self.settings.clone()).with_parent(cancel);
        let span = ctx.stage_span("run");
        async {
            tracing::info!(
                source = %source.display(),
                target = self.orchestrator.target().identity(),
                "Run started"
            );
            let mut run = Run {
                pipeline: self,
                ctx: &ctx,
                ledger,
                status: RunStatus::Pending,
                report: RunReport {
                    run_id: ctx.run_id,
                    correlation_id: ctx.correlation_id,
                    status: RunStatus::Pending,
                    source: source.to_path_buf(),
                    source_checksum: String::new(),
                    target: self.orchestrator.target().identity().to_string(),
                    preflight: None,
                    profile_report: None,
                    cleaned_snapshot: None,
                    backups: Vec::new(),
                    migration: None,
                    metrics: MetricsSnapshot::default(),
                    failure: None,
                    started_at: Utc::now(),
                    finished_at: Utc::now(),
                },
            };
            run.execute(source).await
        }
        .instrument(span)
        .await
    }

    /// Deletes expired backups that no unfinished run references.
    pub async fn sweep(&self) -> EtlResult<SweepReport> {
        let protected: HashSet<PathBuf> = self
            .ledger()
            .blocking(RunLedger::protected_artifacts)
            .await?;
        self.backups
            .sweep(self.settings.backup.retention_days, &protected)
            .await
    }
}

/// State of one run.
struct Run<'a> {
    pipeline: &'a Pipeline,
    ctx: &'a RunContext,
    ledger: RunLedger,
    status: RunStatus,
    report: RunReport,
}

impl Run<'_> {
    async fn execute(&mut self, source: &Path) -> EtlResult<RunOutcome> {
        let pipeline = self.pipeline;
        let lock = match RunLock::acquire(
            &pipeline.settings.paths.state_dir,
            pipeline.orchestrator.target().identity(),
            self.ctx.run_id,
        ) {
            Ok(lock) => lock,
            Err(e) => {
                self.record_failure(StageError {
                    stage: "lock",
                    error: e,
                })
                .await?;
                return self.finish(None).await;
            }
        };

        let snapshot = match SourceSnapshot::open(source).await {
            Ok(s) => s,
            Err(e) => {
                self.record_failure(StageError {
                    stage: "source",
                    error: e,
                })
                .await?;
                let outcome = self.finish(None).await;
                lock.release()?;
                return outcome;
            }
        };
        self.report.source_checksum = snapshot.sha256().to_string();

        match self.stages(&snapshot).await {
            Ok(()) => {}
            Err(failure) => self.record_failure(failure).await?,
        }
        let outcome = self.finish(Some(&snapshot)).await;
        lock.release()?;
        outcome
    }

    /// Applies `f` to this run's ledger record.
    async fn update_record<F>(&self, f: F) -> EtlResult<()>
    where
        F: FnOnce(&mut RunRecord) + Send + 'static,
    {
        let id = self.ctx.run_id;
        self.ledger.blocking(move |l| l.update(id, f)).await?;
        Ok(())
    }

    async fn advance(&mut self, next: RunStatus) -> EtlResult<()> {
        let id = self.ctx.run_id;
        self.ledger
            .blocking(move |l| l.transition(id, next))
            .await?;
        self.status = next;
        Ok(())
    }

    async fn record_failure(&mut self, failure: StageError) -> EtlResult<()> {
        let report = FailureReport::from_error(self.ctx.run_id, failure.stage, &failure.error);
        tracing::error!(
            stage = failure.stage,
            code = failure.error.code(),
            reason = %failure.error.reason(),
            "Run failed"
        );
        self.ctx.metrics.incr("run.failures", 1);
        let (id, recorded) = (self.ctx.run_id, report.clone());
        self.ledger
            .blocking(move |l| l.finish_failed(id, RunStatus::Failed, recorded))
            .await?;
        self.status = RunStatus::Failed;
        self.report.failure = Some(report);
        Ok(())
    }

    async fn track_backup(&mut self, artifact: BackupArtifact) -> Result<(), StageError> {
        let path = artifact.path.clone();
        self.update_record(move |r| r.backups.push(path))
            .await
            .map_err(at("ledger"))?;
        self.report.backups.push(artifact);
        Ok(())
    }

    async fn stages(&mut self, source: &SourceSnapshot) -> Result<(), StageError> {
        let pipeline = self.pipeline;
        let settings = &pipeline.settings;
        let target = pipeline.orchestrator.target();

        // Preflight
        let mut input = host_input(source.path(), settings).map_err(at("preflight"))?;
        input.target_backend = Some(Arc::clone(target.backend()));
        input.probe = Arc::clone(&pipeline.probe);
        input.tools = Arc::clone(&pipeline.tools);
        let preflight = PreflightChecker::with_builtins().run(&input, None).await;
        self.report.preflight = Some(preflight.to_json());
        preflight.into_result().map_err(at("preflight"))?;
        self.ctx.check_cancelled().map_err(at("preflight"))?;

        // Backup(source)
        let artifact = pipeline
            .backups
            .backup(source.path())
            .await
            .map_err(at("backup"))?;
        self.track_backup(artifact).await?;

        // Profile
        self.advance(RunStatus::Profiling).await.map_err(at("ledger"))?;
        let profile = self.profile(source).await.map_err(at("profile"))?;
        profile.ensure_proceed().map_err(at("profile"))?;
        self.ctx.check_cancelled().map_err(at("profile"))?;

        // Clean
        self.advance(RunStatus::Cleaning).await.map_err(at("ledger"))?;
        let cleaned = self.clean(source, &profile).await.map_err(at("clean"))?;
        let artifact = pipeline
            .backups
            .backup(&cleaned.path)
            .await
            .map_err(at("backup"))?;
        self.track_backup(artifact).await?;
        self.ctx.check_cancelled().map_err(at("clean"))?;
        source.verify_unchanged().await.map_err(at("source_check"))?;

        // Migrate
        self.advance(RunStatus::CanaryMigrating)
            .await
            .map_err(at("ledger"))?;
        let result = pipeline
            .orchestrator
            .migrate(self.ctx, &cleaned)
            .await
            .map_err(at("migrate"))?;
        for status in result.run_statuses() {
            if status != self.status {
                self.advance(status).await.map_err(at("ledger"))?;
            }
        }
        if let Some(failure) = &result.failure {
            let recorded = failure.clone();
            self.update_record(move |r| r.failure = Some(recorded))
                .await
                .map_err(at("ledger"))?;
            self.report.failure = Some(failure.clone());
        }
        if let Some(artifact) = &result.target_backup {
            self.track_backup(artifact.clone()).await?;
        }
        self.report.migration = Some(result);
        Ok(())
    }

    async fn profile(&mut self, source: &SourceSnapshot) -> EtlResult<ProfileReport> {
        let pipeline = self.pipeline;
        let settings = &pipeline.settings;
        let mut profiler = Profiler::new(settings.profile.clone());
        if settings.profile.dry_run {
            profiler = profiler.with_dry_run(DryRunTarget::new(
                Arc::clone(pipeline.orchestrator.target().backend()),
                &settings.target.schema,
            ));
        }
        let report = profiler.profile(self.ctx, source).await?;
        let path = pipeline.run_dir(self.ctx.run_id).join("profile.json");
        report.write(&path)?;
        let recorded = path.clone();
        self.update_record(move |r| r.profile_report = Some(recorded))
            .await?;
        tracing::info!(
            report = %path.display(),
            verdict = ?report.circuit_breaker.verdict,
            "Profile report written"
        );
        self.report.profile_report = Some(path);
        Ok(report)
    }

    async fn clean(&mut self, source: &SourceSnapshot, profile: &ProfileReport) -> EtlResult<CleanedSnapshot> {
        let stem = source
            .path()
            .file_stem()
            .map_or_else(|| "source".to_string(), |s| s.to_string_lossy().into_owned());
        let pipeline = self.pipeline;
        let destination = pipeline
            .settings
            .paths
            .work_dir
            .join(format!("run-{}", self.ctx.run_id))
            .join(format!("{stem}.cleaned.db"));
        let cleaned = Cleaner::new(Arc::clone(&pipeline.probe))
            .clean(self.ctx, source, profile, &destination)
            .await?;
        let path = cleaned.path.clone();
        let recorded = path.clone();
        self.update_record(move |r| r.cleaned_snapshot = Some(recorded))
            .await?;
        self.report.cleaned_snapshot = Some(path);
        Ok(cleaned)
    }

    /// Checks the source once more, writes the report and records it. A
    /// source that changed fails the run, completed or not; a run that
    /// already failed keeps its first failure.
    async fn finish(&mut self, source: Option<&SourceSnapshot>) -> EtlResult<RunOutcome> {
        if let Some(source) = source {
            if let Err(error) = source.verify_unchanged().await {
                if self.status.can_transition_to(RunStatus::Failed) {
                    self.record_failure(StageError {
                        stage: "source_check",
                        error,
                    })
                    .await?;
                } else {
                    tracing::error!(error = %error, status = %self.status, "Source changed during the run");
                }
            }
        }

        self.report.status = self.status;
        self.report.metrics = self.ctx.metrics.snapshot();
        self.report.finished_at = Utc::now();
        let path = self.report.write(&self.pipeline.run_dir(self.ctx.run_id))?;
        let recorded = path.clone();
        self.update_record(move |r| r.report = Some(recorded))
            .await?;
        self.ctx.metrics.emit_to_tracing();

        match &self.report.failure {
            None => tracing::info!(status = %self.status, report = %path.display(), "Run finished"),
            Some(f) => tracing::warn!(
                status = %self.status,
                code = %f.code,
                reason = %f.reason,
                report = %path.display(),
                "Run finished"
            ),
        }
        Ok(RunOutcome {
            report: self.report.clone(),
            report_path: path,
        })
    }
}
