//! The `migrate` command.

use std::path::PathBuf;

use async_trait::async_trait;
use etl_rs_backup::BackupManager;
use etl_rs_clean::CleanedSnapshot;
use etl_rs_core::utils::fs::write_json_atomic;
use etl_rs_core::{EtlResult, RunContext};
use etl_rs_migrate::{quality, FailureReport, Orchestrator, RunLedger, RunLock, RunStatus, TargetDatabase};

use crate::args;
use crate::command::{CommandContext, ExitStatus, ManagementCommand};
use crate::output;

/// Loads an existing cleaned snapshot into the target as its own Migration
/// Run: quality gate, canary, full load, verification and cutover, rolling
/// the target back on failure.
pub struct MigrateCommand;

#[async_trait]
impl ManagementCommand for MigrateCommand {
    fn name(&self) -> &'static str {
        "migrate"
    }

    fn help(&self) -> &'static str {
        "Load a cleaned snapshot into the target"
    }

    fn add_arguments(&self, cmd: clap::Command) -> clap::Command {
        cmd.arg(args::source("Cleaned snapshot (its manifest must sit beside it)"))
            .arg(args::target())
            .arg(args::dry_run("Only compute the Quality Score; leave the target alone"))
    }

    async fn handle(&self, matches: &clap::ArgMatches, ctx: &CommandContext) -> EtlResult<ExitStatus> {
        let settings = ctx.settings_for(matches)?;
        let cleaned = CleanedSnapshot::load(&args::path(matches, "source")?)?;

        if args::flag(matches, "dry-run") {
            let floor = settings.migrate.quality_floor;
            let run = RunContext::new(0, settings).with_parent(&ctx.cancel);
            let score = quality::score(&run, &cleaned).await?;
            output::emit(ctx, &score, || {
                format!(
                    "Quality Score {:.2} ({} of {} cells conform), floor {floor:.2}",
                    score.score, score.conforming, score.checked
                )
            })?;
            return Ok(if score.passes(floor) {
                ExitStatus::Success
            } else {
                output::failure(
                    "CIRCUIT_BREAKER_HALT",
                    &format!(
                        "Quality Score {:.2} below floor {floor:.2}: {}",
                        score.score,
                        score.offending_columns().join(", ")
                    ),
                    None,
                );
                ExitStatus::Failure
            });
        }

        let paths = settings.paths.clone();
        let target = TargetDatabase::connect(&settings.target)?;
        let ledger = RunLedger::new(&paths.state_dir);
        let record = {
            let (source, identity) = (cleaned.path.clone(), target.identity().to_string());
            ledger.blocking(move |l| l.begin(&source, &identity)).await?
        };
        let id = record.id;
        let lock = match RunLock::acquire(&paths.state_dir, target.identity(), id) {
            Ok(lock) => lock,
            Err(e) => {
                let failure = FailureReport::from_error(id, "lock", &e);
                ledger
                    .blocking(move |l| l.finish_failed(id, RunStatus::Failed, failure))
                    .await?;
                return Err(e);
            }
        };
        let snapshot_path = cleaned.path.clone();
        ledger
            .blocking(move |l| {
                l.update(id, |r| r.cleaned_snapshot = Some(snapshot_path))?;
                l.transition(id, RunStatus::CanaryMigrating)
            })
            .await?;

        let run = RunContext::new(id, settings).with_parent(&ctx.cancel);
        let orchestrator = Orchestrator::new(target, BackupManager::from_settings(&paths));
        let result = match orchestrator.migrate(&run, &cleaned).await {
            Ok(result) => result,
            Err(e) => {
                let failure = FailureReport::from_error(id, "migrate", &e);
                ledger
                    .blocking(move |l| l.finish_failed(id, RunStatus::Failed, failure))
                    .await?;
                lock.release()?;
                return Err(e);
            }
        };

        let failure = result.failure.clone();
        let backup = result.target_backup.as_ref().map(|b| b.path.clone());
        let report_path: PathBuf = paths.report_dir.join(format!("run-{id}")).join("migration.json");
        write_json_atomic(&report_path, &result)?;
        let recorded = report_path.clone();
        let statuses = result.run_statuses();
        ledger
            .blocking(move |l| {
                let mut current = RunStatus::CanaryMigrating;
                for status in statuses {
                    if status != current {
                        l.transition(id, status)?;
                        current = status;
                    }
                }
                l.update(id, |r| {
                    r.failure = failure;
                    r.backups.extend(backup);
                    r.report = Some(recorded);
                })
            })
            .await?;
        lock.release()?;
        run.metrics.emit_to_tracing();

        output::emit(ctx, &result, || {
            let mut lines: Vec<String> = result
                .tables
                .iter()
                .map(|t| format!("{:<24} loaded {:>8} of {:>8}", t.table, t.loaded_rows, t.source_rows))
                .collect();
            lines.push(format!("run {id}: {}", result.status));
            lines.push(format!("report: {}", report_path.display()));
            lines.join("\n")
        })?;
        if let Some(f) = &result.failure {
            output::failure(&f.code, &f.reason, Some(&report_path));
        }
        Ok(if result.is_completed() {
            ExitStatus::Success
        } else {
            ExitStatus::Failure
        })
    }
}
