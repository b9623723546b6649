//! The `run` command.

use async_trait::async_trait;
use etl_rs_core::EtlResult;
use etl_rs_migrate::{Pipeline, RunOutcome, RunStatus};

use crate::args;
use crate::command::{CommandContext, ExitStatus, ManagementCommand};
use crate::output;

/// Runs every stage for one source: preflight, backup, profile, clean,
/// migrate. Ctrl-C cancels the run and rolls the target back.
pub struct RunCommand;

/// Exit status of a finished run: a completed run whose preflight only
/// warned exits with 2.
pub fn exit_status(outcome: &RunOutcome) -> ExitStatus {
    if outcome.status() != RunStatus::Completed {
        return ExitStatus::Failure;
    }
    let preflight_warned = outcome
        .report
        .preflight
        .as_ref()
        .and_then(|p| p.get("exit_code"))
        .and_then(serde_json::Value::as_i64)
        == Some(2);
    if preflight_warned {
        ExitStatus::Warning
    } else {
        ExitStatus::Success
    }
}

#[async_trait]
impl ManagementCommand for RunCommand {
    fn name(&self) -> &'static str {
        "run"
    }

    fn help(&self) -> &'static str {
        "Migrate a SQLite source end to end"
    }

    fn add_arguments(&self, cmd: clap::Command) -> clap::Command {
        cmd.arg(args::source("SQLite database to migrate"))
            .arg(args::target())
            .arg(args::dry_run("Dry-run the remediated sample against the target while profiling"))
    }

    async fn handle(&self, matches: &clap::ArgMatches, ctx: &CommandContext) -> EtlResult<ExitStatus> {
        let mut settings = ctx.settings_for(matches)?;
        if args::flag(matches, "dry-run") {
            settings.profile.dry_run = true;
        }
        let source = args::path(matches, "source")?;
        let outcome = Pipeline::connect(settings)?
            .run_until(&source, &ctx.cancel)
            .await?;

        let report = &outcome.report;
        output::emit(ctx, report, || {
            let mut lines = vec![format!("run {}: {}", report.run_id, report.status)];
            if let Some(migration) = &report.migration {
                lines.extend(migration.tables.iter().map(|t| {
                    format!("{:<24} loaded {:>8} of {:>8}", t.table, t.loaded_rows, t.source_rows)
                }));
            }
            lines.push(format!("report: {}", outcome.report_path.display()));
            lines.join("\n")
        })?;
        if let Some(f) = &report.failure {
            output::failure(&f.code, &f.reason, Some(&outcome.report_path));
        }
        Ok(exit_status(&outcome))
    }
}
