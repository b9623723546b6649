//! The `sweep` command.

use async_trait::async_trait;
use etl_rs_backup::BackupManager;
use etl_rs_core::EtlResult;
use etl_rs_migrate::RunLedger;

use crate::command::{CommandContext, ExitStatus, ManagementCommand};
use crate::output;

/// Deletes backups older than the retention window unless an unfinished
/// run still references them.
pub struct SweepCommand;

#[async_trait]
impl ManagementCommand for SweepCommand {
    fn name(&self) -> &'static str {
        "sweep"
    }

    fn help(&self) -> &'static str {
        "Delete expired backups"
    }

    fn add_arguments(&self, cmd: clap::Command) -> clap::Command {
        cmd.arg(
            clap::Arg::new("retention-days")
                .long("retention-days")
                .value_parser(clap::value_parser!(u32))
                .help("Override backup.retention_days"),
        )
    }

    async fn handle(&self, matches: &clap::ArgMatches, ctx: &CommandContext) -> EtlResult<ExitStatus> {
        let settings = &ctx.settings;
        let days = matches
            .get_one::<u32>("retention-days")
            .copied()
            .unwrap_or(settings.backup.retention_days);
        let protected = RunLedger::new(&settings.paths.state_dir)
            .blocking(RunLedger::protected_artifacts)
            .await?;
        let report = BackupManager::from_settings(&settings.paths)
            .sweep(days, &protected)
            .await?;
        output::emit(ctx, &report, || {
            format!(
                "removed {}, kept {}, protected {}, orphans {}, errors {}",
                report.removed.len(),
                report.kept.len(),
                report.protected.len(),
                report.orphans.len(),
                report.errors.len()
            )
        })?;
        for error in &report.errors {
            tracing::warn!(error = %error, "Sweep could not delete an artifact");
        }
        Ok(if report.errors.is_empty() {
            ExitStatus::Success
        } else {
            ExitStatus::Warning
        })
    }
}
