//! The `backup` command.

use async_trait::async_trait;
use etl_rs_backup::BackupManager;
use etl_rs_core::EtlResult;

use crate::args;
use crate::command::{CommandContext, ExitStatus, ManagementCommand};
use crate::output;

/// Takes a checksum-verified backup of a SQLite database.
pub struct BackupCommand;

#[async_trait]
impl ManagementCommand for BackupCommand {
    fn name(&self) -> &'static str {
        "backup"
    }

    fn help(&self) -> &'static str {
        "Back up a SQLite database"
    }

    fn add_arguments(&self, cmd: clap::Command) -> clap::Command {
        cmd.arg(args::source("Database to back up"))
            .arg(args::output("Backup directory, overriding paths.backup_dir", false))
    }

    async fn handle(&self, matches: &clap::ArgMatches, ctx: &CommandContext) -> EtlResult<ExitStatus> {
        let dir = matches
            .get_one::<std::path::PathBuf>("output")
            .cloned()
            .unwrap_or_else(|| ctx.settings.paths.backup_dir.clone());
        let artifact = BackupManager::new(dir)
            .backup(&args::path(matches, "source")?)
            .await?;
        output::emit(ctx, &artifact, || {
            format!(
                "{} ({} bytes, sha256 {})",
                artifact.path.display(),
                artifact.size,
                artifact.sha256
            )
        })?;
        Ok(ExitStatus::Success)
    }
}
