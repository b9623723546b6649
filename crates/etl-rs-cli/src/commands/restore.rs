//! The `restore` command.

use async_trait::async_trait;
use etl_rs_backup::BackupManager;
use etl_rs_core::{EtlError, EtlResult};

use crate::args;
use crate::command::{CommandContext, ExitStatus, ManagementCommand};
use crate::output;

/// Restores a backup artifact after checking its checksum.
pub struct RestoreCommand;

#[async_trait]
impl ManagementCommand for RestoreCommand {
    fn name(&self) -> &'static str {
        "restore"
    }

    fn help(&self) -> &'static str {
        "Restore a database from a backup artifact"
    }

    fn add_arguments(&self, cmd: clap::Command) -> clap::Command {
        cmd.arg(args::source("Backup artifact to restore"))
            .arg(args::output("Database file to write", true))
    }

    async fn handle(&self, matches: &clap::ArgMatches, ctx: &CommandContext) -> EtlResult<ExitStatus> {
        let source = args::path(matches, "source")?;
        let dest = args::path(matches, "output")?;
        let dir = source
            .parent()
            .map_or_else(|| ctx.settings.paths.backup_dir.clone(), std::path::Path::to_path_buf);
        let manager = BackupManager::new(dir);
        let artifact = manager
            .list()
            .await?
            .into_iter()
            .find(|a| a.path.file_name() == source.file_name())
            .ok_or_else(|| {
                EtlError::Configuration(format!("{} is not a backup artifact", source.display()))
            })?;
        manager.restore(&artifact, &dest).await?;
        output::emit(ctx, &artifact, || {
            format!("restored {} to {}", artifact.path.display(), dest.display())
        })?;
        Ok(ExitStatus::Success)
    }
}
