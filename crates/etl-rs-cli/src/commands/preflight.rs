//! The `preflight` command.

use async_trait::async_trait;
use etl_rs_core::EtlResult;
use etl_rs_preflight::{host_input, PreflightChecker};

use crate::args;
use crate::command::{CommandContext, ExitStatus, ManagementCommand};
use crate::output;

/// Validates the environment before a run: source, disk, memory, target
/// connectivity, backup tooling, drivers and output directories.
pub struct PreflightCommand;

#[async_trait]
impl ManagementCommand for PreflightCommand {
    fn name(&self) -> &'static str {
        "preflight"
    }

    fn help(&self) -> &'static str {
        "Check that a run can start"
    }

    fn add_arguments(&self, cmd: clap::Command) -> clap::Command {
        cmd.arg(args::source("SQLite database to migrate"))
            .arg(args::target())
            .arg(
                clap::Arg::new("tag")
                    .long("tag")
                    .action(clap::ArgAction::Append)
                    .help("Only run checks carrying this tag"),
            )
    }

    async fn handle(&self, matches: &clap::ArgMatches, ctx: &CommandContext) -> EtlResult<ExitStatus> {
        let settings = ctx.settings_for(matches)?;
        let input = host_input(args::path(matches, "source")?, &settings)?;
        let tags: Option<Vec<&str>> = matches
            .get_many::<String>("tag")
            .map(|t| t.map(String::as_str).collect());
        let report = PreflightChecker::with_builtins()
            .run(&input, tags.as_deref())
            .await;
        output::emit(ctx, &report.to_json(), || report.to_string())?;
        Ok(ExitStatus::from_code(report.exit_code()))
    }
}
