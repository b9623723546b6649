//! The `clean` command.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use etl_rs_clean::Cleaner;
use etl_rs_core::{EtlResult, RunContext};
use etl_rs_db::SourceSnapshot;
use etl_rs_profile::ProfileReport;

use crate::args;
use crate::command::{CommandContext, ExitStatus, ManagementCommand};
use crate::commands::profile::profile_source;
use crate::output;

/// Writes a cleaned snapshot of a source, never modifying the source.
pub struct CleanCommand;

#[async_trait]
impl ManagementCommand for CleanCommand {
    fn name(&self) -> &'static str {
        "clean"
    }

    fn help(&self) -> &'static str {
        "Write a cleaned snapshot of a source"
    }

    fn add_arguments(&self, cmd: clap::Command) -> clap::Command {
        cmd.arg(args::source("SQLite database to clean"))
            .arg(args::output("Cleaned snapshot to write", true))
            .arg(
                clap::Arg::new("report")
                    .long("report")
                    .value_parser(clap::value_parser!(PathBuf))
                    .help("Profile report to follow; profiles the source when omitted"),
            )
    }

    async fn handle(&self, matches: &clap::ArgMatches, ctx: &CommandContext) -> EtlResult<ExitStatus> {
        let settings = ctx.settings.clone();
        let timeout = Duration::from_secs(settings.preflight.probe_timeout_secs);
        let destination = args::path(matches, "output")?;
        let run = RunContext::new(0, settings).with_parent(&ctx.cancel);
        let source = SourceSnapshot::open(&args::path(matches, "source")?).await?;

        let report = match matches.get_one::<PathBuf>("report") {
            Some(path) => ProfileReport::load(path)?,
            None => profile_source(&run, &source, false).await?,
        };
        let cleaned = Cleaner::host(timeout)
            .clean(&run, &source, &report, &destination)
            .await?;

        output::emit(ctx, &cleaned, || {
            let mut lines: Vec<String> = cleaned
                .tables
                .iter()
                .map(|t| {
                    format!(
                        "{:<24} rows {:>8}  reencoded {:>6}  empty->null {:>6}  unparseable->null {:>6}",
                        t.name(),
                        t.stats.rows,
                        t.stats.reencoded,
                        t.stats.empty_to_null,
                        t.stats.unparseable_to_null
                    )
                })
                .collect();
            lines.push(format!("snapshot: {}", cleaned.path.display()));
            lines.push(format!("manifest: {}", cleaned.manifest_path().display()));
            lines.join("\n")
        })?;
        Ok(ExitStatus::Success)
    }
}
