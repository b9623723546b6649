//! The `profile` command.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use etl_rs_core::{EtlResult, RunContext, Settings};
use etl_rs_db::SourceSnapshot;
use etl_rs_migrate::TargetDatabase;
use etl_rs_profile::{DryRunTarget, ProfileReport, Profiler};

use crate::args;
use crate::command::{CommandContext, ExitStatus, ManagementCommand};
use crate::output;

/// Samples a source, infers column types and timestamp layouts and applies
/// the circuit breaker.
pub struct ProfileCommand;

/// Where `profile` writes its report when `--output` is not given.
pub fn default_report_path(settings: &Settings, source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map_or_else(|| "source".to_string(), |s| s.to_string_lossy().into_owned());
    settings.paths.report_dir.join(format!("profile-{stem}.json"))
}

/// Profiles `source` outside of a Migration Run.
pub async fn profile_source(
    ctx: &RunContext,
    source: &SourceSnapshot,
    dry_run: bool,
) -> EtlResult<ProfileReport> {
    let settings = &ctx.settings;
    let mut profiler = Profiler::new(settings.profile.clone());
    if dry_run {
        let target = TargetDatabase::connect(&settings.target)?;
        profiler = profiler.with_dry_run(DryRunTarget::new(
            Arc::clone(target.backend()),
            &settings.target.schema,
        ));
    }
    profiler.profile(ctx, source).await
}

#[async_trait]
impl ManagementCommand for ProfileCommand {
    fn name(&self) -> &'static str {
        "profile"
    }

    fn help(&self) -> &'static str {
        "Profile a source and decide PROCEED or HALT"
    }

    fn add_arguments(&self, cmd: clap::Command) -> clap::Command {
        cmd.arg(args::source("SQLite database to profile"))
            .arg(args::output("Report path [default: {report_dir}/profile-{stem}.json]", false))
            .arg(args::target())
            .arg(args::dry_run("Also insert the remediated sample into the target and roll back"))
    }

    async fn handle(&self, matches: &clap::ArgMatches, ctx: &CommandContext) -> EtlResult<ExitStatus> {
        let mut settings = ctx.settings_for(matches)?;
        let dry_run = args::flag(matches, "dry-run") || settings.profile.dry_run;
        settings.profile.dry_run = dry_run;
        let source = args::path(matches, "source")?;
        let report_path = matches
            .get_one::<PathBuf>("output")
            .cloned()
            .unwrap_or_else(|| default_report_path(&settings, &source));

        let run = RunContext::new(0, settings).with_parent(&ctx.cancel);
        let snapshot = SourceSnapshot::open(&source).await?;
        let report = profile_source(&run, &snapshot, dry_run).await?;
        report.write(&report_path)?;
        snapshot.verify_unchanged().await?;

        output::emit(ctx, &report, || {
            let mut lines: Vec<String> = report
                .columns
                .iter()
                .map(|c| {
                    format!(
                        "{:<32} {:<10} {:>6.2}%{}",
                        c.qualified_name(),
                        c.inferred_type.to_string(),
                        c.confidence * 100.0,
                        if c.ambiguous { "  ambiguous" } else { "" }
                    )
                })
                .collect();
            lines.push(format!(
                "{}: {}",
                report.circuit_breaker.verdict, report.circuit_breaker.reason
            ));
            lines.push(format!("report: {}", report_path.display()));
            lines.join("\n")
        })?;

        if report.is_halt() {
            output::failure(
                "CIRCUIT_BREAKER_HALT",
                &report.circuit_breaker.reason,
                Some(&report_path),
            );
            Ok(ExitStatus::Failure)
        } else if report.ambiguous_columns().is_empty() {
            Ok(ExitStatus::Success)
        } else {
            Ok(ExitStatus::Warning)
        }
    }
}
