//! # etl-rs-cli
//!
//! The `etl-rs` command line. Every pipeline stage is a subcommand
//! (`preflight`, `backup`, `restore`, `profile`, `clean`, `migrate`) and
//! `run` chains them into one Migration Run; `sweep` applies backup
//! retention.
//!
//! Exit codes: 0 success, 1 hard failure, 2 success with warnings. On
//! failure the last reason and the path of the JSON report go to stderr.
//!
//! ```rust
//! use etl_rs_cli::command::CommandRegistry;
//!
//! let registry = CommandRegistry::with_builtins();
//! assert!(registry.list_commands().contains(&"run"));
//! ```

pub mod args;
pub mod command;
pub mod commands;
pub mod output;

use std::ffi::OsString;
use std::path::PathBuf;

use etl_rs_core::logging::setup_logging;
use etl_rs_core::settings_loader::{from_env, from_file_with_env};
use etl_rs_core::{EtlResult, Settings};
use tokio_util::sync::CancellationToken;

pub use command::{CommandContext, CommandRegistry, ExitStatus, ManagementCommand};

/// Loads settings from `config` (or defaults) with `ETL_*` overrides.
pub fn load_settings(config: Option<&PathBuf>) -> EtlResult<Settings> {
    config.map_or_else(from_env, from_file_with_env)
}

/// Parses `argv`, runs the selected command and reports errors.
pub async fn run_cli<I, T>(argv: I, cancel: CancellationToken) -> ExitStatus
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let registry = CommandRegistry::with_builtins();
    let matches = match registry.build_cli().try_get_matches_from(argv) {
        Ok(m) => m,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitStatus::Failure
            } else {
                ExitStatus::Success
            };
        }
    };
    let json = matches.get_flag("json");

    let settings = match load_settings(matches.get_one::<PathBuf>("config")) {
        Ok(s) => s,
        Err(e) => {
            output::error(&e, json);
            return ExitStatus::Failure;
        }
    };
    setup_logging(&settings);

    let ctx = CommandContext::new(settings)
        .with_json(json)
        .with_cancel(cancel);
    match registry.execute(&matches, &ctx).await {
        Ok(status) => status,
        Err(e) => {
            tracing::error!(code = e.code(), reason = %e.reason(), "Command failed");
            output::error(&e, json);
            ExitStatus::from_code(e.exit_code())
        }
    }
}
