//! Command framework for the `etl-rs` binary.
//!
//! Each subcommand implements [`ManagementCommand`] and is registered in a
//! [`CommandRegistry`], which builds the clap application and dispatches
//! parsed arguments to the matching handler.
//!
//! ## Defining a command
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use etl_rs_cli::command::{CommandContext, ExitStatus, ManagementCommand};
//! use etl_rs_core::EtlResult;
//!
//! struct VersionCommand;
//!
//! #[async_trait]
//! impl ManagementCommand for VersionCommand {
//!     fn name(&self) -> &'static str { "version" }
//!     fn help(&self) -> &'static str { "Print the version" }
//!
//!     async fn handle(
//!         &self,
//!         _matches: &clap::ArgMatches,
//!         _ctx: &CommandContext,
//!     ) -> EtlResult<ExitStatus> {
//!         println!("{}", env!("CARGO_PKG_VERSION"));
//!         Ok(ExitStatus::Success)
//!     }
//! }
//! ```

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use etl_rs_core::{EtlError, EtlResult, Settings};
use tokio_util::sync::CancellationToken;

/// Process exit status of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Everything succeeded.
    Success,
    /// Hard failure; the operator must act.
    Failure,
    /// Succeeded with warnings; proceed with caution.
    Warning,
}

impl ExitStatus {
    pub const fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Failure => 1,
            Self::Warning => 2,
        }
    }

    /// Maps a 0/1/2 exit code; anything else is a failure.
    pub const fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Success,
            2 => Self::Warning,
            _ => Self::Failure,
        }
    }
}

impl From<ExitStatus> for std::process::ExitCode {
    fn from(status: ExitStatus) -> Self {
        Self::from(status.code())
    }
}

/// What every command receives besides its own arguments.
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub settings: Settings,
    /// Print machine-readable JSON instead of text.
    pub json: bool,
    /// Cancelled on Ctrl-C.
    pub cancel: CancellationToken,
}

impl CommandContext {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            json: false,
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub const fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Settings with the `--target` override of `matches` applied.
    pub fn settings_for(&self, matches: &clap::ArgMatches) -> EtlResult<Settings> {
        let mut settings = self.settings.clone();
        if let Some(target) = arg_str(matches, "target") {
            crate::args::apply_target(&mut settings, target)?;
        }
        Ok(settings)
    }
}

fn arg_str<'a>(matches: &'a clap::ArgMatches, id: &str) -> Option<&'a str> {
    matches
        .try_get_one::<String>(id)
        .ok()
        .flatten()
        .map(String::as_str)
}

/// A subcommand of the `etl-rs` binary.
#[async_trait]
pub trait ManagementCommand: Send + Sync {
    /// Name used to invoke the command.
    fn name(&self) -> &'static str;

    /// One-line description for `--help`.
    fn help(&self) -> &'static str;

    /// Adds the command's arguments. The default adds none.
    fn add_arguments(&self, cmd: clap::Command) -> clap::Command {
        cmd
    }

    /// Runs the command.
    async fn handle(&self, matches: &clap::ArgMatches, ctx: &CommandContext) -> EtlResult<ExitStatus>;
}

/// The registered subcommands.
pub struct CommandRegistry {
    commands: HashMap<&'static str, Box<dyn ManagementCommand>>,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self {
            commands: HashMap::new(),
        }
    }

    /// A registry holding every built-in command.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::commands::register_builtin_commands(&mut registry);
        registry
    }

    /// Registers `command`, replacing any command of the same name.
    pub fn register(&mut self, command: Box<dyn ManagementCommand>) {
        self.commands.insert(command.name(), command);
    }

    pub fn get(&self, name: &str) -> Option<&dyn ManagementCommand> {
        self.commands.get(name).map(AsRef::as_ref)
    }

    /// Registered names, sorted.
    pub fn list_commands(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.commands.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Builds the clap application with the global `--config` and `--json`
    /// flags and one subcommand per registered command.
    pub fn build_cli(&self) -> clap::Command {
        let mut app = clap::Command::new("etl-rs")
            .about("Staged, reversible SQLite to PostgreSQL migrations")
            .version(env!("CARGO_PKG_VERSION"))
            .subcommand_required(true)
            .arg_required_else_help(true)
            .arg(
                clap::Arg::new("config")
                    .long("config")
                    .short('c')
                    .global(true)
                    .value_parser(clap::value_parser!(PathBuf))
                    .help("TOML or JSON settings file; ETL_* variables override it"),
            )
            .arg(
                clap::Arg::new("json")
                    .long("json")
                    .global(true)
                    .action(clap::ArgAction::SetTrue)
                    .help("Print machine-readable JSON"),
            );

        for name in self.list_commands() {
            if let Some(cmd) = self.get(name) {
                let subcmd = clap::Command::new(cmd.name()).about(cmd.help());
                app = app.subcommand(cmd.add_arguments(subcmd));
            }
        }
        app
    }

    /// Dispatches `matches` to the selected command.
    pub async fn execute(&self, matches: &clap::ArgMatches, ctx: &CommandContext) -> EtlResult<ExitStatus> {
        let (name, sub_matches) = matches
            .subcommand()
            .ok_or_else(|| EtlError::Configuration("no subcommand specified".to_string()))?;
        let cmd = self
            .get(name)
            .ok_or_else(|| EtlError::Configuration(format!("unknown command: {name}")))?;
        tracing::debug!(command = name, "Dispatching command");
        cmd.handle(sub_matches, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestCommand(&'static str);

    #[async_trait]
    impl ManagementCommand for TestCommand {
        fn name(&self) -> &'static str {
            self.0
        }

        fn help(&self) -> &'static str {
            "A test command"
        }

        fn add_arguments(&self, cmd: clap::Command) -> clap::Command {
            cmd.arg(
                clap::Arg::new("verbose")
                    .long("verbose")
                    .action(clap::ArgAction::SetTrue),
            )
        }

        async fn handle(&self, matches: &clap::ArgMatches, ctx: &CommandContext) -> EtlResult<ExitStatus> {
            if matches.get_flag("verbose") && ctx.json {
                Ok(ExitStatus::Warning)
            } else {
                Ok(ExitStatus::Success)
            }
        }
    }

    struct FailingCommand;

    #[async_trait]
    impl ManagementCommand for FailingCommand {
        fn name(&self) -> &'static str {
            "fail"
        }

        fn help(&self) -> &'static str {
            "Always fails"
        }

        async fn handle(&self, _matches: &clap::ArgMatches, _ctx: &CommandContext) -> EtlResult<ExitStatus> {
            Err(EtlError::Configuration("deliberate failure".to_string()))
        }
    }

    #[test]
    fn test_registry_new_is_empty() {
        let registry = CommandRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_list_commands_sorted_and_replaced() {
        let mut registry = CommandRegistry::new();
        registry.register(Box::new(TestCommand("zebra")));
        registry.register(Box::new(TestCommand("alpha")));
        registry.register(Box::new(TestCommand("alpha")));
        assert_eq!(registry.list_commands(), vec!["alpha", "zebra"]);
    }

    #[test]
    fn test_builtins_registered() {
        let registry = CommandRegistry::with_builtins();
        assert_eq!(
            registry.list_commands(),
            vec!["backup", "clean", "migrate", "preflight", "profile", "restore", "run", "sweep"]
        );
        registry.build_cli().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let mut registry = CommandRegistry::new();
        registry.register(Box::new(TestCommand("check")));
        let matches = registry
            .build_cli()
            .try_get_matches_from(["etl-rs", "check", "--json", "--config", "etl.toml"])
            .unwrap();
        assert!(matches.get_flag("json"));
        assert_eq!(
            matches.get_one::<PathBuf>("config"),
            Some(&PathBuf::from("etl.toml"))
        );
    }

    #[tokio::test]
    async fn test_execute_dispatches() {
        let mut registry = CommandRegistry::new();
        registry.register(Box::new(TestCommand("check")));
        let matches = registry
            .build_cli()
            .try_get_matches_from(["etl-rs", "check", "--verbose"])
            .unwrap();
        let ctx = CommandContext::new(Settings::default()).with_json(true);
        assert_eq!(registry.execute(&matches, &ctx).await.unwrap(), ExitStatus::Warning);
    }

    #[tokio::test]
    async fn test_execute_failing_command() {
        let mut registry = CommandRegistry::new();
        registry.register(Box::new(FailingCommand));
        let matches = registry
            .build_cli()
            .try_get_matches_from(["etl-rs", "fail"])
            .unwrap();
        let err = registry
            .execute(&matches, &CommandContext::new(Settings::default()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");
    }

    #[test]
    fn test_exit_status_codes() {
        assert_eq!(ExitStatus::from_code(0), ExitStatus::Success);
        assert_eq!(ExitStatus::from_code(2), ExitStatus::Warning);
        assert_eq!(ExitStatus::from_code(7), ExitStatus::Failure);
        assert_eq!(ExitStatus::Warning.code(), 2);
    }
}
