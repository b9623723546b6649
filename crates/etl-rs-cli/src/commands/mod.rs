//! Built-in commands. Each implements
//! [`ManagementCommand`](crate::command::ManagementCommand).

pub mod backup;
pub mod clean;
pub mod migrate;
pub mod preflight;
pub mod profile;
pub mod restore;
pub mod run;
pub mod sweep;

pub use backup::BackupCommand;
pub use clean::CleanCommand;
pub use migrate::MigrateCommand;
pub use preflight::PreflightCommand;
pub use profile::ProfileCommand;
pub use restore::RestoreCommand;
pub use run::RunCommand;
pub use sweep::SweepCommand;

use crate::command::CommandRegistry;

/// Registers every built-in command into `registry`.
pub fn register_builtin_commands(registry: &mut CommandRegistry) {
    registry.register(Box::new(PreflightCommand));
    registry.register(Box::new(BackupCommand));
    registry.register(Box::new(RestoreCommand));
    registry.register(Box::new(ProfileCommand));
    registry.register(Box::new(CleanCommand));
    registry.register(Box::new(MigrateCommand));
    registry.register(Box::new(RunCommand));
    registry.register(Box::new(SweepCommand));
}
