//! # etl-rs
//!
//! Staged, reversible migrations of a SQLite database into PostgreSQL (or
//! another SQLite file).
//!
//! This is the meta-crate that re-exports all sub-crates for convenient access.
//! You can depend on `etl-rs` to get the whole pipeline, or depend on
//! individual crates for finer-grained control.
//!
//! ```no_run
//! # async fn run() -> etl_rs::core::EtlResult<()> {
//! use etl_rs::core::settings_loader::from_env;
//! use etl_rs::migrate::Pipeline;
//!
//! let settings = from_env()?;
//! etl_rs::core::logging::setup_logging(&settings);
//! let outcome = Pipeline::connect(settings)?
//!     .run(std::path::Path::new("app.db"))
//!     .await?;
//! std::process::exit(outcome.exit_code());
//! # }
//! ```

/// Settings, errors, run context, logging, metrics and health probes.
pub use etl_rs_core as core;

/// Values, rows, source snapshots and the SQLite and `PostgreSQL` backends.
pub use etl_rs_db as db;

/// Verified file backups, restore and retention sweeps.
pub use etl_rs_backup as backup;

/// Environment checks run before anything is touched.
pub use etl_rs_preflight as preflight;

/// Type and timestamp-layout inference with the circuit breaker.
pub use etl_rs_profile as profile;

/// Cleaned snapshots built from a profile's remediation plan.
pub use etl_rs_clean as clean;

/// Quality gate, canary, full load, verification, rollback and whole runs.
pub use etl_rs_migrate as migrate;

/// The `etl-rs` command line.
#[cfg(feature = "cli")]
pub use etl_rs_cli as cli;

/// Fixtures, scratch workspaces and fault injection for tests.
#[cfg(feature = "testing")]
pub use etl_rs_test as test;

pub use etl_rs_core::{EtlError, EtlResult, Settings};
pub use etl_rs_migrate::{Pipeline, RunOutcome, RunStatus};
