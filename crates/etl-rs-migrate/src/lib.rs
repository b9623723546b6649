//! # etl-rs-migrate
//!
//! Moves a cleaned snapshot into the target and ties the stages of a run
//! together.
//!
//! ## Modules
//!
//! - [`state`] - The [`RunStatus`] and [`MigrationPhase`] state machines
//! - [`quality`] - The Quality Score of a cleaned snapshot
//! - [`target`] - Target backend, dialect, snapshots and fingerprints
//! - [`orchestrator`] - Quality gate, canary, full load, verify, cutover and rollback
//! - [`lock`] - Lock files and the per-target [`RunLock`]
//! - [`ledger`] - The [`RunLedger`] of Migration Runs
//! - [`report`] - Migration and run reports
//! - [`pipeline`] - [`Pipeline`], one run end to end
//!
//! ## Examples
//!
//! ```no_run
//! # async fn run() -> etl_rs_core::EtlResult<()> {
//! use etl_rs_core::settings_loader::from_env;
//! use etl_rs_migrate::Pipeline;
//!
//! let settings = from_env()?;
//! let pipeline = Pipeline::connect(settings)?;
//! let outcome = pipeline.run(std::path::Path::new("app.db")).await?;
//! println!("{}: {}", outcome.status(), outcome.report_path.display());
//! # Ok(())
//! # }
//! ```

pub mod ledger;
pub mod lock;
pub mod orchestrator;
pub mod pipeline;
pub mod quality;
pub mod report;
pub mod state;
pub mod target;

pub use ledger::{RunLedger, RunRecord};
pub use lock::{LockFile, RunLock};
pub use orchestrator::{canary_size, Orchestrator, TargetConnectivityCheck};
pub use pipeline::{Pipeline, RunOutcome};
pub use quality::QualityScore;
pub use report::{FailureReport, MigrationResult, RollbackReport, RunReport, TableLoad};
pub use state::{MigrationPhase, PhaseMachine, RunStatus};
pub use target::{TargetDatabase, TargetFingerprint, TargetSnapshotter};
