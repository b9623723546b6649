//! # etl-rs-test
//!
//! Testing utilities for etl-rs: SQLite source and target fixtures, scratch
//! workspaces with settings pointing into a temporary directory, and fault
//! injection for target backends. The end-to-end scenarios live in this
//! crate's `tests/` directory.
//!
//! ```rust,no_run
//! use etl_rs_test::fixtures::EventsMix;
//! use etl_rs_test::workspace::TestWorkspace;
//!
//! async fn example() {
//!     let ws = TestWorkspace::with_events(EventsMix::scenario());
//!     let outcome = ws.pipeline().unwrap().run(&ws.source_path()).await.unwrap();
//!     assert_eq!(outcome.exit_code(), 0);
//! }
//! ```

pub mod faults;
pub mod fixtures;
pub mod workspace;

pub use faults::{touch_database, Fault, FaultyBackend, TamperingHost};
pub use fixtures::{events_source, seeded_target, EventsMix};
pub use workspace::{healthy_probe, TestWorkspace};
