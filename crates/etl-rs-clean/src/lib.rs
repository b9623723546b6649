//! # etl-rs-clean
//!
//! The Data Cleaner. Applies the Profile Report's remediation rules to every
//! row of the source and writes the result to a fresh `SQLite` file, the
//! Cleaned Snapshot.
//!
//! - The source is only ever opened read-only.
//! - Rows are written under one exclusive transaction into
//!   `{destination}.partial`; the file is renamed into place only after it
//!   commits and is checksummed.
//! - A background health monitor cancels the write when disk or memory
//!   thresholds are breached.
//! - `{destination}.manifest.json` records the resolved table specs, the
//!   per-table statistics and content digests, and the file checksum.

pub mod cleaner;
pub mod reader;
pub mod snapshot;

pub use cleaner::Cleaner;
pub use reader::{CleanedReader, Page};
pub use snapshot::{CleanStats, CleanedSnapshot, CleanedTable};
