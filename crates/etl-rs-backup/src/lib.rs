//! # etl-rs-backup
//!
//! Backup/restore manager for etl-rs. Produces timestamped,
//! checksum-verified copies of the source, the cleaned snapshot and the
//! target, and restores them on rollback.
//!
//! - [`BackupManager::backup`] copies a file to `{basename}.{YYYYMMDD_HHMMSS}`
//!   with a `sha256sum`-format checksum file beside it.
//! - [`BackupManager::restore`] refuses an artifact whose checksum no longer
//!   matches.
//! - [`BackupManager::sweep`] applies the retention window, skipping
//!   artifacts still referenced by an active run.

pub mod artifact;
pub mod manager;

pub use artifact::{BackupArtifact, BackupMethod};
pub use manager::{BackupManager, SweepReport};
