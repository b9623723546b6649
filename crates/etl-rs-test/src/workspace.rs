//! Scratch workspaces for pipeline tests.
//!
//! A [`TestWorkspace`] owns a temporary directory holding the source, a
//! SQLite target and every state, backup, work and report directory, plus
//! [`Settings`] pointing at them. Host probes are replaced by a healthy
//! [`StaticProbe`] so results do not depend on the machine running them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use etl_rs_core::health::{StaticProbe, SystemProbe};
use etl_rs_core::utils::sha256_file;
use etl_rs_core::{EtlResult, RunContext, Settings};
use etl_rs_migrate::{Pipeline, RunLedger, TargetDatabase};
use tempfile::TempDir;

use crate::fixtures::{events_source, seeded_target, EventsMix};

/// A temporary directory laid out for one or more runs.
#[derive(Debug)]
pub struct TestWorkspace {
    dir: TempDir,
    settings: Settings,
}

impl TestWorkspace {
    /// Creates an empty workspace.
    ///
    /// # Panics
    ///
    /// Panics if the temporary directory cannot be created.
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temporary workspace");
        let root = dir.path();
        let mut settings = Settings::default();
        settings.log_level = "warn".to_string();
        settings.paths.state_dir = root.join("state");
        settings.paths.backup_dir = root.join("backups");
        settings.paths.work_dir = root.join("work");
        settings.paths.report_dir = root.join("reports");
        settings.target.engine = "sqlite".to_string();
        settings.target.name = root.join("target.db").display().to_string();
        settings.clean.batch_size = 100;
        settings.clean.health_interval_ms = 20;
        settings.migrate.batch_size = 50;
        settings.migrate.health_interval_ms = 20;
        settings.migrate.retry.base_delay_ms = 1;
        settings.migrate.retry.max_delay_ms = 5;
        Self { dir, settings }
    }

    /// A workspace whose source is an `events` table mixed as `mix` and
    /// whose target already holds a `customers` table.
    ///
    /// # Panics
    ///
    /// Panics if either database cannot be written.
    pub fn with_events(mix: EventsMix) -> Self {
        let ws = Self::new();
        events_source(&ws.source_path(), mix).expect("Failed to write the source fixture");
        seeded_target(&ws.target_path()).expect("Failed to seed the target");
        ws
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn source_path(&self) -> PathBuf {
        self.path().join("source.db")
    }

    pub fn target_path(&self) -> PathBuf {
        self.path().join("target.db")
    }

    /// SHA-256 of the source file.
    ///
    /// # Panics
    ///
    /// Panics if the source cannot be read.
    pub fn source_checksum(&self) -> String {
        sha256_file(self.source_path()).expect("Failed to hash the source")
    }

    /// Opens the SQLite target.
    pub fn target(&self) -> EtlResult<TargetDatabase> {
        TargetDatabase::sqlite(&self.target_path())
    }

    /// A pipeline writing to the SQLite target, probing a healthy host.
    pub fn pipeline(&self) -> EtlResult<Pipeline> {
        Ok(self.pipeline_with(self.target()?))
    }

    /// A pipeline writing to `target`, probing a healthy host.
    pub fn pipeline_with(&self, target: TargetDatabase) -> Pipeline {
        Pipeline::new(self.settings.clone(), target).with_probe(healthy_probe())
    }

    pub fn ledger(&self) -> RunLedger {
        RunLedger::new(&self.settings.paths.state_dir)
    }

    /// A run context over this workspace's settings.
    pub fn context(&self, run_id: u64) -> RunContext {
        RunContext::new(run_id, self.settings.clone())
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

/// A probe reporting a healthy host.
pub fn healthy_probe() -> Arc<dyn SystemProbe> {
    Arc::new(StaticProbe::healthy())
}
