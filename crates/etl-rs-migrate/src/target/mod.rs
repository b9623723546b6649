//! The target database as the orchestrator sees it.
//!
//! A [`TargetDatabase`] bundles the backend that runs SQL, the schema editor
//! that writes it and the snapshotter that backs the target up.

pub mod fingerprint;
pub mod snapshot;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use etl_rs_backup::{BackupArtifact, BackupManager};
use etl_rs_core::settings::TargetSettings;
use etl_rs_core::utils::fs::remove_if_exists;
use etl_rs_core::{EtlError, EtlResult};
use etl_rs_db::schema_editor::{PostgresSchemaEditor, SqliteSchemaEditor};
use etl_rs_db::{BackendType, DatabaseBackend, DatabaseConfig, SchemaEditor, SqliteBackend};

pub use fingerprint::{fingerprint, TableFingerprint, TargetFingerprint};
pub use snapshot::{PgDumpSnapshotter, SqliteSnapshotter, TargetSnapshotter};

/// Timeout for one `pg_dump` / `pg_restore` invocation.
const DUMP_TIMEOUT: Duration = Duration::from_secs(3600);

/// Backend, dialect and snapshotter of one target.
pub struct TargetDatabase {
    backend: Arc<dyn DatabaseBackend>,
    editor: Arc<dyn SchemaEditor>,
    snapshotter: Arc<dyn TargetSnapshotter>,
    identity: String,
}

impl std::fmt::Debug for TargetDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetDatabase")
            .field("identity", &self.identity)
            .field("backend", &self.backend.vendor())
            .finish_non_exhaustive()
    }
}

impl TargetDatabase {
    /// Assembles a target from its parts.
    pub fn new(
        backend: Arc<dyn DatabaseBackend>,
        editor: Arc<dyn SchemaEditor>,
        snapshotter: Arc<dyn TargetSnapshotter>,
        identity: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            editor,
            snapshotter,
            identity: identity.into(),
        }
    }

    /// Opens a `SQLite` target file, creating it if needed.
    pub fn sqlite(path: &Path) -> EtlResult<Self> {
        let sqlite = Arc::new(SqliteBackend::open(path)?);
        let identity = DatabaseConfig::sqlite_file(path.display().to_string()).identity();
        Ok(Self::new(
            Arc::clone(&sqlite) as Arc<dyn DatabaseBackend>,
            Arc::new(SqliteSchemaEditor),
            Arc::new(SqliteSnapshotter::new(sqlite)),
            identity,
        ))
    }

    /// Connects to the configured target.
    pub fn connect(settings: &TargetSettings) -> EtlResult<Self> {
        let config = DatabaseConfig::from_target(settings)?;
        match config.backend {
            BackendType::SQLite => Self::sqlite(Path::new(&config.name)),
            BackendType::PostgreSQL => {
                let backend = etl_rs_db::connect(&config)?;
                let identity = format!("{}/{}", config.identity(), settings.schema);
                Ok(Self::new(
                    backend,
                    Arc::new(PostgresSchemaEditor::new(settings.schema.clone())),
                    Arc::new(PgDumpSnapshotter::new(
                        config,
                        settings.schema.clone(),
                        DUMP_TIMEOUT,
                    )),
                    identity,
                ))
            }
        }
    }

    /// Replaces the backend used for SQL, keeping the snapshotter.
    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn DatabaseBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn backend(&self) -> &Arc<dyn DatabaseBackend> {
        &self.backend
    }

    pub fn editor(&self) -> &dyn SchemaEditor {
        self.editor.as_ref()
    }

    /// Stable identity used to key run locks.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Reads the target's fingerprint.
    pub async fn fingerprint(&self) -> EtlResult<TargetFingerprint> {
        fingerprint(self.backend.as_ref(), self.editor.as_ref()).await
    }

    /// Dumps the target and registers the dump as a backup artifact.
    pub async fn snapshot(&self, backups: &BackupManager) -> EtlResult<BackupArtifact> {
        let basename = self.snapshotter.basename();
        tokio::fs::create_dir_all(backups.backup_dir()).await?;
        let dump = backups.backup_dir().join(format!(".{basename}.dump"));
        remove_if_exists(&dump)?;
        if let Err(e) = self.snapshotter.dump(&dump).await {
            let _ = remove_if_exists(&dump);
            return Err(e);
        }
        backups.adopt(&dump, &basename).await
    }

    /// Restores the target from `artifact` after checking its checksum.
    pub async fn restore(&self, backups: &BackupManager, artifact: &BackupArtifact) -> EtlResult<()> {
        if !backups.verify(artifact).await? {
            return Err(EtlError::Integrity(format!(
                "checksum mismatch for target backup {}; refusing to restore",
                artifact.path.display()
            )));
        }
        tracing::warn!(artifact = %artifact.path.display(), target = %self.identity, "Restoring target");
        self.snapshotter.restore(&artifact.path).await
    }
}
