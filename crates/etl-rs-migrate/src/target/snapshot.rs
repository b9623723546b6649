//! Point-in-time copies of a target database.
//!
//! A [`TargetSnapshotter`] dumps the target to a file and restores it from
//! one. The orchestrator registers dumps with the backup manager, so target
//! backups get the same naming, checksums and retention as source backups.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use etl_rs_core::{EtlError, EtlResult};
use etl_rs_db::{DatabaseConfig, SqliteBackend};

/// Dumps and restores a target.
#[async_trait]
pub trait TargetSnapshotter: Send + Sync + std::fmt::Debug {
    /// Basename backup artifacts of this target are named after.
    fn basename(&self) -> String;

    /// Writes a complete copy of the target to `dest`.
    async fn dump(&self, dest: &Path) -> EtlResult<()>;

    /// Replaces the target's contents with the dump at `src`.
    async fn restore(&self, src: &Path) -> EtlResult<()>;
}

/// Snapshots a `SQLite` target through the online backup API.
#[derive(Debug, Clone)]
pub struct SqliteSnapshotter {
    backend: Arc<SqliteBackend>,
}

impl SqliteSnapshotter {
    pub const fn new(backend: Arc<SqliteBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl TargetSnapshotter for SqliteSnapshotter {
    fn basename(&self) -> String {
        let name = self
            .backend
            .path()
            .file_name()
            .map_or_else(|| "sqlite".to_string(), |n| n.to_string_lossy().into_owned());
        format!("target-{name}")
    }

    async fn dump(&self, dest: &Path) -> EtlResult<()> {
        self.backend.backup_to(dest).await
    }

    async fn restore(&self, src: &Path) -> EtlResult<()> {
        self.backend.restore_from(src).await
    }
}

/// Snapshots a `PostgreSQL` schema with `pg_dump` / `pg_restore`.
///
/// Dumps use the custom format; restores run in a single transaction with
/// `--clean --if-exists`, so a failed restore leaves the target as it was.
#[derive(Debug, Clone)]
pub struct PgDumpSnapshotter {
    config: DatabaseConfig,
    schema: String,
    timeout: Duration,
}

impl PgDumpSnapshotter {
    /// A snapshotter for `schema` of the database in `config`. Each tool
    /// invocation is killed after `timeout`.
    pub fn new(config: DatabaseConfig, schema: impl Into<String>, timeout: Duration) -> Self {
        Self {
            config,
            schema: schema.into(),
            timeout,
        }
    }

    /// Connection arguments shared by both tools.
    pub fn connection_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(host) = &self.config.host {
            args.extend(["--host".to_string(), host.clone()]);
        }
        if let Some(port) = self.config.port {
            args.extend(["--port".to_string(), port.to_string()]);
        }
        if let Some(user) = &self.config.user {
            args.extend(["--username".to_string(), user.clone()]);
        }
        args.push("--no-password".to_string());
        args
    }

    async fn run_tool(&self, tool: &str, args: Vec<String>) -> EtlResult<()> {
        let mut cmd = tokio::process::Command::new(tool);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(password) = self.config.password.as_deref().filter(|p| !p.is_empty()) {
            cmd.env("PGPASSWORD", password);
        }
        tracing::debug!(tool, schema = %self.schema, "Running target snapshot tool");
        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| EtlError::target(format!("{tool} timed out after {:?}", self.timeout)))?
            .map_err(|e| EtlError::Environment(format!("failed to run {tool}: {e}")))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(EtlError::target(format!(
                "{tool} exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

#[async_trait]
impl TargetSnapshotter for PgDumpSnapshotter {
    fn basename(&self) -> String {
        format!("target-{}.{}", self.config.name, self.schema)
    }

    async fn dump(&self, dest: &Path) -> EtlResult<()> {
        let mut args = self.connection_args();
        args.extend([
            "--format=custom".to_string(),
            "--no-owner".to_string(),
            format!("--schema={}", self.schema),
            format!("--file={}", dest.display()),
            self.config.name.clone(),
        ]);
        self.run_tool("pg_dump", args).await
    }

    async fn restore(&self, src: &Path) -> EtlResult<()> {
        let mut args = self.connection_args();
        args.extend([
            "--clean".to_string(),
            "--if-exists".to_string(),
            "--single-transaction".to_string(),
            "--no-owner".to_string(),
            format!("--dbname={}", self.config.name),
            src.display().to_string(),
        ]);
        self.run_tool("pg_restore", args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etl_rs_db::DatabaseBackend;

    #[tokio::test]
    async fn test_sqlite_dump_and_restore() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(SqliteBackend::open(dir.path().join("target.db")).unwrap());
        backend.execute("CREATE TABLE t (x INTEGER)", &[]).await.unwrap();
        backend.execute("INSERT INTO t VALUES (1)", &[]).await.unwrap();

        let snap = SqliteSnapshotter::new(Arc::clone(&backend));
        assert_eq!(snap.basename(), "target-target.db");
        let dump = dir.path().join("dump.db");
        snap.dump(&dump).await.unwrap();

        backend.execute("DROP TABLE t", &[]).await.unwrap();
        snap.restore(&dump).await.unwrap();
        let rows = backend.query("SELECT x FROM t", &[]).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_pg_connection_args() {
        let cfg = DatabaseConfig::postgres("app", "db.internal", 5433, "etl", "secret");
        let snap = PgDumpSnapshotter::new(cfg, "public", Duration::from_secs(60));
        assert_eq!(
            snap.connection_args(),
            vec![
                "--host", "db.internal", "--port", "5433", "--username", "etl", "--no-password"
            ]
        );
        assert_eq!(snap.basename(), "target-app.public");
    }

    #[tokio::test]
    async fn test_missing_tool_is_environment_error() {
        let cfg = DatabaseConfig::postgres("app", "localhost", 5432, "etl", "");
        let snap = PgDumpSnapshotter::new(cfg, "public", Duration::from_secs(5));
        let err = snap
            .run_tool("etl-rs-no-such-tool", Vec::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ENVIRONMENT_ERROR");
    }
}
