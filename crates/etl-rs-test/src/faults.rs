//! Fault injection for target backends.
//!
//! [`FaultyBackend`] wraps a real [`DatabaseBackend`] and misbehaves on the
//! nth transaction that inserts rows, which is how the rollback paths of the
//! orchestrator are driven in tests. [`TamperingHost`] writes to the source
//! while preflight is running.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use etl_rs_core::health::{MemoryInfo, StaticProbe, SystemProbe};
use etl_rs_core::{EtlError, EtlResult};
use etl_rs_db::{BackendType, DatabaseBackend, Row, Statement, Value};
use etl_rs_migrate::TargetDatabase;
use tokio_util::sync::CancellationToken;

/// What to do, and when.
#[derive(Debug, Clone)]
pub enum Fault {
    /// Fail the nth insert transaction.
    Fail { nth: usize, transient: bool },
    /// Report success for the nth insert transaction without running it.
    Drop { nth: usize },
    /// Cancel `token` while running the nth insert transaction.
    Cancel { nth: usize, token: CancellationToken },
    /// Write to the SQLite database at `path` before the nth insert
    /// transaction.
    Touch { nth: usize, path: PathBuf },
}

/// Writes one row to the SQLite database at `path`, changing its bytes.
pub fn touch_database(path: &Path) -> EtlResult<()> {
    let conn = rusqlite::Connection::open(path).map_err(|e| EtlError::Database(e.to_string()))?;
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS touched (n INTEGER);
         INSERT INTO touched VALUES (1);",
    )
    .map_err(|e| EtlError::Database(e.to_string()))
}

/// A backend that injects one [`Fault`].
pub struct FaultyBackend {
    inner: Arc<dyn DatabaseBackend>,
    fault: Fault,
    inserts: AtomicUsize,
}

impl FaultyBackend {
    pub fn new(inner: Arc<dyn DatabaseBackend>, fault: Fault) -> Self {
        Self {
            inner,
            fault,
            inserts: AtomicUsize::new(0),
        }
    }

    /// Wraps the backend of `target`, keeping its snapshotter.
    pub fn install(target: TargetDatabase, fault: Fault) -> TargetDatabase {
        let inner = Arc::clone(target.backend());
        target.with_backend(Arc::new(Self::new(inner, fault)))
    }

    /// Insert transactions seen so far.
    pub fn inserts(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DatabaseBackend for FaultyBackend {
    fn vendor(&self) -> &str {
        self.inner.vendor()
    }

    fn backend_type(&self) -> BackendType {
        self.inner.backend_type()
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> EtlResult<u64> {
        self.inner.execute(sql, params).await
    }

    async fn query(&self, sql: &str, params: &[Value]) -> EtlResult<Vec<Row>> {
        self.inner.query(sql, params).await
    }

    async fn execute_transaction(&self, statements: &[Statement]) -> EtlResult<u64> {
        if statements.iter().any(|s| s.sql.starts_with("INSERT")) {
            let n = self.inserts.fetch_add(1, Ordering::SeqCst) + 1;
            match &self.fault {
                Fault::Fail { nth, transient } if *nth == n => {
                    return Err(if *transient {
                        EtlError::transient("connection reset by peer")
                    } else {
                        EtlError::target("duplicate key value violates unique constraint")
                    });
                }
                Fault::Drop { nth } if *nth == n => return Ok(0),
                Fault::Cancel { nth, token } if *nth == n => token.cancel(),
                Fault::Touch { nth, path } if *nth == n => touch_database(path)?,
                _ => {}
            }
        }
        self.inner.execute_transaction(statements).await
    }

    async fn dry_run(&self, statements: &[Statement]) -> EtlResult<()> {
        self.inner.dry_run(statements).await
    }
}

/// A healthy host that writes to the database at `path` the first
/// time free disk space is asked for.
#[derive(Debug)]
pub struct TamperingHost {
    path: PathBuf,
    touched: AtomicBool,
    inner: StaticProbe,
}

impl TamperingHost {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            touched: AtomicBool::new(false),
            inner: StaticProbe::healthy(),
        }
    }
}

#[async_trait]
impl SystemProbe for TamperingHost {
    async fn free_disk_bytes(&self, path: &Path) -> EtlResult<u64> {
        if !self.touched.swap(true, Ordering::SeqCst) {
            touch_database(&self.path)?;
        }
        self.inner.free_disk_bytes(path).await
    }

    async fn memory(&self) -> EtlResult<MemoryInfo> {
        self.inner.memory().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etl_rs_db::SqliteBackend;

    #[tokio::test]
    async fn test_fails_only_the_nth_insert() {
        let inner: Arc<dyn DatabaseBackend> = Arc::new(SqliteBackend::memory().unwrap());
        inner.execute("CREATE TABLE t (x INTEGER)", &[]).await.unwrap();
        let faulty = FaultyBackend::new(
            inner,
            Fault::Fail {
                nth: 2,
                transient: false,
            },
        );
        let insert = [Statement::new("INSERT INTO t VALUES (?1)", vec![Value::Integer(1)])];
        assert!(faulty.execute_transaction(&insert).await.is_ok());
        let err = faulty.execute_transaction(&insert).await.unwrap_err();
        assert_eq!(err.code(), "TARGET_ERROR");
        assert!(faulty.execute_transaction(&insert).await.is_ok());
        assert_eq!(faulty.inserts(), 3);

        let rows = faulty.query("SELECT COUNT(*) AS n FROM t", &[]).await.unwrap();
        assert_eq!(rows[0].get::<i64>("n").unwrap(), 2);
    }

    #[tokio::test]
    async fn test_tampering_host_writes_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.db");
        touch_database(&path).unwrap();
        let host = TamperingHost::new(&path);
        host.free_disk_bytes(dir.path()).await.unwrap();
        host.free_disk_bytes(dir.path()).await.unwrap();
        let conn = rusqlite::Connection::open(&path).unwrap();
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM touched", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 2);
    }
}
