//! Read-only handle on the source database.

use std::path::{Path, PathBuf};

use etl_rs_core::utils::sha256_file;
use etl_rs_core::{EtlError, EtlResult};
use serde::{Deserialize, Serialize};

/// The source file as it was when the run started.
///
/// Only ever opened read-only. The size and checksum taken at open time let
/// the pipeline prove at the end of a run that the source was not touched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSnapshot {
    path: PathBuf,
    size: u64,
    sha256: String,
}

impl SourceSnapshot {
    /// Opens the source, recording its size and SHA-256.
    pub async fn open(path: impl Into<PathBuf>) -> EtlResult<Self> {
        let path = path.into();
        let meta = tokio::fs::metadata(&path).await.map_err(|e| {
            EtlError::Configuration(format!("cannot read source {}: {e}", path.display()))
        })?;
        if !meta.is_file() {
            return Err(EtlError::Configuration(format!(
                "source {} is not a file",
                path.display()
            )));
        }
        let sha256 = hash(&path).await?;
        Ok(Self {
            path,
            size: meta.len(),
            sha256,
        })
    }

    /// Path of the source file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size in bytes at open time.
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// SHA-256 at open time.
    pub fn sha256(&self) -> &str {
        &self.sha256
    }

    /// Opens a read-only connection on the source.
    pub fn connect(&self) -> EtlResult<rusqlite::Connection> {
        crate::sqlite::open_read_only(&self.path)
    }

    /// Fails with [`EtlError::Integrity`] if the file changed since open.
    pub async fn verify_unchanged(&self) -> EtlResult<()> {
        let now = hash(&self.path).await?;
        if now == self.sha256 {
            Ok(())
        } else {
            Err(EtlError::Integrity(format!(
                "source {} changed during the run (sha256 {} -> {now})",
                self.path.display(),
                self.sha256
            )))
        }
    }
}

async fn hash(path: &Path) -> EtlResult<String> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || sha256_file(&owned))
        .await
        .map_err(|e| EtlError::Database(format!("Task join error: {e}")))?
        .map_err(EtlError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_db(path: &Path) {
        let conn = rusqlite::Connection::open(path).unwrap();
        conn.execute_batch("CREATE TABLE t (a TEXT); INSERT INTO t VALUES ('x');")
            .unwrap();
    }

    #[tokio::test]
    async fn test_open_records_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("src.db");
        make_db(&path);
        let snap = SourceSnapshot::open(&path).await.unwrap();
        assert_eq!(snap.sha256(), sha256_file(&path).unwrap());
        assert!(snap.size() > 0);
        snap.verify_unchanged().await.unwrap();
    }

    #[tokio::test]
    async fn test_reading_does_not_change_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("src.db");
        make_db(&path);
        let snap = SourceSnapshot::open(&path).await.unwrap();
        {
            let conn = snap.connect().unwrap();
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0)).unwrap();
            assert_eq!(n, 1);
        }
        snap.verify_unchanged().await.unwrap();
        assert!(!dir.path().join("src.db-wal").exists());
    }

    #[tokio::test]
    async fn test_detects_modification() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("src.db");
        make_db(&path);
        let snap = SourceSnapshot::open(&path).await.unwrap();
        {
            let conn = rusqlite::Connection::open(&path).unwrap();
            conn.execute("INSERT INTO t VALUES ('y')", []).unwrap();
        }
        assert!(matches!(
            snap.verify_unchanged().await,
            Err(EtlError::Integrity(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_source() {
        let err = SourceSnapshot::open("/nonexistent/src.db").await.unwrap_err();
        assert!(matches!(err, EtlError::Configuration(_)));
    }
}
