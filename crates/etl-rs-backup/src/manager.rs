//! The backup/restore manager.
//!
//! Every write goes to `{artifact}.partial` first and is renamed into place
//! once synced and hashed, so a crash never leaves a file that looks like a
//! finished artifact. Sources are only ever opened for reading.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use etl_rs_core::settings::PathSettings;
use etl_rs_core::utils::fs::{remove_if_exists, with_suffix};
use etl_rs_core::utils::sha256_file;
use etl_rs_core::{EtlError, EtlResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::artifact::{
    artifact_name, checksum_line, checksum_path, parse_artifact_name, parse_checksum_line,
    BackupArtifact, BackupMethod, CHECKSUM_SUFFIX,
};

const PARTIAL_SUFFIX: &str = ".partial";
const COPY_CHUNK: usize = 64 * 1024;

/// Outcome of a retention sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Artifacts deleted.
    pub removed: Vec<PathBuf>,
    /// Artifacts inside the retention window.
    pub kept: Vec<PathBuf>,
    /// Expired artifacts skipped because an active run references them.
    pub protected: Vec<PathBuf>,
    /// Leftover `.partial` files from interrupted backups that were deleted.
    pub orphans: Vec<PathBuf>,
    /// Deletions that failed, with the reason.
    pub errors: Vec<String>,
}

/// Creates, verifies, restores and sweeps backup artifacts in one directory.
#[derive(Debug, Clone)]
pub struct BackupManager {
    backup_dir: PathBuf,
}

impl BackupManager {
    /// A manager storing artifacts in `backup_dir`.
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
        }
    }

    /// A manager for the configured backup directory.
    pub fn from_settings(paths: &PathSettings) -> Self {
        Self::new(&paths.backup_dir)
    }

    /// The directory holding the artifacts.
    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Copies `source` to a new timestamped artifact and records its checksum.
    ///
    /// A quiescent file is copied byte for byte. A source with a non-empty
    /// `-wal` file is copied through the `SQLite` online backup API so the
    /// artifact includes committed WAL frames.
    pub async fn backup(&self, source: &Path) -> EtlResult<BackupArtifact> {
        let source = source.to_path_buf();
        let dir = self.backup_dir.clone();
        blocking(move || backup_blocking(&dir, &source)).await
    }

    /// Registers a file produced elsewhere (a target dump) as an artifact
    /// named after `basename`. The file is moved into the backup directory.
    pub async fn adopt(&self, produced: &Path, basename: &str) -> EtlResult<BackupArtifact> {
        let produced = produced.to_path_buf();
        let basename = basename.to_string();
        let dir = self.backup_dir.clone();
        blocking(move || adopt_blocking(&dir, &produced, &basename)).await
    }

    /// Returns `true` if the artifact's contents still match both the
    /// checksum file and the recorded digest.
    pub async fn verify(&self, artifact: &BackupArtifact) -> EtlResult<bool> {
        let artifact = artifact.clone();
        blocking(move || verify_blocking(&artifact)).await
    }

    /// Returns `true` if `source` currently has the same contents as the
    /// artifact.
    pub async fn verify_against_source(
        &self,
        source: &Path,
        artifact: &BackupArtifact,
    ) -> EtlResult<bool> {
        if !self.verify(artifact).await? {
            return Ok(false);
        }
        let source = source.to_path_buf();
        let current = blocking(move || Ok(sha256_file(&source)?)).await?;
        Ok(current == artifact.sha256)
    }

    /// Restores `artifact` over `dest`.
    ///
    /// The checksum is verified first; a mismatch fails with
    /// [`EtlError::Integrity`] and leaves `dest` untouched. The copy is
    /// written beside `dest` and renamed over it.
    pub async fn restore(&self, artifact: &BackupArtifact, dest: &Path) -> EtlResult<()> {
        let artifact = artifact.clone();
        let dest = dest.to_path_buf();
        blocking(move || restore_blocking(&artifact, &dest)).await
    }

    /// Lists every artifact in the backup directory, oldest first.
    ///
    /// The production method is not stored on disk, so listed artifacts
    /// report [`BackupMethod::FileCopy`].
    pub async fn list(&self) -> EtlResult<Vec<BackupArtifact>> {
        let dir = self.backup_dir.clone();
        blocking(move || list_blocking(&dir)).await
    }

    /// Deletes artifacts older than `retention_days`, skipping any path in
    /// `protected`.
    pub async fn sweep(
        &self,
        retention_days: u32,
        protected: &HashSet<PathBuf>,
    ) -> EtlResult<SweepReport> {
        self.sweep_at(Utc::now(), retention_days, protected).await
    }

    /// [`sweep`](Self::sweep) evaluated at a fixed instant.
    pub async fn sweep_at(
        &self,
        now: DateTime<Utc>,
        retention_days: u32,
        protected: &HashSet<PathBuf>,
    ) -> EtlResult<SweepReport> {
        let dir = self.backup_dir.clone();
        let protected = protected.clone();
        blocking(move || sweep_blocking(&dir, now, retention_days, &protected)).await
    }
}

async fn blocking<T, F>(f: F) -> EtlResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> EtlResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| EtlError::Io(std::io::Error::other(format!("Task join error: {e}"))))?
}

fn basename_of(path: &Path) -> EtlResult<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| EtlError::Configuration(format!("{} has no file name", path.display())))
}

/// Picks a free artifact path for `basename` at `at`, appending `-N` when
/// the plain name is taken.
fn reserve_path(dir: &Path, basename: &str, at: DateTime<Utc>) -> PathBuf {
    let mut seq = 0;
    loop {
        let candidate = dir.join(artifact_name(basename, at, seq));
        let taken = candidate.exists()
            || checksum_path(&candidate).exists()
            || with_suffix(&candidate, PARTIAL_SUFFIX).exists();
        if !taken {
            return candidate;
        }
        seq += 1;
    }
}

fn wal_has_frames(source: &Path) -> bool {
    std::fs::metadata(with_suffix(source, "-wal")).is_ok_and(|m| m.len() > 0)
}

/// Streams `from` into a freshly created `to`, hashing on the way.
fn copy_hashing(from: &Path, to: &Path) -> std::io::Result<(String, u64)> {
    let mut input = File::open(from)?;
    let mut output = OpenOptions::new().write(true).create_new(true).open(to)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; COPY_CHUNK];
    let mut size = 0u64;
    loop {
        let n = input.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        output.write_all(&buf[..n])?;
        size += n as u64;
    }
    output.sync_all()?;
    Ok((format!("{:x}", hasher.finalize()), size))
}

fn online_backup(source: &Path, to: &Path) -> EtlResult<()> {
    let src = rusqlite::Connection::open_with_flags(
        source,
        rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| EtlError::Database(format!("cannot open {}: {e}", source.display())))?;
    let mut dst = rusqlite::Connection::open(to)
        .map_err(|e| EtlError::Database(format!("cannot create {}: {e}", to.display())))?;
    {
        let backup = rusqlite::backup::Backup::new(&src, &mut dst)
            .map_err(|e| EtlError::Database(format!("online backup init failed: {e}")))?;
        backup
            .run_to_completion(256, Duration::from_millis(10), None)
            .map_err(|e| EtlError::Database(format!("online backup failed: {e}")))?;
    }
    let check: String = dst
        .query_row("PRAGMA quick_check", [], |r| r.get(0))
        .map_err(|e| EtlError::Database(format!("backup quick_check failed: {e}")))?;
    if check != "ok" {
        return Err(EtlError::Integrity(format!(
            "backup of {} failed quick_check: {check}",
            source.display()
        )));
    }
    dst.execute_batch("PRAGMA journal_mode=DELETE;")
        .map_err(|e| EtlError::Database(format!("backup finalize failed: {e}")))?;
    Ok(())
}

/// Renames a finished partial into place and writes its checksum file.
/// Removes what a failed operation left at `path`, logging a failure to
/// do so.
fn discard(path: &Path) {
    if let Err(e) = remove_if_exists(path) {
        tracing::warn!(path = %path.display(), error = %e, "Could not remove leftover file");
    }
}

fn commit_artifact(partial: &Path, path: &Path, sha256: &str) -> std::io::Result<()> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    std::fs::rename(partial, path)?;
    etl_rs_core::utils::fs::write_atomic(&checksum_path(path), checksum_line(sha256, &name).as_bytes())
}

fn backup_blocking(dir: &Path, source: &Path) -> EtlResult<BackupArtifact> {
    let meta = std::fs::metadata(source).map_err(|e| {
        EtlError::Configuration(format!("cannot read backup source {}: {e}", source.display()))
    })?;
    if !meta.is_file() {
        return Err(EtlError::Configuration(format!(
            "backup source {} is not a file",
            source.display()
        )));
    }
    std::fs::create_dir_all(dir)?;

    let basename = basename_of(source)?;
    let created_at = Utc::now();
    let path = reserve_path(dir, &basename, created_at);
    let partial = with_suffix(&path, PARTIAL_SUFFIX);

    let method = if wal_has_frames(source) {
        BackupMethod::OnlineBackup
    } else {
        BackupMethod::FileCopy
    };

    let result = (|| -> EtlResult<(String, u64)> {
        match method {
            BackupMethod::OnlineBackup => {
                online_backup(source, &partial)?;
                let size = std::fs::metadata(&partial)?.len();
                Ok((sha256_file(&partial)?, size))
            }
            _ => {
                let (sha256, size) = copy_hashing(source, &partial)?;
                let after = std::fs::metadata(source)?;
                if after.len() != meta.len() || after.modified().ok() != meta.modified().ok() {
                    return Err(EtlError::Integrity(format!(
                        "{} changed while it was being copied",
                        source.display()
                    )));
                }
                Ok((sha256, size))
            }
        }
    })()
    .and_then(|(sha256, size)| {
        commit_artifact(&partial, &path, &sha256)?;
        Ok((sha256, size))
    });

    let (sha256, size) = match result {
        Ok(v) => v,
        Err(e) => {
            discard(&partial);
            discard(&path);
            return Err(e);
        }
    };

    tracing::info!(
        source = %source.display(),
        artifact = %path.display(),
        size,
        method = ?method,
        "Backup created"
    );

    Ok(BackupArtifact {
        path,
        source_basename: basename,
        sha256,
        size,
        created_at,
        method,
    })
}

fn adopt_blocking(dir: &Path, produced: &Path, basename: &str) -> EtlResult<BackupArtifact> {
    if !produced.is_file() {
        return Err(EtlError::Configuration(format!(
            "cannot adopt {}: not a file",
            produced.display()
        )));
    }
    std::fs::create_dir_all(dir)?;
    let created_at = Utc::now();
    let path = reserve_path(dir, basename, created_at);
    let partial = with_suffix(&path, PARTIAL_SUFFIX);

    let result = (|| -> EtlResult<(String, u64)> {
        if std::fs::rename(produced, &partial).is_err() {
            // Different filesystem: copy, then drop the original.
            let copied = copy_hashing(produced, &partial)?;
            std::fs::remove_file(produced)?;
            commit_artifact(&partial, &path, &copied.0)?;
            return Ok(copied);
        }
        let sha256 = sha256_file(&partial)?;
        let size = std::fs::metadata(&partial)?.len();
        commit_artifact(&partial, &path, &sha256)?;
        Ok((sha256, size))
    })();

    if result.is_err() {
        discard(&partial);
    }
    let (sha256, size) = result?;

    tracing::info!(artifact = %path.display(), size, "Adopted external backup");

    Ok(BackupArtifact {
        path,
        source_basename: basename.to_string(),
        sha256,
        size,
        created_at,
        method: BackupMethod::Adopted,
    })
}

fn verify_blocking(artifact: &BackupArtifact) -> EtlResult<bool> {
    let recorded = match std::fs::read_to_string(artifact.checksum_path()) {
        Ok(content) => parse_checksum_line(&content)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    let actual = match sha256_file(&artifact.path) {
        Ok(digest) => digest,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    Ok(recorded == actual && actual == artifact.sha256)
}

fn restore_blocking(artifact: &BackupArtifact, dest: &Path) -> EtlResult<()> {
    if !verify_blocking(artifact)? {
        return Err(EtlError::Integrity(format!(
            "checksum mismatch for backup {}; refusing to restore",
            artifact.path.display()
        )));
    }
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let partial = with_suffix(dest, ".restore.partial");
    remove_if_exists(&partial)?;

    let result = (|| -> EtlResult<()> {
        let (sha256, _) = copy_hashing(&artifact.path, &partial)?;
        if sha256 != artifact.sha256 {
            return Err(EtlError::Integrity(format!(
                "backup {} changed while it was being restored",
                artifact.path.display()
            )));
        }
        // A stale WAL would be replayed over the restored pages.
        remove_if_exists(&with_suffix(dest, "-wal"))?;
        remove_if_exists(&with_suffix(dest, "-shm"))?;
        std::fs::rename(&partial, dest)?;
        Ok(())
    })();
    if result.is_err() {
        discard(&partial);
    }
    result?;

    tracing::info!(
        artifact = %artifact.path.display(),
        dest = %dest.display(),
        "Backup restored"
    );
    Ok(())
}

fn read_artifact(path: &Path) -> EtlResult<Option<BackupArtifact>> {
    let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
        return Ok(None);
    };
    let Some((source_basename, created_at)) = parse_artifact_name(&name) else {
        return Ok(None);
    };
    let sidecar = match std::fs::read_to_string(checksum_path(path)) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let sha256 = parse_checksum_line(&sidecar)?;
    let size = std::fs::metadata(path)?.len();
    Ok(Some(BackupArtifact {
        path: path.to_path_buf(),
        source_basename,
        sha256,
        size,
        created_at,
        method: BackupMethod::FileCopy,
    }))
}

fn list_blocking(dir: &Path) -> EtlResult<Vec<BackupArtifact>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut artifacts = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let name = path.to_string_lossy();
        if name.ends_with(CHECKSUM_SUFFIX) || name.ends_with(PARTIAL_SUFFIX) {
            continue;
        }
        match read_artifact(&path) {
            Ok(Some(artifact)) => artifacts.push(artifact),
            Ok(None) => {}
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable artifact"),
        }
    }
    artifacts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.path.cmp(&b.path)));
    Ok(artifacts)
}

fn sweep_blocking(
    dir: &Path,
    now: DateTime<Utc>,
    retention_days: u32,
    protected: &HashSet<PathBuf>,
) -> EtlResult<SweepReport> {
    let window = chrono::Duration::days(i64::from(retention_days));
    let mut report = SweepReport::default();

    for artifact in list_blocking(dir)? {
        if artifact.age_at(now) <= window {
            report.kept.push(artifact.path);
            continue;
        }
        if protected.contains(&artifact.path) {
            tracing::info!(artifact = %artifact.path.display(), "Expired backup is in use; keeping");
            report.protected.push(artifact.path);
            continue;
        }
        let removed = std::fs::remove_file(&artifact.path)
            .and_then(|()| remove_if_exists(&artifact.checksum_path()));
        match removed {
            Ok(()) => report.removed.push(artifact.path),
            Err(e) => report
                .errors
                .push(format!("{}: {e}", artifact.path.display())),
        }
    }

    if dir.exists() {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let is_orphan = path.to_string_lossy().ends_with(PARTIAL_SUFFIX)
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .and_then(|n| n.strip_suffix(PARTIAL_SUFFIX))
                    .and_then(parse_artifact_name)
                    .is_some_and(|(_, at)| now.signed_duration_since(at) > window);
            if is_orphan {
                match std::fs::remove_file(&path) {
                    Ok(()) => report.orphans.push(path),
                    Err(e) => report.errors.push(format!("{}: {e}", path.display())),
                }
            }
        }
    }

    tracing::info!(
        removed = report.removed.len(),
        kept = report.kept.len(),
        protected = report.protected.len(),
        "Backup sweep finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn make_db(path: &Path, rows: usize) {
        let conn = rusqlite::Connection::open(path).unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT);")
            .unwrap();
        for i in 0..rows {
            conn.execute("INSERT INTO t (v) VALUES (?1)", [format!("row-{i}")])
                .unwrap();
        }
    }

    fn fixture() -> (tempfile::TempDir, PathBuf, BackupManager) {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.db");
        make_db(&source, 50);
        let manager = BackupManager::new(dir.path().join("backups"));
        (dir, source, manager)
    }

    #[test]
    fn test_discard_survives_unremovable_leftover() {
        let dir = tempfile::tempdir().unwrap();
        let leftover = dir.path().join("artifact.partial");
        std::fs::create_dir(&leftover).unwrap();
        std::fs::write(leftover.join("inner"), b"x").unwrap();
        discard(&leftover);
        assert!(leftover.exists());
        let gone = dir.path().join("gone.partial");
        std::fs::write(&gone, b"x").unwrap();
        discard(&gone);
        assert!(!gone.exists());
        discard(&gone);
    }

    #[tokio::test]
    async fn test_backup_names_and_checksum_file() {
        let (_dir, source, manager) = fixture();
        let artifact = manager.backup(&source).await.unwrap();

        let name = artifact.file_name();
        assert!(name.starts_with("source.db."));
        assert_eq!(parse_artifact_name(&name).unwrap().0, "source.db");
        assert_eq!(artifact.method, BackupMethod::FileCopy);

        let sidecar = std::fs::read_to_string(artifact.checksum_path()).unwrap();
        assert_eq!(sidecar, format!("{}  {name}\n", artifact.sha256));
        assert_eq!(artifact.sha256, sha256_file(&source).unwrap());
        assert!(!with_suffix(&artifact.path, PARTIAL_SUFFIX).exists());
    }

    #[tokio::test]
    async fn test_backup_never_modifies_source() {
        let (_dir, source, manager) = fixture();
        let before = sha256_file(&source).unwrap();
        manager.backup(&source).await.unwrap();
        assert_eq!(sha256_file(&source).unwrap(), before);
    }

    #[tokio::test]
    async fn test_restore_roundtrip_is_byte_identical() {
        let (dir, source, manager) = fixture();
        let original = std::fs::read(&source).unwrap();
        let artifact = manager.backup(&source).await.unwrap();

        let dest = dir.path().join("restored.db");
        manager.restore(&artifact, &dest).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), original);
    }

    #[tokio::test]
    async fn test_restore_replaces_existing_file() {
        let (dir, source, manager) = fixture();
        let artifact = manager.backup(&source).await.unwrap();
        let dest = dir.path().join("target.db");
        make_db(&dest, 3);
        std::fs::write(with_suffix(&dest, "-wal"), b"stale").unwrap();

        manager.restore(&artifact, &dest).await.unwrap();
        assert_eq!(sha256_file(&dest).unwrap(), artifact.sha256);
        assert!(!with_suffix(&dest, "-wal").exists());
    }

    #[tokio::test]
    async fn test_restore_rejects_tampered_artifact() {
        let (dir, source, manager) = fixture();
        let artifact = manager.backup(&source).await.unwrap();
        let mut bytes = std::fs::read(&artifact.path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&artifact.path, bytes).unwrap();

        let dest = dir.path().join("dest.db");
        std::fs::write(&dest, b"keep me").unwrap();
        let err = manager.restore(&artifact, &dest).await.unwrap_err();
        assert!(matches!(err, EtlError::Integrity(_)));
        assert_eq!(std::fs::read(&dest).unwrap(), b"keep me");
    }

    #[tokio::test]
    async fn test_verify_and_verify_against_source() {
        let (_dir, source, manager) = fixture();
        let artifact = manager.backup(&source).await.unwrap();
        assert!(manager.verify(&artifact).await.unwrap());
        assert!(manager.verify_against_source(&source, &artifact).await.unwrap());

        {
            let conn = rusqlite::Connection::open(&source).unwrap();
            conn.execute("INSERT INTO t (v) VALUES ('later')", []).unwrap();
        }
        assert!(manager.verify(&artifact).await.unwrap());
        assert!(!manager.verify_against_source(&source, &artifact).await.unwrap());

        std::fs::remove_file(artifact.checksum_path()).unwrap();
        assert!(!manager.verify(&artifact).await.unwrap());
    }

    #[tokio::test]
    async fn test_same_second_backups_get_suffix() {
        let (_dir, source, manager) = fixture();
        let mut names = HashSet::new();
        for _ in 0..3 {
            let artifact = manager.backup(&source).await.unwrap();
            assert!(names.insert(artifact.file_name()));
        }
        assert_eq!(manager.list().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_backup_of_wal_source_includes_uncheckpointed_rows() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("live.db");
        let conn = rusqlite::Connection::open(&source).unwrap();
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA wal_autocheckpoint=0;
             CREATE TABLE t (v TEXT); INSERT INTO t VALUES ('a'), ('b');",
        )
        .unwrap();

        let manager = BackupManager::new(dir.path().join("backups"));
        let artifact = manager.backup(&source).await.unwrap();
        assert_eq!(artifact.method, BackupMethod::OnlineBackup);
        assert!(manager.verify(&artifact).await.unwrap());

        let copy = rusqlite::Connection::open(&artifact.path).unwrap();
        let n: i64 = copy.query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0)).unwrap();
        assert_eq!(n, 2);
        drop(conn);
    }

    #[tokio::test]
    async fn test_missing_source_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let manager = BackupManager::new(dir.path());
        let err = manager.backup(&dir.path().join("nope.db")).await.unwrap_err();
        assert!(matches!(err, EtlError::Configuration(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unwritable_backup_dir_is_io_error() {
        use std::os::unix::fs::PermissionsExt;

        let (dir, source, _) = fixture();
        let locked = dir.path().join("locked");
        std::fs::create_dir(&locked).unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o500)).unwrap();
        // Root ignores directory permissions.
        if std::fs::write(locked.join("probe"), b"").is_ok() {
            return;
        }
        let err = BackupManager::new(&locked).backup(&source).await.unwrap_err();
        assert_eq!(err.code(), "IO_ERROR");
    }

    #[tokio::test]
    async fn test_adopt_moves_file_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let produced = dir.path().join("dump.tmp");
        std::fs::write(&produced, b"pg dump bytes").unwrap();
        let manager = BackupManager::new(dir.path().join("backups"));

        let artifact = manager.adopt(&produced, "target-shop").await.unwrap();
        assert!(!produced.exists());
        assert_eq!(artifact.method, BackupMethod::Adopted);
        assert!(artifact.file_name().starts_with("target-shop."));
        assert!(manager.verify(&artifact).await.unwrap());
    }

    fn plant(dir: &Path, basename: &str, at: DateTime<Utc>) -> PathBuf {
        std::fs::create_dir_all(dir).unwrap();
        let path = dir.join(artifact_name(basename, at, 0));
        std::fs::write(&path, b"data").unwrap();
        let digest = etl_rs_core::utils::sha256_hex(b"data");
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        std::fs::write(checksum_path(&path), checksum_line(&digest, &name)).unwrap();
        path
    }

    #[tokio::test]
    async fn test_sweep_honours_window_and_protection() {
        let dir = tempfile::tempdir().unwrap();
        let backups = dir.path().join("backups");
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let fresh = plant(&backups, "a.db", now - chrono::Duration::days(2));
        let old = plant(&backups, "b.db", now - chrono::Duration::days(30));
        let in_use = plant(&backups, "c.db", now - chrono::Duration::days(30));
        let orphan = with_suffix(
            &backups.join(artifact_name("d.db", now - chrono::Duration::days(30), 0)),
            PARTIAL_SUFFIX,
        );
        std::fs::write(&orphan, b"half").unwrap();

        let manager = BackupManager::new(&backups);
        let protected: HashSet<PathBuf> = [in_use.clone()].into_iter().collect();
        let report = manager.sweep_at(now, 7, &protected).await.unwrap();

        assert_eq!(report.removed, vec![old.clone()]);
        assert_eq!(report.kept, vec![fresh.clone()]);
        assert_eq!(report.protected, vec![in_use.clone()]);
        assert_eq!(report.orphans, vec![orphan.clone()]);
        assert!(report.errors.is_empty());
        assert!(!old.exists() && !checksum_path(&old).exists());
        assert!(fresh.exists() && in_use.exists() && !orphan.exists());
    }

    #[tokio::test]
    async fn test_list_ignores_files_without_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let kept = plant(dir.path(), "a.db", now);
        std::fs::write(dir.path().join(artifact_name("b.db", now, 0)), b"x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let listed = BackupManager::new(dir.path()).list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].path, kept);
    }
}
