//! Exclusive lock files.
//!
//! A lock is a file created with `create_new`, holding the owner's pid, the
//! run id and the acquisition time. Dropping the guard removes the file. A
//! lock whose owner process no longer exists is stale: it is archived beside
//! the lock and replaced.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use etl_rs_core::utils::sha256_hex;
use etl_rs_core::{EtlError, EtlResult};
use serde::{Deserialize, Serialize};

/// What a lock file records about its holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    /// Process holding the lock.
    pub pid: u32,
    /// Run the lock was taken for; 0 for locks outside any run.
    pub run_id: u64,
    /// What the lock guards, as shown in contention errors.
    pub purpose: String,
    pub acquired_at: DateTime<Utc>,
}

/// A held lock file. Released on drop.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
    released: bool,
}

impl LockFile {
    /// Takes the lock at `path`, failing at once if a live holder has it.
    pub fn acquire(path: &Path, run_id: u64, purpose: &str) -> EtlResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let info = LockInfo {
            pid: std::process::id(),
            run_id,
            purpose: purpose.to_string(),
            acquired_at: Utc::now(),
        };
        // One retry: the first attempt may find a stale lock to archive.
        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    file.write_all(serde_json::to_string_pretty(&info)?.as_bytes())?;
                    file.sync_all()?;
                    return Ok(Self {
                        path: path.to_path_buf(),
                        released: false,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    let holder = fs::read_to_string(path)
                        .ok()
                        .and_then(|c| serde_json::from_str::<LockInfo>(&c).ok());
                    match holder {
                        Some(h) if pid_is_alive(h.pid) => {
                            return Err(EtlError::Environment(format!(
                                "{} is held by run {} (pid {}) since {}; remove {} if that process is gone",
                                purpose,
                                h.run_id,
                                h.pid,
                                h.acquired_at.to_rfc3339(),
                                path.display()
                            )));
                        }
                        Some(_) => archive(path, "stale")?,
                        None => archive(path, "corrupt")?,
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(EtlError::Environment(format!(
            "could not acquire {}",
            path.display()
        )))
    }

    /// Retries [`acquire`](Self::acquire) until `wait` has passed, blocking
    /// the calling thread in between.
    pub fn acquire_within(path: &Path, run_id: u64, purpose: &str, wait: Duration) -> EtlResult<Self> {
        let deadline = Instant::now() + wait;
        loop {
            match Self::acquire(path, run_id, purpose) {
                Ok(lock) => return Ok(lock),
                Err(EtlError::Environment(_)) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(20));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the lock file.
    pub fn release(mut self) -> EtlResult<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> EtlResult<()> {
        if !self.released {
            self.released = true;
            match fs::remove_file(&self.path) {
                Err(e) if e.kind() != ErrorKind::NotFound => return Err(e.into()),
                _ => {}
            }
        }
        Ok(())
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = self.release_inner();
    }
}

fn archive(path: &Path, reason: &str) -> EtlResult<()> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let archived = path.with_file_name(format!(
        "{name}.{reason}.{}.json",
        Utc::now().timestamp_millis()
    ));
    tracing::warn!(lock = %path.display(), archived = %archived.display(), "Replacing {reason} lock");
    match fs::rename(path, archived) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

#[cfg(target_os = "linux")]
fn pid_is_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(not(target_os = "linux"))]
const fn pid_is_alive(_pid: u32) -> bool {
    true
}

/// Serializes migration runs against one target.
#[derive(Debug)]
pub struct RunLock {
    inner: LockFile,
    identity: String,
}

impl RunLock {
    /// Path of the lock for target `identity` under `state_dir`.
    pub fn path_for(state_dir: &Path, identity: &str) -> PathBuf {
        let key = &sha256_hex(identity.as_bytes())[..16];
        state_dir.join("locks").join(format!("target-{key}.lock"))
    }

    /// Takes the run lock for target `identity`.
    pub fn acquire(state_dir: &Path, identity: &str, run_id: u64) -> EtlResult<Self> {
        let inner = LockFile::acquire(
            &Self::path_for(state_dir, identity),
            run_id,
            &format!("run lock for {identity}"),
        )?;
        tracing::debug!(target = identity, run_id, "Run lock acquired");
        Ok(Self {
            inner,
            identity: identity.to_string(),
        })
    }

    /// Identity of the locked target.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    /// Releases the lock.
    pub fn release(self) -> EtlResult<()> {
        self.inner.release()
    }
}
