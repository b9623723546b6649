//! Filesystem helpers for writes that must never be observed half-done.

use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Returns `path` with `suffix` appended to its file name.
///
/// ```
/// use std::path::Path;
/// use etl_rs_core::utils::fs::with_suffix;
///
/// assert_eq!(with_suffix(Path::new("/a/b.db"), ".partial"), Path::new("/a/b.db.partial"));
/// ```
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

/// Writes `bytes` to `{path}.partial`, syncs it, then renames it over `path`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let partial = with_suffix(path, ".partial");
    let result = (|| {
        let mut file = std::fs::File::create(&partial)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        std::fs::rename(&partial, path)
    })();
    if result.is_err() {
        let _ = std::fs::remove_file(&partial);
    }
    result
}

/// Serializes `value` as pretty JSON and writes it atomically.
pub fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> crate::EtlResult<()> {
    let json = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &json)?;
    Ok(())
}

/// Removes a file, treating "not found" as success.
pub fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
