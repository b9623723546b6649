//! Backup artifacts and their on-disk naming.
//!
//! An artifact is a file named `{source_basename}.{YYYYMMDD_HHMMSS}` (plus
//! `-N` when two backups of the same source land in the same second) with a
//! `{artifact}.sha256` file beside it in `sha256sum` format.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use etl_rs_core::utils::fs::with_suffix;
use etl_rs_core::{EtlError, EtlResult};
use serde::{Deserialize, Serialize};

/// Layout of the timestamp embedded in artifact names.
pub const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Suffix of the checksum file written beside each artifact.
pub const CHECKSUM_SUFFIX: &str = ".sha256";

/// How an artifact was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupMethod {
    /// Byte-for-byte copy of a quiescent file.
    FileCopy,
    /// `SQLite` online backup API (the source had a live WAL).
    OnlineBackup,
    /// Produced elsewhere and registered with [`adopt`](crate::BackupManager::adopt).
    Adopted,
}

/// A timestamped, checksum-verified copy of a database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupArtifact {
    /// Path of the artifact file.
    pub path: PathBuf,
    /// Basename of the database the artifact was taken from.
    pub source_basename: String,
    /// Lowercase hex SHA-256 of the artifact contents.
    pub sha256: String,
    /// Size in bytes.
    pub size: u64,
    /// Moment the backup was taken.
    pub created_at: DateTime<Utc>,
    /// How the artifact was produced.
    pub method: BackupMethod,
}

impl BackupArtifact {
    /// Path of the co-located checksum file.
    pub fn checksum_path(&self) -> PathBuf {
        checksum_path(&self.path)
    }

    /// File name of the artifact.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Age of the artifact at `now`.
    pub fn age_at(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.created_at)
    }
}

/// Checksum file of an artifact path.
pub fn checksum_path(artifact: &Path) -> PathBuf {
    with_suffix(artifact, CHECKSUM_SUFFIX)
}

/// `{basename}.{YYYYMMDD_HHMMSS}`, with `-{seq}` appended when `seq > 0`.
pub fn artifact_name(basename: &str, at: DateTime<Utc>, seq: u32) -> String {
    let stamp = at.format(STAMP_FORMAT);
    if seq == 0 {
        format!("{basename}.{stamp}")
    } else {
        format!("{basename}.{stamp}-{seq}")
    }
}

/// Splits an artifact file name into its source basename and timestamp.
///
/// Returns `None` for names that do not follow the artifact layout.
///
/// ```
/// use etl_rs_backup::artifact::parse_artifact_name;
///
/// let (base, at) = parse_artifact_name("shop.db.20240105_130405-2").unwrap();
/// assert_eq!(base, "shop.db");
/// assert_eq!(at.format("%H:%M:%S").to_string(), "13:04:05");
/// assert!(parse_artifact_name("shop.db").is_none());
/// ```
pub fn parse_artifact_name(name: &str) -> Option<(String, DateTime<Utc>)> {
    let (base, stamp) = name.rsplit_once('.')?;
    if base.is_empty() {
        return None;
    }
    let stamp = match stamp.split_once('-') {
        Some((s, seq)) if !seq.is_empty() && seq.bytes().all(|b| b.is_ascii_digit()) => s,
        Some(_) => return None,
        None => stamp,
    };
    let at = NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT).ok()?;
    Some((base.to_string(), at.and_utc()))
}

/// Renders a checksum file line in `sha256sum` format.
pub fn checksum_line(sha256: &str, file_name: &str) -> String {
    format!("{sha256}  {file_name}\n")
}

/// Parses a `sha256sum`-format checksum file, returning the digest.
pub fn parse_checksum_line(content: &str) -> EtlResult<String> {
    let digest = content
        .split_whitespace()
        .next()
        .filter(|d| d.len() == 64 && d.bytes().all(|b| b.is_ascii_hexdigit()))
        .ok_or_else(|| EtlError::Integrity("malformed checksum file".into()))?;
    Ok(digest.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 5, 13, 4, 5).unwrap()
    }

    #[test]
    fn test_artifact_name() {
        assert_eq!(artifact_name("src.db", at(), 0), "src.db.20240105_130405");
        assert_eq!(artifact_name("src.db", at(), 3), "src.db.20240105_130405-3");
    }

    #[test]
    fn test_parse_artifact_name_roundtrip() {
        let (base, parsed) = parse_artifact_name(&artifact_name("a.b.db", at(), 1)).unwrap();
        assert_eq!(base, "a.b.db");
        assert_eq!(parsed, at());
    }

    #[test]
    fn test_parse_rejects_foreign_names() {
        assert!(parse_artifact_name("src.db.sha256").is_none());
        assert!(parse_artifact_name("src.db.20240105_130405-x").is_none());
        assert!(parse_artifact_name(".20240105_130405").is_none());
    }

    #[test]
    fn test_checksum_line() {
        let digest = "a".repeat(64);
        let line = checksum_line(&digest, "x.db.20240105_130405");
        assert_eq!(line, format!("{digest}  x.db.20240105_130405\n"));
        assert_eq!(parse_checksum_line(&line).unwrap(), digest);
    }

    #[test]
    fn test_malformed_checksum_file() {
        assert!(matches!(
            parse_checksum_line("not-a-digest  file"),
            Err(EtlError::Integrity(_))
        ));
        assert!(parse_checksum_line("").is_err());
    }

    #[test]
    fn test_age() {
        let artifact = BackupArtifact {
            path: PathBuf::from("/b/x.db.20240105_130405"),
            source_basename: "x.db".into(),
            sha256: String::new(),
            size: 0,
            created_at: at(),
            method: BackupMethod::FileCopy,
        };
        assert_eq!(artifact.age_at(at() + chrono::Duration::days(8)).num_days(), 8);
        assert_eq!(
            artifact.checksum_path(),
            PathBuf::from("/b/x.db.20240105_130405.sha256")
        );
    }
}
