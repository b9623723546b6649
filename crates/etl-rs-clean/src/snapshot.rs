//! The Cleaned Snapshot and its manifest.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use etl_rs_core::utils::fs::{with_suffix, write_json_atomic};
use etl_rs_core::utils::sha256_file;
use etl_rs_core::{EtlError, EtlResult};
use etl_rs_db::TableSpec;
use serde::{Deserialize, Serialize};

/// Suffix of the manifest written beside a cleaned snapshot.
pub const MANIFEST_SUFFIX: &str = ".manifest.json";

/// Path of the manifest for `destination`.
pub fn manifest_path(destination: &Path) -> PathBuf {
    with_suffix(destination, MANIFEST_SUFFIX)
}

/// What cleaning did to one table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanStats {
    /// Rows written.
    pub rows: u64,
    /// Timestamps rewritten to the canonical layout.
    pub reencoded: u64,
    /// Empty strings replaced with NULL.
    pub empty_to_null: u64,
    /// Unparseable timestamps replaced with NULL.
    pub unparseable_to_null: u64,
}

impl CleanStats {
    /// Folds another table's stats into this one.
    pub fn merge(&mut self, other: &Self) {
        self.rows += other.rows;
        self.reencoded += other.reencoded;
        self.empty_to_null += other.empty_to_null;
        self.unparseable_to_null += other.unparseable_to_null;
    }
}

/// One cleaned table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanedTable {
    /// Resolved spec the rows conform to.
    pub spec: TableSpec,
    /// Cleaning statistics.
    pub stats: CleanStats,
    /// Order-independent digest over the canonical rendering of every row.
    pub digest: String,
    /// Cells per column set to NULL because no layout parsed them.
    #[serde(default)]
    pub nulled: BTreeMap<String, u64>,
    /// Columns the profiler left below the confidence floor.
    #[serde(default)]
    pub ambiguous: Vec<String>,
}

impl CleanedTable {
    /// A table with no per-column findings.
    pub fn new(spec: TableSpec, stats: CleanStats, digest: impl Into<String>) -> Self {
        Self {
            spec,
            stats,
            digest: digest.into(),
            nulled: BTreeMap::new(),
            ambiguous: Vec::new(),
        }
    }

    /// Table name.
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Cells of `column` that cleaning set to NULL as unparseable.
    pub fn nulled_in(&self, column: &str) -> u64 {
        self.nulled.get(column).copied().unwrap_or(0)
    }

    /// Whether the profiler left `column` below the confidence floor.
    pub fn is_ambiguous(&self, column: &str) -> bool {
        self.ambiguous.iter().any(|c| c == column)
    }
}

/// A cleaned copy of the source, described by its manifest.
///
/// Never mutated once written; a re-run writes a new file over it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanedSnapshot {
    pub path: PathBuf,
    pub source_checksum: String,
    pub sha256: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub tables: Vec<CleanedTable>,
}

impl CleanedSnapshot {
    /// Looks up a table.
    pub fn table(&self, name: &str) -> Option<&CleanedTable> {
        self.tables.iter().find(|t| t.spec.name == name)
    }

    /// Table names in load order.
    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.spec.name.clone()).collect()
    }

    /// Rows across every table.
    pub fn total_rows(&self) -> u64 {
        self.tables.iter().map(|t| t.stats.rows).sum()
    }

    /// Stats summed over every table.
    pub fn totals(&self) -> CleanStats {
        let mut total = CleanStats::default();
        for t in &self.tables {
            total.merge(&t.stats);
        }
        total
    }

    /// Path of this snapshot's manifest.
    pub fn manifest_path(&self) -> PathBuf {
        manifest_path(&self.path)
    }

    /// Writes the manifest atomically.
    pub fn write_manifest(&self) -> EtlResult<()> {
        write_json_atomic(&self.manifest_path(), self)
    }

    /// Loads the manifest written beside `destination` and checks the file
    /// against it.
    pub fn load(destination: &Path) -> EtlResult<Self> {
        let manifest = manifest_path(destination);
        let text = std::fs::read_to_string(&manifest).map_err(|e| {
            EtlError::Configuration(format!(
                "no cleaned snapshot at {} ({}: {e})",
                destination.display(),
                manifest.display()
            ))
        })?;
        let mut snapshot: Self = serde_json::from_str(&text)?;
        snapshot.path = destination.to_path_buf();
        snapshot.verify()?;
        Ok(snapshot)
    }

    /// Fails with [`EtlError::Integrity`] if the file no longer matches the
    /// recorded checksum.
    pub fn verify(&self) -> EtlResult<()> {
        let actual = sha256_file(&self.path).map_err(|e| {
            EtlError::Integrity(format!("cannot read cleaned snapshot {}: {e}", self.path.display()))
        })?;
        if actual == self.sha256 {
            Ok(())
        } else {
            Err(EtlError::Integrity(format!(
                "cleaned snapshot {} does not match its manifest (sha256 {} != {actual})",
                self.path.display(),
                self.sha256
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etl_rs_db::{ColumnSpec, LogicalType};

    fn snapshot(path: PathBuf, sha256: String) -> CleanedSnapshot {
        CleanedSnapshot {
            path,
            source_checksum: "src".into(),
            sha256,
            size: 4,
            created_at: Utc::now(),
            tables: vec![CleanedTable {
                nulled: BTreeMap::from([("a".to_string(), 2)]),
                ..CleanedTable::new(
                    TableSpec {
                        name: "t".into(),
                        columns: vec![ColumnSpec::new("a", LogicalType::Integer)],
                    },
                    CleanStats {
                        rows: 3,
                        reencoded: 1,
                        ..CleanStats::default()
                    },
                    "d",
                )
            }],
        }
    }

    #[test]
    fn test_manifest_round_trip_and_verify() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clean.db");
        std::fs::write(&path, b"data").unwrap();
        let s = snapshot(path.clone(), sha256_file(&path).unwrap());
        s.write_manifest().unwrap();
        assert!(dir.path().join("clean.db.manifest.json").exists());

        let loaded = CleanedSnapshot::load(&path).unwrap();
        assert_eq!(loaded, s);
        assert_eq!(loaded.total_rows(), 3);
        assert_eq!(loaded.totals().reencoded, 1);
        assert_eq!(loaded.table_names(), vec!["t"]);
        assert_eq!(loaded.tables[0].nulled_in("a"), 2);
        assert_eq!(loaded.tables[0].nulled_in("b"), 0);
        assert!(!loaded.tables[0].is_ambiguous("a"));
    }

    #[test]
    fn test_tampered_snapshot_fails_integrity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clean.db");
        std::fs::write(&path, b"data").unwrap();
        snapshot(path.clone(), sha256_file(&path).unwrap())
            .write_manifest()
            .unwrap();
        std::fs::write(&path, b"DATA").unwrap();
        let err = CleanedSnapshot::load(&path).unwrap_err();
        assert_eq!(err.code(), "INTEGRITY_ERROR");
    }

    #[test]
    fn test_missing_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let err = CleanedSnapshot::load(&dir.path().join("none.db")).unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");
    }
}
