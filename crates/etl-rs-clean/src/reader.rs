//! Streams rows out of a cleaned snapshot.
//!
//! Pages are keyed by `rowid` (keyset pagination), so each page is an index
//! seek regardless of how far into the table the caller is.

use std::sync::Arc;

use etl_rs_core::{EtlError, EtlResult};
use etl_rs_db::sqlite::{db_err, from_value_ref, open_read_only, row_count};
use etl_rs_db::{quote_ident, TableSpec, Value};
use tokio::sync::Mutex;

use crate::snapshot::CleanedSnapshot;

/// One page of rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    /// Rows in `rowid` order, values in spec column order.
    pub rows: Vec<Vec<Value>>,
    /// `rowid` of the last row, the cursor for the next page.
    pub last_rowid: Option<i64>,
}

impl Page {
    /// Returns `true` if the page holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Read-only access to a cleaned snapshot.
#[derive(Clone)]
pub struct CleanedReader {
    conn: Arc<Mutex<rusqlite::Connection>>,
}

impl std::fmt::Debug for CleanedReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanedReader").finish_non_exhaustive()
    }
}

fn join_err(e: &tokio::task::JoinError) -> EtlError {
    EtlError::Database(format!("Task join error: {e}"))
}

impl CleanedReader {
    /// Opens `snapshot` read-only.
    pub fn open(snapshot: &CleanedSnapshot) -> EtlResult<Self> {
        let conn = open_read_only(&snapshot.path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Rows in `table`.
    pub async fn count(&self, table: &str) -> EtlResult<u64> {
        let conn = Arc::clone(&self.conn);
        let table = table.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            row_count(&conn, &table)
        })
        .await
        .map_err(|e| join_err(&e))?
    }

    /// Up to `limit` rows of `spec`'s table with `rowid` greater than
    /// `after` (or from the start).
    pub async fn page(&self, spec: &TableSpec, after: Option<i64>, limit: usize) -> EtlResult<Page> {
        let conn = Arc::clone(&self.conn);
        let cols: Vec<String> = spec.columns.iter().map(|c| quote_ident(&c.name)).collect();
        let sql = format!(
            "SELECT rowid, {} FROM {} WHERE rowid > ?1 ORDER BY rowid LIMIT ?2",
            cols.join(", "),
            quote_ident(&spec.name)
        );
        let width = cols.len();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare(&sql).map_err(|e| db_err(&e))?;
            let mut rows = stmt
                .query(rusqlite::params![after.unwrap_or(i64::MIN), limit])
                .map_err(|e| db_err(&e))?;
            let mut page = Page::default();
            while let Some(row) = rows.next().map_err(|e| db_err(&e))? {
                let rowid: i64 = row.get(0).map_err(|e| db_err(&e))?;
                let mut values = Vec::with_capacity(width);
                for i in 1..=width {
                    values.push(from_value_ref(row.get_ref(i).map_err(|e| db_err(&e))?));
                }
                page.rows.push(values);
                page.last_rowid = Some(rowid);
            }
            Ok(page)
        })
        .await
        .map_err(|e| join_err(&e))?
    }
}
