//! `SQLite` support using `rusqlite`.
//!
//! Two roles live here:
//!
//! - [`SqliteBackend`] implements [`DatabaseBackend`] for a `SQLite` target,
//!   wrapping `rusqlite` in `tokio::task::spawn_blocking`.
//! - Free functions open and introspect the source and cleaned snapshots.
//!   [`open_read_only`] uses the `immutable=1` URI so the source file can
//!   never be written through the handle.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use etl_rs_core::{EtlError, EtlResult};
use rusqlite::types::ValueRef;
use rusqlite::{DatabaseName, OpenFlags};
use tokio::sync::Mutex;

use crate::base::{BackendType, DatabaseBackend, Statement};
use crate::row::Row;
use crate::schema::{ColumnInfo, TableSchema};
use crate::value::Value;

/// Maps a local `rusqlite` error (source or cleaned snapshot).
pub fn db_err(e: &rusqlite::Error) -> EtlError {
    EtlError::Database(e.to_string())
}

/// Maps a `rusqlite` error raised against a target. Busy and locked
/// databases are transient.
fn target_err(e: &rusqlite::Error) -> EtlError {
    let transient = matches!(
        e.sqlite_error_code(),
        Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
    );
    if transient {
        EtlError::transient(e.to_string())
    } else {
        EtlError::target(e.to_string())
    }
}

fn join_err(e: &tokio::task::JoinError) -> EtlError {
    EtlError::target(format!("Task join error: {e}"))
}

// ============================================================
// Opening and introspection
// ============================================================

fn immutable_uri(path: &Path) -> String {
    let raw = path.to_string_lossy();
    let mut escaped = String::with_capacity(raw.len() + 16);
    for c in raw.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            '?' => escaped.push_str("%3f"),
            '#' => escaped.push_str("%23"),
            other => escaped.push(other),
        }
    }
    format!("file:{escaped}?immutable=1")
}

/// Opens a database strictly read-only.
///
/// The file is opened through a `file:` URI with `immutable=1`, so `SQLite`
/// takes no locks and never creates journal or WAL files next to it.
pub fn open_read_only(path: &Path) -> EtlResult<rusqlite::Connection> {
    if !path.is_file() {
        return Err(EtlError::Configuration(format!(
            "database not found: {}",
            path.display()
        )));
    }
    rusqlite::Connection::open_with_flags(
        immutable_uri(path),
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| EtlError::Database(format!("cannot open {} read-only: {e}", path.display())))
}

/// Lists user tables, sorted by name.
pub fn list_tables(conn: &rusqlite::Connection) -> EtlResult<Vec<String>> {
    let mut stmt = conn
        .prepare(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\' \
             ORDER BY name",
        )
        .map_err(|e| db_err(&e))?;
    let names = stmt
        .query_map([], |r| r.get::<_, String>(0))
        .map_err(|e| db_err(&e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| db_err(&e))?;
    Ok(names)
}

/// Reads the declared schema of a table.
pub fn table_schema(conn: &rusqlite::Connection, table: &str) -> EtlResult<TableSchema> {
    let mut stmt = conn
        .prepare("SELECT name, type, \"notnull\", pk FROM pragma_table_info(?1) ORDER BY cid")
        .map_err(|e| db_err(&e))?;
    let columns = stmt
        .query_map([table], |r| {
            Ok(ColumnInfo {
                name: r.get(0)?,
                declared_type: r.get::<_, Option<String>>(1)?.unwrap_or_default(),
                not_null: r.get::<_, i64>(2)? != 0,
                primary_key: r.get::<_, i64>(3)? > 0,
            })
        })
        .map_err(|e| db_err(&e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| db_err(&e))?;
    if columns.is_empty() {
        return Err(EtlError::Database(format!("table '{table}' not found")));
    }
    Ok(TableSchema {
        name: table.to_string(),
        columns,
    })
}

/// Reads every user table's schema.
pub fn schemas(conn: &rusqlite::Connection) -> EtlResult<Vec<TableSchema>> {
    list_tables(conn)?
        .iter()
        .map(|t| table_schema(conn, t))
        .collect()
}

/// Counts the rows of a table.
pub fn row_count(conn: &rusqlite::Connection, table: &str) -> EtlResult<u64> {
    let n: i64 = conn
        .query_row(
            &format!("SELECT COUNT(*) FROM {}", crate::schema_editor::quote_ident(table)),
            [],
            |r| r.get(0),
        )
        .map_err(|e| db_err(&e))?;
    Ok(u64::try_from(n).unwrap_or(0))
}

/// Converts a borrowed `rusqlite` value.
pub fn from_value_ref(v: ValueRef<'_>) -> Value {
    match v {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(f) => Value::Real(f),
        ValueRef::Text(b) => Value::Text(String::from_utf8_lossy(b).into_owned()),
        ValueRef::Blob(b) => Value::Blob(b.to_vec()),
    }
}

/// Converts a [`Value`] into an owned `rusqlite` value. Booleans become 0/1
/// and temporal values their canonical text.
pub fn to_sql_value(v: &Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as Sql;
    match v {
        Value::Null => Sql::Null,
        Value::Integer(i) => Sql::Integer(*i),
        Value::Real(f) => Sql::Real(*f),
        Value::Text(s) => Sql::Text(s.clone()),
        Value::Blob(b) => Sql::Blob(b.clone()),
        Value::Boolean(b) => Sql::Integer(i64::from(*b)),
        Value::Date(_) | Value::Timestamp(_) => Sql::Text(v.to_string()),
    }
}

fn bind_params(stmt: &mut rusqlite::Statement<'_>, params: &[Value]) -> rusqlite::Result<()> {
    for (i, param) in params.iter().enumerate() {
        stmt.raw_bind_parameter(i + 1, to_sql_value(param))?;
    }
    Ok(())
}

fn run_statement(conn: &rusqlite::Connection, st: &Statement) -> rusqlite::Result<u64> {
    let mut stmt = conn.prepare(&st.sql)?;
    bind_params(&mut stmt, &st.params)?;
    let n = stmt.raw_execute()?;
    Ok(u64::try_from(n).unwrap_or(0))
}

// ============================================================
// Target backend
// ============================================================

/// A `SQLite` target backend.
///
/// All operations are serialized through an async mutex and run via
/// `spawn_blocking` to avoid blocking the runtime.
pub struct SqliteBackend {
    path: PathBuf,
    conn: Arc<Mutex<rusqlite::Connection>>,
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend").field("path", &self.path).finish()
    }
}

impl SqliteBackend {
    /// Opens (or creates) a `SQLite` database at the given path.
    ///
    /// If the path is `:memory:`, an in-memory database is created. WAL
    /// journal mode is enabled for file databases.
    pub fn open(path: impl Into<PathBuf>) -> EtlResult<Self> {
        let path = path.into();
        let conn = if path.to_str() == Some(":memory:") {
            rusqlite::Connection::open_in_memory()
        } else {
            rusqlite::Connection::open(&path)
        }
        .map_err(|e| EtlError::transient(format!("SQLite open failed: {e}")))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| EtlError::target(format!("Failed to set pragmas: {e}")))?;

        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory database.
    pub fn memory() -> EtlResult<Self> {
        Self::open(":memory:")
    }

    /// Returns the database file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes a consistent copy of the database to `dest` using the online
    /// backup API.
    pub async fn backup_to(&self, dest: &Path) -> EtlResult<()> {
        let conn = Arc::clone(&self.conn);
        let dest = dest.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.backup(DatabaseName::Main, &dest, None)
                .map_err(|e| EtlError::target(format!("online backup failed: {e}")))
        })
        .await
        .map_err(|e| join_err(&e))?
    }

    /// Replaces the database contents with the database at `src` using the
    /// online backup API.
    pub async fn restore_from(&self, src: &Path) -> EtlResult<()> {
        let conn = Arc::clone(&self.conn);
        let src = src.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            conn.restore(DatabaseName::Main, &src, None::<fn(rusqlite::backup::Progress)>)
                .map_err(|e| EtlError::target(format!("online restore failed: {e}")))
        })
        .await
        .map_err(|e| join_err(&e))?
    }

    fn convert_row(sqlite_row: &rusqlite::Row<'_>, column_names: &[String]) -> Row {
        let values = (0..column_names.len())
            .map(|i| sqlite_row.get_ref(i).map_or(Value::Null, from_value_ref))
            .collect();
        Row::new(column_names.to_vec(), values)
    }
}

#[async_trait::async_trait]
impl DatabaseBackend for SqliteBackend {
    fn vendor(&self) -> &str {
        "sqlite"
    }

    fn backend_type(&self) -> BackendType {
        BackendType::SQLite
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> EtlResult<u64> {
        let conn = Arc::clone(&self.conn);
        let st = Statement::new(sql, params.to_vec());
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            run_statement(&conn, &st).map_err(|e| target_err(&e))
        })
        .await
        .map_err(|e| join_err(&e))?
    }

    async fn query(&self, sql: &str, params: &[Value]) -> EtlResult<Vec<Row>> {
        let conn = Arc::clone(&self.conn);
        let sql = sql.to_string();
        let params = params.to_vec();

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare(&sql).map_err(|e| target_err(&e))?;
            let column_names: Vec<String> =
                stmt.column_names().into_iter().map(String::from).collect();
            bind_params(&mut stmt, &params).map_err(|e| target_err(&e))?;

            let mut raw_rows = stmt.raw_query();
            let mut rows = Vec::new();
            while let Some(row) = raw_rows.next().map_err(|e| target_err(&e))? {
                rows.push(Self::convert_row(row, &column_names));
            }
            Ok(rows)
        })
        .await
        .map_err(|e| join_err(&e))?
    }

    async fn execute_transaction(&self, statements: &[Statement]) -> EtlResult<u64> {
        let conn = Arc::clone(&self.conn);
        let statements = statements.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            let tx = conn.transaction().map_err(|e| target_err(&e))?;
            let mut total = 0;
            for st in &statements {
                total += run_statement(&tx, st).map_err(|e| target_err(&e))?;
            }
            tx.commit().map_err(|e| target_err(&e))?;
            Ok(total)
        })
        .await
        .map_err(|e| join_err(&e))?
    }

    async fn dry_run(&self, statements: &[Statement]) -> EtlResult<()> {
        let conn = Arc::clone(&self.conn);
        let statements = statements.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            let tx = conn.transaction().map_err(|e| target_err(&e))?;
            let result = statements
                .iter()
                .try_for_each(|st| run_statement(&tx, st).map(|_| ()))
                .map_err(|e| EtlError::target(format!("dry-run failed: {e}")));
            tx.rollback().map_err(|e| target_err(&e))?;
            result
        })
        .await
        .map_err(|e| join_err(&e))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sqlite_memory_open() {
        let backend = SqliteBackend::memory().unwrap();
        assert_eq!(backend.vendor(), "sqlite");
        assert_eq!(backend.backend_type(), BackendType::SQLite);
        backend.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_sqlite_insert_and_query() {
        let backend = SqliteBackend::memory().unwrap();
        backend
            .execute("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, active BOOLEAN)", &[])
            .await
            .unwrap();
        backend
            .execute(
                "INSERT INTO users (name, active) VALUES (?, ?)",
                &[Value::from("Alice"), Value::Boolean(true)],
            )
            .await
            .unwrap();
        let rows = backend.query("SELECT name, active FROM users", &[]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get::<String>("name").unwrap(), "Alice");
        assert_eq!(rows[0].get_value("active"), Some(&Value::Integer(1)));
    }

    #[tokio::test]
    async fn test_execute_transaction_is_all_or_nothing() {
        let backend = SqliteBackend::memory().unwrap();
        backend
            .execute("CREATE TABLE t (id INTEGER PRIMARY KEY)", &[])
            .await
            .unwrap();
        let result = backend
            .execute_transaction(&[
                Statement::new("INSERT INTO t (id) VALUES (?)", vec![Value::Integer(1)]),
                Statement::new("INSERT INTO t (id) VALUES (?)", vec![Value::Integer(1)]),
            ])
            .await;
        assert!(result.is_err());
        let n = backend.query_one("SELECT COUNT(*) AS n FROM t", &[]).await.unwrap();
        assert_eq!(n.get::<i64>("n").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dry_run_always_rolls_back() {
        let backend = SqliteBackend::memory().unwrap();
        backend
            .dry_run(&[
                Statement::ddl("CREATE TABLE scratch (x INTEGER)"),
                Statement::new("INSERT INTO scratch VALUES (?)", vec![Value::Integer(5)]),
            ])
            .await
            .unwrap();
        let tables = backend
            .query("SELECT name FROM sqlite_master WHERE name = 'scratch'", &[])
            .await
            .unwrap();
        assert!(tables.is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_reports_failure() {
        let backend = SqliteBackend::memory().unwrap();
        let err = backend
            .dry_run(&[Statement::ddl("INSERT INTO missing VALUES (1)")])
            .await
            .unwrap_err();
        assert!(err.reason().contains("dry-run failed"));
    }

    #[tokio::test]
    async fn test_backup_and_restore() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SqliteBackend::open(dir.path().join("t.db")).unwrap();
        backend.execute("CREATE TABLE t (x INTEGER)", &[]).await.unwrap();
        backend.execute("INSERT INTO t VALUES (1)", &[]).await.unwrap();

        let snap = dir.path().join("snap.db");
        backend.backup_to(&snap).await.unwrap();
        backend.execute("INSERT INTO t VALUES (2)", &[]).await.unwrap();
        backend.restore_from(&snap).await.unwrap();

        let row = backend.query_one("SELECT COUNT(*) AS n FROM t", &[]).await.unwrap();
        assert_eq!(row.get::<i64>("n").unwrap(), 1);
    }

    #[test]
    fn test_read_only_open_refuses_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("src.db");
        {
            let conn = rusqlite::Connection::open(&path).unwrap();
            conn.execute_batch("CREATE TABLE t (a TEXT, b INTEGER NOT NULL, PRIMARY KEY (a))")
                .unwrap();
        }
        let conn = open_read_only(&path).unwrap();
        assert!(conn.execute("INSERT INTO t VALUES ('x', 1)", []).is_err());

        assert_eq!(list_tables(&conn).unwrap(), vec!["t".to_string()]);
        let schema = table_schema(&conn, "t").unwrap();
        assert_eq!(schema.columns.len(), 2);
        assert!(schema.columns[0].primary_key);
        assert!(schema.columns[1].not_null);
        assert_eq!(schema.columns[1].declared_type, "INTEGER");
        assert_eq!(row_count(&conn, "t").unwrap(), 0);
    }

    #[test]
    fn test_open_read_only_missing_file() {
        let err = open_read_only(Path::new("/nonexistent/src.db")).unwrap_err();
        assert!(matches!(err, EtlError::Configuration(_)));
    }

    #[test]
    fn test_immutable_uri_escapes() {
        assert_eq!(
            immutable_uri(Path::new("/data/a?b#c%.db")),
            "file:/data/a%3fb%23c%25.db?immutable=1"
        );
    }
}
