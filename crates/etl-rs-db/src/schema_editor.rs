//! Schema editors: per-dialect SQL generation for staging and cutover.
//!
//! A migration run never writes to live tables directly. Rows go into
//! staging tables named after the run. Once verification passes,
//! [`SchemaEditor::cutover`] returns the statements that swap the staging
//! tables over the live ones; the caller runs them in one transaction.
//!
//! | Dialect | Staging location | Cutover |
//! |---|---|---|
//! | `PostgreSQL` | schema `etl_stage_{run}` | `DROP` live, `SET SCHEMA`, drop staging schema |
//! | `SQLite` | table `_etl_stage_{run}_{table}` | `DROP` live, `RENAME` |

use crate::base::{BackendType, Statement};
use crate::schema::{ColumnSpec, TableSpec};
use crate::value::{LogicalType, Value};

/// Prefix shared by every object the pipeline creates in a target.
pub const STAGING_PREFIX: &str = "_etl_stage_";

/// Double-quotes an identifier, doubling embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Generates dialect-specific SQL for staging, loading and cutover.
///
/// Every method is pure: it returns SQL, it never talks to a database.
pub trait SchemaEditor: Send + Sync + std::fmt::Debug {
    /// Returns the dialect.
    fn backend_type(&self) -> BackendType;

    /// Column type for a logical type.
    fn column_type(&self, column: &ColumnSpec) -> &'static str;

    /// Quoted, qualified name of a live table.
    fn live_table(&self, table: &str) -> String;

    /// Quoted, qualified name of the staging table of `table` for `run_id`.
    fn staging_table(&self, run_id: u64, table: &str) -> String;

    /// Statements that create an empty staging table for `spec`, replacing
    /// any leftover from an earlier attempt of the same run.
    fn create_staging(&self, run_id: u64, spec: &TableSpec) -> Vec<String>;

    /// Statements that remove every staging object of `run_id`.
    fn drop_staging(&self, run_id: u64, tables: &[String]) -> Vec<String>;

    /// Statements that make the staging tables live, replacing live tables
    /// of the same name. Must run in a single transaction.
    fn cutover(&self, run_id: u64, tables: &[String]) -> Vec<String>;

    /// Placeholder for parameter `idx` (1-based) of a column.
    fn placeholder(&self, idx: usize, column: &ColumnSpec) -> String;

    /// Converts a cleaned value into the parameter bound for `column`.
    fn bind_value(&self, value: &Value, column: &ColumnSpec) -> Value;

    /// Query listing `(namespace, table)` for every user table in the target,
    /// staging objects included.
    fn list_tables_sql(&self) -> String;

    /// Query listing `(name, type)` for each column of a table.
    fn list_columns_query(&self, namespace: &str, table: &str) -> Statement;

    /// Query returning one row if `table` exists live.
    fn table_exists_query(&self, table: &str) -> Statement;

    /// Quoted, qualified reference from a `(namespace, table)` pair.
    fn qualified(&self, namespace: &str, table: &str) -> String;

    /// Column definition list for `spec`: names and types only. Cleaning
    /// can make two source keys equal, so no key or uniqueness constraint
    /// is carried over.
    fn columns_ddl(&self, spec: &TableSpec) -> String {
        spec.columns
            .iter()
            .map(|c| format!("{} {}", quote_ident(&c.name), self.column_type(c)))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Multi-row `INSERT` into `table` for `rows` rows.
    fn insert_sql(&self, table: &str, spec: &TableSpec, rows: usize) -> String {
        let cols: Vec<String> = spec.columns.iter().map(|c| quote_ident(&c.name)).collect();
        let width = spec.columns.len();
        let tuples: Vec<String> = (0..rows)
            .map(|r| {
                let ph: Vec<String> = spec
                    .columns
                    .iter()
                    .enumerate()
                    .map(|(i, c)| self.placeholder(r * width + i + 1, c))
                    .collect();
                format!("({})", ph.join(", "))
            })
            .collect();
        format!(
            "INSERT INTO {table} ({}) VALUES {}",
            cols.join(", "),
            tuples.join(", ")
        )
    }

    /// `SELECT` of the declared columns from `table`.
    fn select_sql(&self, table: &str, spec: &TableSpec) -> String {
        let cols: Vec<String> = spec.columns.iter().map(|c| quote_ident(&c.name)).collect();
        format!("SELECT {} FROM {table}", cols.join(", "))
    }

    /// `SELECT *` from `table`.
    fn select_all_sql(&self, table: &str) -> String {
        format!("SELECT * FROM {table}")
    }

    /// `SELECT COUNT(*) AS n` from `table`.
    fn count_sql(&self, table: &str) -> String {
        format!("SELECT COUNT(*) AS n FROM {table}")
    }
}

/// Returns the editor for a dialect. `schema` is the live `PostgreSQL`
/// schema and is ignored for `SQLite`.
pub fn editor_for(backend: BackendType, schema: &str) -> Box<dyn SchemaEditor> {
    match backend {
        BackendType::SQLite => Box::new(SqliteSchemaEditor),
        BackendType::PostgreSQL => Box::new(PostgresSchemaEditor::new(schema)),
    }
}

// ── PostgreSQL ───────────────────────────────────────────────────────────

/// Schema editor for `PostgreSQL`.
///
/// Parameters are always bound as text and cast in SQL
/// (`$1::text::bigint`), so NULLs and values of every type share one
/// binding path.
#[derive(Debug, Clone)]
pub struct PostgresSchemaEditor {
    schema: String,
}

impl PostgresSchemaEditor {
    /// An editor whose live tables live in `schema`.
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
        }
    }

    /// Name of the staging schema of a run.
    pub fn staging_schema(run_id: u64) -> String {
        format!("etl_stage_{run_id}")
    }
}

impl SchemaEditor for PostgresSchemaEditor {
    fn backend_type(&self) -> BackendType {
        BackendType::PostgreSQL
    }

    fn column_type(&self, column: &ColumnSpec) -> &'static str {
        match column.logical_type {
            LogicalType::String => "TEXT",
            LogicalType::Integer => "BIGINT",
            LogicalType::Float => "DOUBLE PRECISION",
            LogicalType::Boolean => "BOOLEAN",
            LogicalType::Timestamp if column.has_time => "TIMESTAMP",
            LogicalType::Timestamp => "DATE",
        }
    }

    fn live_table(&self, table: &str) -> String {
        self.qualified(&self.schema, table)
    }

    fn staging_table(&self, run_id: u64, table: &str) -> String {
        self.qualified(&Self::staging_schema(run_id), table)
    }

    fn create_staging(&self, run_id: u64, spec: &TableSpec) -> Vec<String> {
        let staging = self.staging_table(run_id, &spec.name);
        vec![
            format!(
                "CREATE SCHEMA IF NOT EXISTS {}",
                quote_ident(&Self::staging_schema(run_id))
            ),
            format!("DROP TABLE IF EXISTS {staging}"),
            format!("CREATE TABLE {staging} ({})", self.columns_ddl(spec)),
        ]
    }

    fn drop_staging(&self, run_id: u64, _tables: &[String]) -> Vec<String> {
        vec![format!(
            "DROP SCHEMA IF EXISTS {} CASCADE",
            quote_ident(&Self::staging_schema(run_id))
        )]
    }

    fn cutover(&self, run_id: u64, tables: &[String]) -> Vec<String> {
        let mut stmts = Vec::with_capacity(tables.len() * 2 + 1);
        for table in tables {
            stmts.push(format!("DROP TABLE IF EXISTS {}", self.live_table(table)));
            stmts.push(format!(
                "ALTER TABLE {} SET SCHEMA {}",
                self.staging_table(run_id, table),
                quote_ident(&self.schema)
            ));
        }
        stmts.extend(self.drop_staging(run_id, tables));
        stmts
    }

    fn placeholder(&self, idx: usize, column: &ColumnSpec) -> String {
        match column.logical_type {
            LogicalType::String => format!("${idx}::text"),
            _ => format!("${idx}::text::{}", self.column_type(column).to_lowercase()),
        }
    }

    fn bind_value(&self, value: &Value, column: &ColumnSpec) -> Value {
        column.canonical(value).map_or(Value::Null, Value::Text)
    }

    fn list_tables_sql(&self) -> String {
        "SELECT table_schema::text AS namespace, table_name::text AS name \
         FROM information_schema.tables \
         WHERE table_type = 'BASE TABLE' \
         AND table_schema NOT IN ('pg_catalog', 'information_schema') \
         ORDER BY 1, 2"
            .to_string()
    }

    fn list_columns_query(&self, namespace: &str, table: &str) -> Statement {
        Statement::new(
            "SELECT column_name::text AS name, data_type::text AS type \
             FROM information_schema.columns \
             WHERE table_schema = $1::text AND table_name = $2::text \
             ORDER BY ordinal_position",
            vec![Value::from(namespace), Value::from(table)],
        )
    }

    fn table_exists_query(&self, table: &str) -> Statement {
        Statement::new(
            "SELECT 1 FROM information_schema.tables \
             WHERE table_schema = $1::text AND table_name = $2::text",
            vec![Value::from(self.schema.as_str()), Value::from(table)],
        )
    }

    fn qualified(&self, namespace: &str, table: &str) -> String {
        format!("{}.{}", quote_ident(namespace), quote_ident(table))
    }
}

// ── SQLite ───────────────────────────────────────────────────────────────

/// Schema editor for `SQLite`.
///
/// `SQLite` has no schemas inside one file, so staging tables carry the run
/// id in their name.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteSchemaEditor;

impl SqliteSchemaEditor {
    /// Unquoted name of the staging table of `table` for `run_id`.
    pub fn staging_name(run_id: u64, table: &str) -> String {
        format!("{STAGING_PREFIX}{run_id}_{table}")
    }
}

impl SchemaEditor for SqliteSchemaEditor {
    fn backend_type(&self) -> BackendType {
        BackendType::SQLite
    }

    fn column_type(&self, column: &ColumnSpec) -> &'static str {
        match column.logical_type {
            LogicalType::String => "TEXT",
            LogicalType::Integer => "INTEGER",
            LogicalType::Float => "REAL",
            LogicalType::Boolean => "BOOLEAN",
            LogicalType::Timestamp if column.has_time => "TIMESTAMP",
            LogicalType::Timestamp => "DATE",
        }
    }

    fn live_table(&self, table: &str) -> String {
        quote_ident(table)
    }

    fn staging_table(&self, run_id: u64, table: &str) -> String {
        quote_ident(&Self::staging_name(run_id, table))
    }

    fn create_staging(&self, run_id: u64, spec: &TableSpec) -> Vec<String> {
        let staging = self.staging_table(run_id, &spec.name);
        vec![
            format!("DROP TABLE IF EXISTS {staging}"),
            format!("CREATE TABLE {staging} ({})", self.columns_ddl(spec)),
        ]
    }

    fn drop_staging(&self, run_id: u64, tables: &[String]) -> Vec<String> {
        tables
            .iter()
            .map(|t| format!("DROP TABLE IF EXISTS {}", self.staging_table(run_id, t)))
            .collect()
    }

    fn cutover(&self, run_id: u64, tables: &[String]) -> Vec<String> {
        let mut stmts = Vec::with_capacity(tables.len() * 2);
        for table in tables {
            stmts.push(format!("DROP TABLE IF EXISTS {}", self.live_table(table)));
            stmts.push(format!(
                "ALTER TABLE {} RENAME TO {}",
                self.staging_table(run_id, table),
                self.live_table(table)
            ));
        }
        stmts
    }

    fn placeholder(&self, idx: usize, _column: &ColumnSpec) -> String {
        format!("?{idx}")
    }

    fn bind_value(&self, value: &Value, column: &ColumnSpec) -> Value {
        match (column.logical_type, value) {
            (_, Value::Null) => Value::Null,
            (LogicalType::Timestamp, v) => column.canonical(v).map_or(Value::Null, Value::Text),
            (_, Value::Boolean(b)) => Value::Integer(i64::from(*b)),
            (_, v) => v.clone(),
        }
    }

    fn list_tables_sql(&self) -> String {
        "SELECT 'main' AS namespace, name FROM sqlite_master \
         WHERE type = 'table' AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\' \
         ORDER BY name"
            .to_string()
    }

    fn list_columns_query(&self, _namespace: &str, table: &str) -> Statement {
        Statement::new(
            "SELECT name, type FROM pragma_table_info(?1) ORDER BY cid",
            vec![Value::from(table)],
        )
    }

    fn table_exists_query(&self, table: &str) -> Statement {
        Statement::new(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            vec![Value::from(table)],
        )
    }

    fn qualified(&self, _namespace: &str, table: &str) -> String {
        quote_ident(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> TableSpec {
        TableSpec {
            name: "orders".into(),
            columns: vec![
                ColumnSpec::new("id", LogicalType::Integer).primary(),
                ColumnSpec::new("placed", LogicalType::Timestamp),
                ColumnSpec::new("note", LogicalType::String),
            ],
        }
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_pg_create_staging() {
        let ed = PostgresSchemaEditor::new("public");
        let stmts = ed.create_staging(7, &spec());
        assert_eq!(stmts[0], "CREATE SCHEMA IF NOT EXISTS \"etl_stage_7\"");
        assert_eq!(stmts[1], "DROP TABLE IF EXISTS \"etl_stage_7\".\"orders\"");
        assert_eq!(
            stmts[2],
            "CREATE TABLE \"etl_stage_7\".\"orders\" (\"id\" BIGINT, \"placed\" DATE, \"note\" TEXT)"
        );
    }

    #[test]
    fn test_pg_cutover_moves_schema_and_drops_staging() {
        let ed = PostgresSchemaEditor::new("public");
        let stmts = ed.cutover(7, &["orders".to_string()]);
        assert_eq!(
            stmts,
            vec![
                "DROP TABLE IF EXISTS \"public\".\"orders\"".to_string(),
                "ALTER TABLE \"etl_stage_7\".\"orders\" SET SCHEMA \"public\"".to_string(),
                "DROP SCHEMA IF EXISTS \"etl_stage_7\" CASCADE".to_string(),
            ]
        );
    }

    #[test]
    fn test_pg_insert_casts_text_params() {
        let ed = PostgresSchemaEditor::new("public");
        let sql = ed.insert_sql("\"t\"", &spec(), 2);
        assert_eq!(
            sql,
            "INSERT INTO \"t\" (\"id\", \"placed\", \"note\") VALUES \
             ($1::text::bigint, $2::text::date, $3::text), \
             ($4::text::bigint, $5::text::date, $6::text)"
        );
    }

    #[test]
    fn test_pg_bind_value_is_canonical_text() {
        let ed = PostgresSchemaEditor::new("public");
        let col = ColumnSpec::new("ok", LogicalType::Boolean);
        assert_eq!(ed.bind_value(&Value::Integer(1), &col), Value::from("true"));
        assert_eq!(ed.bind_value(&Value::Null, &col), Value::Null);
    }

    #[test]
    fn test_staging_drops_source_keys() {
        let stmts = SqliteSchemaEditor.create_staging(3, &spec());
        let create = stmts.last().unwrap();
        assert!(create.starts_with("CREATE TABLE \"_etl_stage_3_orders\""), "{create}");
        assert!(!create.contains("PRIMARY KEY"), "{create}");
        assert!(!create.contains("UNIQUE"), "{create}");
    }

    #[test]
    fn test_sqlite_staging_and_cutover() {
        let ed = SqliteSchemaEditor;
        assert_eq!(ed.staging_table(3, "orders"), "\"_etl_stage_3_orders\"");
        let stmts = ed.cutover(3, &["orders".to_string()]);
        assert_eq!(stmts[0], "DROP TABLE IF EXISTS \"orders\"");
        assert_eq!(
            stmts[1],
            "ALTER TABLE \"_etl_stage_3_orders\" RENAME TO \"orders\""
        );
        assert_eq!(ed.drop_staging(3, &["orders".to_string()]).len(), 1);
    }

    #[test]
    fn test_sqlite_insert_numbered_placeholders() {
        let sql = SqliteSchemaEditor.insert_sql("\"t\"", &spec(), 1);
        assert_eq!(
            sql,
            "INSERT INTO \"t\" (\"id\", \"placed\", \"note\") VALUES (?1, ?2, ?3)"
        );
    }

    #[test]
    fn test_sqlite_bind_value() {
        let ed = SqliteSchemaEditor;
        let ts = ColumnSpec::new("d", LogicalType::Timestamp);
        let d = chrono::NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        assert_eq!(ed.bind_value(&Value::Date(d), &ts), Value::from("2024-02-01"));
        let b = ColumnSpec::new("b", LogicalType::Boolean);
        assert_eq!(ed.bind_value(&Value::Boolean(true), &b), Value::Integer(1));
    }

    #[test]
    fn test_editor_for() {
        assert_eq!(
            editor_for(BackendType::SQLite, "public").backend_type(),
            BackendType::SQLite
        );
        assert_eq!(
            editor_for(BackendType::PostgreSQL, "public").live_table("t"),
            "\"public\".\"t\""
        );
    }
}
