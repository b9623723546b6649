//! Base database backend trait and common types.
//!
//! This module defines the [`DatabaseBackend`] trait that target backends
//! implement. Multi-statement work goes through
//! [`DatabaseBackend::execute_transaction`], which runs every statement on a
//! single connection and commits only if all of them succeed, or through
//! [`DatabaseBackend::dry_run`], which always rolls back.

use std::collections::HashMap;
use std::fmt;

use etl_rs_core::settings::TargetSettings;
use etl_rs_core::{EtlError, EtlResult};

use crate::row::Row;
use crate::value::Value;

/// The SQL dialects the pipeline can write to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendType {
    /// `SQLite`.
    SQLite,
    /// `PostgreSQL`.
    PostgreSQL,
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SQLite => f.write_str("sqlite"),
            Self::PostgreSQL => f.write_str("postgresql"),
        }
    }
}

/// One SQL statement with its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// The SQL text.
    pub sql: String,
    /// Positional parameters.
    pub params: Vec<Value>,
}

impl Statement {
    /// A statement with parameters.
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// A statement without parameters (DDL).
    pub fn ddl(sql: impl Into<String>) -> Self {
        Self::new(sql, Vec::new())
    }
}

impl From<String> for Statement {
    fn from(sql: String) -> Self {
        Self::ddl(sql)
    }
}

/// The core trait for target database backends.
///
/// All methods are async. Backends with synchronous drivers (`rusqlite`)
/// run their work in `spawn_blocking`.
#[async_trait::async_trait]
pub trait DatabaseBackend: Send + Sync {
    /// Returns the vendor name ("postgresql" or "sqlite").
    fn vendor(&self) -> &str;

    /// Returns the dialect.
    fn backend_type(&self) -> BackendType;

    /// Executes a statement that does not return rows. Returns rows affected.
    async fn execute(&self, sql: &str, params: &[Value]) -> EtlResult<u64>;

    /// Executes a query and returns all rows.
    async fn query(&self, sql: &str, params: &[Value]) -> EtlResult<Vec<Row>>;

    /// Executes a query that must return exactly one row.
    async fn query_one(&self, sql: &str, params: &[Value]) -> EtlResult<Row> {
        let mut rows = self.query(sql, params).await?;
        match rows.len() {
            1 => Ok(rows.remove(0)),
            n => Err(EtlError::target(format!("Expected 1 row, got {n}"))),
        }
    }

    /// Runs all statements in one transaction on one connection. Either
    /// every statement takes effect or none does. Returns total rows affected.
    async fn execute_transaction(&self, statements: &[Statement]) -> EtlResult<u64>;

    /// Runs all statements in one transaction that is always rolled back.
    /// Returns the first error, if any.
    async fn dry_run(&self, statements: &[Statement]) -> EtlResult<()>;

    /// Checks that the database answers.
    async fn ping(&self) -> EtlResult<()> {
        self.query("SELECT 1", &[]).await.map(|_| ())
    }
}

/// Configuration for connecting to a database.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// The backend type.
    pub backend: BackendType,
    /// The database name or file path.
    pub name: String,
    /// The database host (for network-based backends).
    pub host: Option<String>,
    /// The database port.
    pub port: Option<u16>,
    /// The database user.
    pub user: Option<String>,
    /// The database password.
    pub password: Option<String>,
    /// Connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Additional connection options.
    pub options: HashMap<String, String>,
}

impl DatabaseConfig {
    /// Creates a configuration for a `SQLite` file database.
    pub fn sqlite_file(path: impl Into<String>) -> Self {
        Self {
            backend: BackendType::SQLite,
            name: path.into(),
            host: None,
            port: None,
            user: None,
            password: None,
            connect_timeout_secs: 5,
            options: HashMap::new(),
        }
    }

    /// Creates a configuration for a `PostgreSQL` database.
    pub fn postgres(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            backend: BackendType::PostgreSQL,
            name: name.into(),
            host: Some(host.into()),
            port: Some(port),
            user: Some(user.into()),
            password: Some(password.into()),
            connect_timeout_secs: 5,
            options: HashMap::new(),
        }
    }

    /// Builds a configuration from the target settings.
    pub fn from_target(target: &TargetSettings) -> EtlResult<Self> {
        let mut config = match target.engine.to_lowercase().as_str() {
            "sqlite" | "sqlite3" => Self::sqlite_file(target.name.clone()),
            "postgresql" | "postgres" | "pg" => Self::postgres(
                target.name.clone(),
                target.host.clone(),
                target.port,
                target.user.clone(),
                target.password.clone(),
            ),
            other => {
                return Err(EtlError::Configuration(format!(
                    "unsupported target engine '{other}'"
                )))
            }
        };
        config.connect_timeout_secs = target.connect_timeout_secs;
        Ok(config)
    }

    /// A stable identity for the target, used to key run locks.
    pub fn identity(&self) -> String {
        match self.backend {
            BackendType::SQLite => {
                let canonical = std::fs::canonicalize(&self.name)
                    .map_or_else(|_| self.name.clone(), |p| p.display().to_string());
                format!("sqlite:{canonical}")
            }
            BackendType::PostgreSQL => format!(
                "postgresql://{}@{}:{}/{}",
                self.user.as_deref().unwrap_or_default(),
                self.host.as_deref().unwrap_or("localhost"),
                self.port.unwrap_or(5432),
                self.name
            ),
        }
    }
}

/// Whether the `PostgreSQL` driver is compiled into this build.
pub const fn postgres_driver_available() -> bool {
    cfg!(feature = "postgres")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_config_sqlite_file() {
        let cfg = DatabaseConfig::sqlite_file("/tmp/test.db");
        assert_eq!(cfg.backend, BackendType::SQLite);
        assert_eq!(cfg.name, "/tmp/test.db");
        assert!(cfg.host.is_none());
    }

    #[test]
    fn test_database_config_postgres() {
        let cfg = DatabaseConfig::postgres("mydb", "localhost", 5432, "user", "pass");
        assert_eq!(cfg.backend, BackendType::PostgreSQL);
        assert_eq!(cfg.host.as_deref(), Some("localhost"));
        assert_eq!(cfg.port, Some(5432));
        assert_eq!(cfg.identity(), "postgresql://user@localhost:5432/mydb");
    }

    #[test]
    fn test_from_target_settings() {
        let mut t = TargetSettings::default();
        t.engine = "sqlite".into();
        t.name = "/tmp/x.db".into();
        t.connect_timeout_secs = 9;
        let cfg = DatabaseConfig::from_target(&t).unwrap();
        assert_eq!(cfg.backend, BackendType::SQLite);
        assert_eq!(cfg.connect_timeout_secs, 9);

        t.engine = "oracle".into();
        assert!(matches!(
            DatabaseConfig::from_target(&t),
            Err(EtlError::Configuration(_))
        ));
    }

    #[test]
    fn test_statement_ddl_has_no_params() {
        let st = Statement::ddl("DROP TABLE x");
        assert!(st.params.is_empty());
    }

    #[test]
    fn test_backend_type_display() {
        assert_eq!(BackendType::SQLite.to_string(), "sqlite");
        assert_eq!(BackendType::PostgreSQL.to_string(), "postgresql");
    }
}
