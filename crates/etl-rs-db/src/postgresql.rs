//! `PostgreSQL` backend using `tokio-postgres` and `deadpool-postgres`.
//!
//! Connection and pool failures are classified as transient so the retry
//! policy may retry them; SQL errors are not.

use std::time::Duration;

use etl_rs_core::{EtlError, EtlResult};
use tokio_postgres::types::{ToSql, Type};

use crate::base::{BackendType, DatabaseBackend, DatabaseConfig, Statement};
use crate::row::Row;
use crate::value::Value;

/// A `PostgreSQL` database backend backed by a connection pool.
pub struct PostgresBackend {
    pool: deadpool_postgres::Pool,
}

impl std::fmt::Debug for PostgresBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresBackend")
            .field("status", &self.pool.status())
            .finish()
    }
}

/// SQLSTATEs that describe a condition a retry may clear.
const TRANSIENT_STATES: &[&str] = &["40001", "40P01", "53300", "57P01", "57P02", "57P03"];

fn classify(e: &tokio_postgres::Error) -> EtlError {
    let transient = e.code().map_or_else(
        || {
            e.is_closed()
                || std::error::Error::source(e).is_some_and(|s| s.is::<std::io::Error>())
        },
        |state| {
            let code = state.code();
            code.starts_with("08") || TRANSIENT_STATES.contains(&code)
        },
    );
    let message = e.as_db_error().map_or_else(|| e.to_string(), |db| db.to_string());
    if transient {
        EtlError::transient(message)
    } else {
        EtlError::target(message)
    }
}

fn pool_err(e: &deadpool_postgres::PoolError) -> EtlError {
    EtlError::transient(format!("Pool error: {e}"))
}

impl PostgresBackend {
    /// Creates a new backend from a `deadpool-postgres` pool.
    pub const fn new(pool: deadpool_postgres::Pool) -> Self {
        Self { pool }
    }

    /// Creates a new backend from a [`DatabaseConfig`].
    pub fn from_config(config: &DatabaseConfig) -> EtlResult<Self> {
        let mut pg_config = deadpool_postgres::Config::new();
        pg_config.dbname = Some(config.name.clone());
        pg_config.host = config.host.clone();
        pg_config.port = config.port;
        pg_config.user = config.user.clone();
        pg_config.password = config.password.clone();
        pg_config.application_name = Some("etl-rs".to_string());
        pg_config.connect_timeout = Some(Duration::from_secs(config.connect_timeout_secs));

        let pool = pg_config
            .create_pool(Some(deadpool_postgres::Runtime::Tokio1), tokio_postgres::NoTls)
            .map_err(|e| EtlError::Configuration(format!("Failed to create pool: {e}")))?;

        Ok(Self { pool })
    }

    fn to_sql_params(params: &[Value]) -> Vec<Box<dyn ToSql + Sync + Send>> {
        params
            .iter()
            .map(|v| -> Box<dyn ToSql + Sync + Send> {
                match v {
                    Value::Null => Box::new(Option::<String>::None),
                    Value::Integer(i) => Box::new(*i),
                    Value::Real(f) => Box::new(*f),
                    Value::Text(s) => Box::new(s.clone()),
                    Value::Blob(b) => Box::new(b.clone()),
                    Value::Boolean(b) => Box::new(*b),
                    Value::Date(d) => Box::new(*d),
                    Value::Timestamp(dt) => Box::new(*dt),
                }
            })
            .collect()
    }

    fn convert_row(pg_row: &tokio_postgres::Row) -> Row {
        let columns: Vec<String> = pg_row
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        let values: Vec<Value> = pg_row
            .columns()
            .iter()
            .enumerate()
            .map(|(i, col)| match *col.type_() {
                Type::BOOL => pg_row
                    .try_get::<_, Option<bool>>(i)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, Value::Boolean),
                Type::INT2 => pg_row
                    .try_get::<_, Option<i16>>(i)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, |v| Value::Integer(i64::from(v))),
                Type::INT4 => pg_row
                    .try_get::<_, Option<i32>>(i)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, |v| Value::Integer(i64::from(v))),
                Type::INT8 => pg_row
                    .try_get::<_, Option<i64>>(i)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, Value::Integer),
                Type::FLOAT4 => pg_row
                    .try_get::<_, Option<f32>>(i)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, |v| Value::Real(f64::from(v))),
                Type::FLOAT8 => pg_row
                    .try_get::<_, Option<f64>>(i)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, Value::Real),
                Type::BYTEA => pg_row
                    .try_get::<_, Option<Vec<u8>>>(i)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, Value::Blob),
                Type::DATE => pg_row
                    .try_get::<_, Option<chrono::NaiveDate>>(i)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, Value::Date),
                Type::TIMESTAMP => pg_row
                    .try_get::<_, Option<chrono::NaiveDateTime>>(i)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, Value::Timestamp),
                _ => pg_row
                    .try_get::<_, Option<String>>(i)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, Value::Text),
            })
            .collect();

        Row::new(columns, values)
    }

    async fn run_in_transaction(&self, statements: &[Statement], commit: bool) -> EtlResult<u64> {
        let mut client = self.pool.get().await.map_err(|e| pool_err(&e))?;
        let tx = client.transaction().await.map_err(|e| classify(&e))?;
        let mut total = 0;
        for st in statements {
            let params = Self::to_sql_params(&st.params);
            let refs: Vec<&(dyn ToSql + Sync)> = params
                .iter()
                .map(|p| p.as_ref() as &(dyn ToSql + Sync))
                .collect();
            match tx.execute(st.sql.as_str(), &refs).await {
                Ok(n) => total += n,
                Err(e) => {
                    let err = classify(&e);
                    let _ = tx.rollback().await;
                    return Err(err);
                }
            }
        }
        if commit {
            tx.commit().await.map_err(|e| classify(&e))?;
        } else {
            tx.rollback().await.map_err(|e| classify(&e))?;
        }
        Ok(total)
    }
}

#[async_trait::async_trait]
impl DatabaseBackend for PostgresBackend {
    fn vendor(&self) -> &str {
        "postgresql"
    }

    fn backend_type(&self) -> BackendType {
        BackendType::PostgreSQL
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> EtlResult<u64> {
        let client = self.pool.get().await.map_err(|e| pool_err(&e))?;
        let sql_params = Self::to_sql_params(params);
        let param_refs: Vec<&(dyn ToSql + Sync)> = sql_params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();
        client
            .execute(sql, &param_refs)
            .await
            .map_err(|e| classify(&e))
    }

    async fn query(&self, sql: &str, params: &[Value]) -> EtlResult<Vec<Row>> {
        let client = self.pool.get().await.map_err(|e| pool_err(&e))?;
        let sql_params = Self::to_sql_params(params);
        let param_refs: Vec<&(dyn ToSql + Sync)> = sql_params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();
        let rows = client
            .query(sql, &param_refs)
            .await
            .map_err(|e| classify(&e))?;
        Ok(rows.iter().map(Self::convert_row).collect())
    }

    async fn execute_transaction(&self, statements: &[Statement]) -> EtlResult<u64> {
        self.run_in_transaction(statements, true).await
    }

    async fn dry_run(&self, statements: &[Statement]) -> EtlResult<()> {
        self.run_in_transaction(statements, false)
            .await
            .map(|_| ())
            .map_err(|e| EtlError::target(format!("dry-run failed: {}", e.reason())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_cover_every_value() {
        let params = PostgresBackend::to_sql_params(&[
            Value::Null,
            Value::Integer(1),
            Value::Real(1.5),
            Value::from("x"),
            Value::Blob(vec![1]),
            Value::Boolean(true),
        ]);
        assert_eq!(params.len(), 6);
    }

    #[tokio::test]
    async fn test_from_config_builds_pool_lazily() {
        let cfg = DatabaseConfig::postgres("db", "127.0.0.1", 1, "u", "p");
        let backend = PostgresBackend::from_config(&cfg).unwrap();
        assert_eq!(backend.vendor(), "postgresql");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transient() {
        let mut cfg = DatabaseConfig::postgres("db", "127.0.0.1", 1, "u", "p");
        cfg.connect_timeout_secs = 1;
        let backend = PostgresBackend::from_config(&cfg).unwrap();
        let err = backend.ping().await.unwrap_err();
        assert!(err.is_transient());
    }
}
