//! # etl-rs-db
//!
//! Database layer for etl-rs. Provides a backend-agnostic [`Value`] and
//! [`Row`], the [`DatabaseBackend`] trait with `SQLite` and `PostgreSQL`
//! implementations, per-dialect [`SchemaEditor`]s, and the read-only
//! [`SourceSnapshot`].
//!
//! Supported targets:
//! - `SQLite` (always available)
//! - `PostgreSQL` (feature `postgres`)

pub mod base;
#[cfg(feature = "postgres")]
pub mod postgresql;
pub mod row;
pub mod schema;
pub mod schema_editor;
pub mod snapshot;
pub mod sqlite;
pub mod value;

use std::sync::Arc;

use etl_rs_core::EtlResult;

pub use base::{postgres_driver_available, BackendType, DatabaseBackend, DatabaseConfig, Statement};
pub use row::{FromValue, Row};
pub use schema::{ColumnInfo, ColumnSpec, TableSchema, TableSpec};
pub use schema_editor::{editor_for, quote_ident, SchemaEditor};
pub use snapshot::SourceSnapshot;
pub use sqlite::SqliteBackend;
pub use value::{LogicalType, Value};

/// Opens a backend for `config`.
pub fn connect(config: &DatabaseConfig) -> EtlResult<Arc<dyn DatabaseBackend>> {
    match config.backend {
        BackendType::SQLite => Ok(Arc::new(SqliteBackend::open(config.name.clone())?)),
        #[cfg(feature = "postgres")]
        BackendType::PostgreSQL => Ok(Arc::new(postgresql::PostgresBackend::from_config(config)?)),
        #[cfg(not(feature = "postgres"))]
        BackendType::PostgreSQL => Err(etl_rs_core::EtlError::Environment(
            "this build has no PostgreSQL driver (enable the `postgres` feature)".into(),
        )),
    }
}

/// SQLite library version linked into this build.
pub fn sqlite_version() -> &'static str {
    rusqlite::version()
}
