//! Introspection fingerprints of a target.
//!
//! A fingerprint lists every user table with its columns, row count and an
//! order-independent digest of its contents. Two fingerprints are equal
//! exactly when the target's schema and data are the same, which is how a
//! rollback proves it left the target as it found it.

use std::fmt::Write as _;

use etl_rs_core::utils::{sha256_hex, RowDigest};
use etl_rs_core::EtlResult;
use etl_rs_db::{DatabaseBackend, SchemaEditor, Value};
use serde::{Deserialize, Serialize};

/// One table of a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableFingerprint {
    pub namespace: String,
    pub name: String,
    /// `(name, type)` in column order.
    pub columns: Vec<(String, String)>,
    pub rows: u64,
    pub digest: String,
}

/// Every user table of a target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetFingerprint {
    pub tables: Vec<TableFingerprint>,
}

impl TargetFingerprint {
    /// Digest of the whole fingerprint.
    pub fn digest(&self) -> String {
        let mut joined = String::new();
        for t in &self.tables {
            let _ = writeln!(joined, "{}.{}:{}:{}", t.namespace, t.name, t.rows, t.digest);
            for (name, ty) in &t.columns {
                let _ = writeln!(joined, "  {name} {ty}");
            }
        }
        sha256_hex(joined.as_bytes())
    }

    /// Looks up a table.
    pub fn table(&self, namespace: &str, name: &str) -> Option<&TableFingerprint> {
        self.tables
            .iter()
            .find(|t| t.namespace == namespace && t.name == name)
    }

    /// Human-readable differences from `other`, empty when equal.
    pub fn differences(&self, other: &Self) -> Vec<String> {
        let mut out = Vec::new();
        for t in &self.tables {
            match other.table(&t.namespace, &t.name) {
                None => out.push(format!("{}.{} only before", t.namespace, t.name)),
                Some(o) if o != t => out.push(format!(
                    "{}.{} changed ({} rows -> {} rows)",
                    t.namespace, t.name, t.rows, o.rows
                )),
                Some(_) => {}
            }
        }
        for o in &other.tables {
            if self.table(&o.namespace, &o.name).is_none() {
                out.push(format!("{}.{} only after", o.namespace, o.name));
            }
        }
        out
    }
}

fn text(v: Option<&Value>) -> String {
    v.and_then(Value::render).unwrap_or_default()
}

/// Reads the fingerprint of the target behind `backend`.
pub async fn fingerprint(
    backend: &dyn DatabaseBackend,
    editor: &dyn SchemaEditor,
) -> EtlResult<TargetFingerprint> {
    let listed = backend.query(&editor.list_tables_sql(), &[]).await?;
    let mut tables = Vec::with_capacity(listed.len());
    for row in listed {
        let namespace = text(row.get_value("namespace"));
        let name = text(row.get_value("name"));

        let q = editor.list_columns_query(&namespace, &name);
        let columns = backend
            .query(&q.sql, &q.params)
            .await?
            .iter()
            .map(|c| (text(c.get_value("name")), text(c.get_value("type"))))
            .collect();

        let qualified = editor.qualified(&namespace, &name);
        let data = backend.query(&editor.select_all_sql(&qualified), &[]).await?;
        let mut digest = RowDigest::new();
        for r in &data {
            let rendered: Vec<Option<String>> = r.values().iter().map(Value::render).collect();
            digest.add_row(rendered.iter().map(Option::as_deref));
        }

        tables.push(TableFingerprint {
            namespace,
            name,
            columns,
            rows: data.len() as u64,
            digest: digest.hex(),
        });
    }
    Ok(TargetFingerprint { tables })
}

#[cfg(test)]
mod tests {
    use super::*;
    use etl_rs_db::schema_editor::SqliteSchemaEditor;
    use etl_rs_db::SqliteBackend;

    #[tokio::test]
    async fn test_fingerprint_tracks_data_and_schema() {
        let backend = SqliteBackend::memory().unwrap();
        backend
            .execute("CREATE TABLE a (id INTEGER, name TEXT)", &[])
            .await
            .unwrap();
        backend
            .execute("INSERT INTO a VALUES (1, 'x'), (2, NULL)", &[])
            .await
            .unwrap();

        let before = fingerprint(&backend, &SqliteSchemaEditor).await.unwrap();
        assert_eq!(before.tables.len(), 1);
        let a = before.table("main", "a").unwrap();
        assert_eq!(a.rows, 2);
        assert_eq!(
            a.columns,
            vec![
                ("id".to_string(), "INTEGER".to_string()),
                ("name".to_string(), "TEXT".to_string())
            ]
        );
        assert_eq!(before, fingerprint(&backend, &SqliteSchemaEditor).await.unwrap());

        backend
            .execute("UPDATE a SET name = 'y' WHERE id = 2", &[])
            .await
            .unwrap();
        backend.execute("CREATE TABLE b (z TEXT)", &[]).await.unwrap();
        let after = fingerprint(&backend, &SqliteSchemaEditor).await.unwrap();
        assert_ne!(before.digest(), after.digest());
        let diff = before.differences(&after);
        assert_eq!(diff.len(), 2, "{diff:?}");
        assert!(diff[0].starts_with("main.a changed"));
        assert_eq!(diff[1], "main.b only after");
    }
}
