//! Loads the remediated sample into the target inside a transaction that is
//! always rolled back, so type-coercion failures surface before any data is
//! written.

use etl_rs_db::{DatabaseBackend, SchemaEditor, Statement, TableSpec, Value};

use crate::remediation::ColumnRemediation;
use crate::report::DryRunOutcome;

/// Upper bound on bound parameters per `INSERT`.
const MAX_PARAMS: usize = 900;

/// One table's sample, ready to load.
#[derive(Debug, Clone)]
pub struct DryRunTable {
    /// Resolved table spec.
    pub spec: TableSpec,
    /// Cleaning rules per column.
    pub rules: Vec<ColumnRemediation>,
    /// Raw sampled rows.
    pub rows: Vec<Vec<Value>>,
}

/// Statements that create a scratch copy of every table and insert the
/// remediated sample.
pub fn statements(editor: &dyn SchemaEditor, run_id: u64, tables: &[DryRunTable]) -> (Vec<Statement>, usize) {
    let mut out = Vec::new();
    let mut inserted = 0;
    for table in tables {
        out.extend(
            editor
                .create_staging(run_id, &table.spec)
                .into_iter()
                .map(Statement::ddl),
        );
        let width = table.spec.columns.len().max(1);
        let per_stmt = (MAX_PARAMS / width).max(1);
        let staging = editor.staging_table(run_id, &table.spec.name);
        for chunk in table.rows.chunks(per_stmt) {
            let mut params = Vec::with_capacity(chunk.len() * width);
            for row in chunk {
                for ((value, rule), column) in row.iter().zip(&table.rules).zip(&table.spec.columns) {
                    let cleaned = rule.apply(value).value;
                    params.push(editor.bind_value(&cleaned, column));
                }
            }
            out.push(Statement::new(
                editor.insert_sql(&staging, &table.spec, chunk.len()),
                params,
            ));
            inserted += chunk.len();
        }
    }
    (out, inserted)
}

/// Runs the dry-run. Never leaves anything behind in the target.
pub async fn run(
    backend: &dyn DatabaseBackend,
    editor: &dyn SchemaEditor,
    run_id: u64,
    tables: &[DryRunTable],
) -> DryRunOutcome {
    let (stmts, rows) = statements(editor, run_id, tables);
    let result = backend.dry_run(&stmts).await;
    match &result {
        Ok(()) => tracing::info!(tables = tables.len(), rows, "Target dry-run succeeded"),
        Err(e) => tracing::warn!(error = %e, "Target dry-run failed"),
    }
    DryRunOutcome {
        backend: backend.vendor().to_string(),
        tables: tables.len(),
        rows,
        ok: result.is_ok(),
        error: result.err().map(|e| e.reason()),
    }
}
