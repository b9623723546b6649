//! Seeded random row sampling from the read-only source.
//!
//! The sample for a table depends only on the seed, the table name and the
//! table's row count, so profiling the same file twice yields the same
//! report.

use etl_rs_core::utils::sha256_hex;
use etl_rs_core::{EtlResult, RunContext};
use etl_rs_db::sqlite::{db_err, from_value_ref, row_count};
use etl_rs_db::{quote_ident, TableSchema, Value};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Rows between cancellation checks while scanning.
const CHECK_EVERY: usize = 4096;

/// Sampled rows of one table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSample {
    /// Table name.
    pub table: String,
    /// Rows in the table.
    pub row_count: u64,
    /// Sampled rows, values in declaration order.
    pub rows: Vec<Vec<Value>>,
}

impl TableSample {
    /// Values of column `idx` across the sample.
    pub fn column(&self, idx: usize) -> Vec<Value> {
        self.rows
            .iter()
            .map(|r| r.get(idx).cloned().unwrap_or(Value::Null))
            .collect()
    }
}

/// Seed for one table: the run seed mixed with the table name.
pub fn table_seed(seed: u64, table: &str) -> u64 {
    let digest = sha256_hex(table.as_bytes());
    let mixed = u64::from_str_radix(&digest[..16], 16).unwrap_or(0);
    seed ^ mixed
}

/// Sorted row ordinals to keep, or `None` when the whole table fits.
pub fn choose_ordinals(row_count: u64, sample_size: usize, seed: u64) -> Option<Vec<usize>> {
    let total = usize::try_from(row_count).unwrap_or(usize::MAX);
    if total <= sample_size {
        return None;
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut picked = rand::seq::index::sample(&mut rng, total, sample_size).into_vec();
    picked.sort_unstable();
    Some(picked)
}

/// Draws up to `sample_size` rows from `schema`'s table.
///
/// Blocking. Scans the table once; the scan order of an unchanged file is
/// stable, so the chosen ordinals always map to the same rows.
pub fn sample_table(
    ctx: &RunContext,
    conn: &rusqlite::Connection,
    schema: &TableSchema,
    sample_size: usize,
    seed: u64,
) -> EtlResult<TableSample> {
    let count = row_count(conn, &schema.name)?;
    let ordinals = choose_ordinals(count, sample_size, table_seed(seed, &schema.name));

    let cols: Vec<String> = schema.columns.iter().map(|c| quote_ident(&c.name)).collect();
    let sql = format!("SELECT {} FROM {}", cols.join(", "), quote_ident(&schema.name));
    let mut stmt = conn.prepare(&sql).map_err(|e| db_err(&e))?;
    let width = cols.len();
    let mut rows_iter = stmt.query([]).map_err(|e| db_err(&e))?;

    let capacity = ordinals.as_ref().map_or_else(
        || sample_size.min(usize::try_from(count).unwrap_or(usize::MAX)),
        Vec::len,
    );
    let mut rows = Vec::with_capacity(capacity);
    let mut next = 0usize;
    let mut ordinal = 0usize;
    while let Some(row) = rows_iter.next().map_err(|e| db_err(&e))? {
        if ordinal % CHECK_EVERY == 0 {
            ctx.check_cancelled()?;
        }
        let keep = match &ordinals {
            None => true,
            Some(wanted) => wanted.get(next) == Some(&ordinal),
        };
        if keep {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(from_value_ref(row.get_ref(i).map_err(|e| db_err(&e))?));
            }
            rows.push(values);
            next += 1;
            if ordinals.as_ref().is_some_and(|w| next == w.len()) {
                break;
            }
        }
        ordinal += 1;
    }

    Ok(TableSample {
        table: schema.name.clone(),
        row_count: count,
        rows,
    })
}
