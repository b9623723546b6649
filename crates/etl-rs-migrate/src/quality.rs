//! The Quality Score.
//!
//! Re-validates every cell of a cleaned snapshot against the column specs
//! the profiler resolved. The score is the percentage of checked cells that
//! conform. Checked cells are the non-null ones plus those cleaning set to
//! NULL as unparseable, which never conform. No cell of an ambiguous column
//! conforms. Otherwise string columns always conform.

use etl_rs_clean::{CleanedReader, CleanedSnapshot};
use etl_rs_core::{EtlResult, RunContext};
use etl_rs_profile::conforms;
use serde::{Deserialize, Serialize};

/// Rows read per page while scoring.
const PAGE: usize = 2000;

/// Conformance of one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnQuality {
    pub table: String,
    pub column: String,
    /// Non-null cells checked, plus `nulled`.
    pub checked: u64,
    /// Cells that conform to the column's logical type.
    pub conforming: u64,
    /// Cells cleaning set to NULL as unparseable.
    #[serde(default)]
    pub nulled: u64,
    #[serde(default)]
    pub ambiguous: bool,
}

/// The Quality Score of a cleaned snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    /// 0 to 100.
    pub score: f64,
    pub checked: u64,
    pub conforming: u64,
    pub columns: Vec<ColumnQuality>,
}

impl QualityScore {
    /// Builds the score from per-column counts.
    #[allow(clippy::cast_precision_loss)]
    pub fn from_columns(columns: Vec<ColumnQuality>) -> Self {
        let checked: u64 = columns.iter().map(|c| c.checked).sum();
        let conforming: u64 = columns.iter().map(|c| c.conforming).sum();
        let score = if checked == 0 {
            100.0
        } else {
            conforming as f64 * 100.0 / checked as f64
        };
        Self {
            score,
            checked,
            conforming,
            columns,
        }
    }

    /// Returns `true` if the score reaches `floor`.
    pub fn passes(&self, floor: f64) -> bool {
        self.score >= floor
    }

    /// Columns with at least one non-conforming cell, as `table.column`.
    pub fn offending_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.conforming < c.checked)
            .map(|c| format!("{}.{}", c.table, c.column))
            .collect()
    }
}

/// Scores `snapshot` by reading every row.
///
/// Checks the run's cancellation token once per page.
pub async fn score(ctx: &RunContext, snapshot: &CleanedSnapshot) -> EtlResult<QualityScore> {
    let reader = CleanedReader::open(snapshot)?;
    let mut columns = Vec::new();
    for table in &snapshot.tables {
        let spec = &table.spec;
        let mut counts: Vec<ColumnQuality> = spec
            .columns
            .iter()
            .map(|c| {
                let nulled = table.nulled_in(&c.name);
                ColumnQuality {
                    table: spec.name.clone(),
                    column: c.name.clone(),
                    checked: nulled,
                    conforming: 0,
                    nulled,
                    ambiguous: table.is_ambiguous(&c.name),
                }
            })
            .collect();
        let mut after = None;
        loop {
            ctx.check_cancelled()?;
            let page = reader.page(spec, after, PAGE).await?;
            if page.is_empty() {
                break;
            }
            after = page.last_rowid;
            for row in &page.rows {
                for ((col, value), count) in spec.columns.iter().zip(row).zip(counts.iter_mut()) {
                    if value.is_null() {
                        continue;
                    }
                    count.checked += 1;
                    if !count.ambiguous && conforms(col, value) {
                        count.conforming += 1;
                    }
                }
            }
        }
        columns.extend(counts);
    }
    let score = QualityScore::from_columns(columns);
    ctx.metrics.gauge("migrate.quality_score", score.score);
    tracing::info!(
        score = score.score,
        checked = score.checked,
        conforming = score.conforming,
        nulled = score.columns.iter().map(|c| c.nulled).sum::<u64>(),
        "Quality score computed"
    );
    Ok(score)
}
