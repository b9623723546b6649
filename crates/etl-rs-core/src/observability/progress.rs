//! Progress tracking with throughput and ETA.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

/// A point-in-time progress reading.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Progress {
    /// Rows processed so far.
    pub processed: u64,
    /// Total rows expected.
    pub total: u64,
    /// Completion percentage in `[0, 100]`.
    pub percent: f64,
    /// Observed throughput.
    pub rows_per_sec: f64,
    /// Estimated time to completion; `None` until throughput is known.
    #[serde(serialize_with = "serialize_eta")]
    pub eta: Option<Duration>,
}

#[allow(clippy::ref_option)]
fn serialize_eta<S: serde::Serializer>(eta: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
    match eta {
        Some(d) => s.serialize_some(&d.as_secs_f64()),
        None => s.serialize_none(),
    }
}

/// Tracks a running count against a known total.
///
/// `advance` is a single atomic add so it can be called per row.
#[derive(Debug)]
pub struct ProgressTracker {
    stage: String,
    total: u64,
    processed: AtomicU64,
    started: Instant,
    report_every: Duration,
    /// Milliseconds since `started` of the last emitted report.
    last_report_ms: AtomicU64,
}

impl ProgressTracker {
    /// Creates a tracker for `total` rows that reports at most every 5 s.
    pub fn new(stage: impl Into<String>, total: u64) -> Self {
        Self::with_interval(stage, total, Duration::from_secs(5))
    }

    /// Creates a tracker with a custom report interval.
    pub fn with_interval(stage: impl Into<String>, total: u64, report_every: Duration) -> Self {
        Self {
            stage: stage.into(),
            total,
            processed: AtomicU64::new(0),
            started: Instant::now(),
            report_every,
            last_report_ms: AtomicU64::new(0),
        }
    }

    /// Adds `rows` to the processed count.
    pub fn advance(&self, rows: u64) {
        self.processed.fetch_add(rows, Ordering::Relaxed);
    }

    /// Returns the processed count.
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Computes the current reading.
    pub fn snapshot(&self) -> Progress {
        compute(self.processed(), self.total, self.started.elapsed())
    }

    /// Returns `true` at most once per report interval.
    pub fn should_report(&self) -> bool {
        let now_ms = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let last = self.last_report_ms.load(Ordering::Relaxed);
        let every = u64::try_from(self.report_every.as_millis()).unwrap_or(u64::MAX);
        if now_ms.saturating_sub(last) < every {
            return false;
        }
        self.last_report_ms
            .compare_exchange(last, now_ms, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    }

    /// Emits a progress event if the report interval has elapsed.
    pub fn maybe_report(&self) {
        if self.should_report() {
            self.report();
        }
    }

    /// Emits a progress event unconditionally.
    pub fn report(&self) {
        let p = self.snapshot();
        tracing::info!(
            stage = %self.stage,
            processed = p.processed,
            total = p.total,
            percent = p.percent,
            rows_per_sec = p.rows_per_sec,
            eta_secs = p.eta.map(|d| d.as_secs_f64()),
            "progress"
        );
    }
}

/// Pure progress arithmetic, separated for testing.
#[allow(clippy::cast_precision_loss)]
pub fn compute(processed: u64, total: u64, elapsed: Duration) -> Progress {
    let secs = elapsed.as_secs_f64();
    let rows_per_sec = if secs > 0.0 { processed as f64 / secs } else { 0.0 };
    let percent = if total == 0 {
        100.0
    } else {
        (processed.min(total) as f64 / total as f64) * 100.0
    };
    let remaining = total.saturating_sub(processed);
    let eta = if remaining == 0 {
        Some(Duration::ZERO)
    } else if rows_per_sec > 0.0 {
        Some(Duration::from_secs_f64(remaining as f64 / rows_per_sec))
    } else {
        None
    };
    Progress {
        processed,
        total,
        percent,
        rows_per_sec,
        eta,
    }
}
