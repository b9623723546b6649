//! Metric emission: counters, gauges and histograms.
//!
//! Recording is a concurrent map lookup plus an atomic update, so stages can
//! record per row. Nothing is written to a sink until [`MetricsRegistry::snapshot`]
//! or [`MetricsRegistry::emit_to_tracing`] is called.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Upper bucket bounds (milliseconds) for duration histograms.
const DEFAULT_BUCKETS_MS: [f64; 12] = [
    0.1, 0.5, 1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1_000.0, 5_000.0, 30_000.0, 120_000.0,
];

/// A fixed-bucket histogram.
#[derive(Debug)]
pub struct Histogram {
    bounds: Vec<f64>,
    buckets: Vec<AtomicU64>,
    count: AtomicU64,
    /// Sum stored as `f64` bits.
    sum_bits: AtomicU64,
}

impl Histogram {
    /// Creates a histogram with the given ascending upper bounds. Values
    /// above the last bound land in an implicit overflow bucket.
    pub fn with_bounds(bounds: &[f64]) -> Self {
        Self {
            bounds: bounds.to_vec(),
            buckets: (0..=bounds.len()).map(|_| AtomicU64::new(0)).collect(),
            count: AtomicU64::new(0),
            sum_bits: AtomicU64::new(0f64.to_bits()),
        }
    }

    /// Records one observation.
    pub fn observe(&self, value: f64) {
        let idx = self
            .bounds
            .iter()
            .position(|b| value <= *b)
            .unwrap_or(self.bounds.len());
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        let _ = self
            .sum_bits
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some((f64::from_bits(bits) + value).to_bits())
            });
    }

    fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            count: self.count.load(Ordering::Relaxed),
            sum: f64::from_bits(self.sum_bits.load(Ordering::Relaxed)),
            bounds: self.bounds.clone(),
            buckets: self
                .buckets
                .iter()
                .map(|b| b.load(Ordering::Relaxed))
                .collect(),
        }
    }
}

/// A point-in-time view of one histogram.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistogramSnapshot {
    /// Number of observations.
    pub count: u64,
    /// Sum of all observations.
    pub sum: f64,
    /// Upper bounds of the buckets.
    pub bounds: Vec<f64>,
    /// Per-bucket counts; the last entry is the overflow bucket.
    pub buckets: Vec<u64>,
}

impl HistogramSnapshot {
    /// Mean of the observations, or 0 when empty.
    #[allow(clippy::cast_precision_loss)]
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

/// A point-in-time view of all metrics, ordered by name.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MetricsSnapshot {
    /// Monotonic counters.
    pub counters: BTreeMap<String, u64>,
    /// Last-written gauges.
    pub gauges: BTreeMap<String, f64>,
    /// Histograms.
    pub histograms: BTreeMap<String, HistogramSnapshot>,
}

/// Registry of named metrics shared by every stage of a run.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    counters: DashMap<String, AtomicU64>,
    gauges: DashMap<String, AtomicU64>,
    histograms: DashMap<String, Histogram>,
}

impl MetricsRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `delta` to a counter.
    pub fn incr(&self, name: &str, delta: u64) {
        if let Some(c) = self.counters.get(name) {
            c.fetch_add(delta, Ordering::Relaxed);
            return;
        }
        self.counters
            .entry(name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(delta, Ordering::Relaxed);
    }

    /// Sets a gauge.
    pub fn gauge(&self, name: &str, value: f64) {
        if let Some(g) = self.gauges.get(name) {
            g.store(value.to_bits(), Ordering::Relaxed);
            return;
        }
        self.gauges
            .entry(name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .store(value.to_bits(), Ordering::Relaxed);
    }

    /// Records a histogram observation.
    pub fn observe(&self, name: &str, value: f64) {
        if let Some(h) = self.histograms.get(name) {
            h.observe(value);
            return;
        }
        self.histograms
            .entry(name.to_string())
            .or_insert_with(|| Histogram::with_bounds(&DEFAULT_BUCKETS_MS))
            .observe(value);
    }

    /// Records a duration, in milliseconds, into a histogram.
    pub fn observe_duration(&self, name: &str, elapsed: Duration) {
        self.observe(name, elapsed.as_secs_f64() * 1_000.0);
    }

    /// Returns the current value of a counter (0 if never recorded).
    pub fn counter(&self, name: &str) -> u64 {
        self.counters
            .get(name)
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    /// Returns the current value of a gauge, if set.
    pub fn gauge_value(&self, name: &str) -> Option<f64> {
        self.gauges
            .get(name)
            .map(|g| f64::from_bits(g.load(Ordering::Relaxed)))
    }

    /// Takes a consistent-enough snapshot of every metric.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self
                .counters
                .iter()
                .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
                .collect(),
            gauges: self
                .gauges
                .iter()
                .map(|e| {
                    (
                        e.key().clone(),
                        f64::from_bits(e.value().load(Ordering::Relaxed)),
                    )
                })
                .collect(),
            histograms: self
                .histograms
                .iter()
                .map(|e| (e.key().clone(), e.value().snapshot()))
                .collect(),
        }
    }

    /// Flushes the current snapshot as structured tracing events.
    pub fn emit_to_tracing(&self) {
        let snap = self.snapshot();
        for (name, value) in &snap.counters {
            tracing::info!(metric = %name, kind = "counter", value = *value, "metric");
        }
        for (name, value) in &snap.gauges {
            tracing::info!(metric = %name, kind = "gauge", value = *value, "metric");
        }
        for (name, h) in &snap.histograms {
            tracing::info!(
                metric = %name,
                kind = "histogram",
                count = h.count,
                mean = h.mean(),
                "metric"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_counter_accumulates() {
        let m = MetricsRegistry::new();
        m.incr("rows_processed", 10);
        m.incr("rows_processed", 5);
        assert_eq!(m.counter("rows_processed"), 15);
        assert_eq!(m.counter("missing"), 0);
    }

    #[test]
    fn test_gauge_overwrites() {
        let m = MetricsRegistry::new();
        m.gauge("quality_score", 79.0);
        m.gauge("quality_score", 81.5);
        assert_eq!(m.gauge_value("quality_score"), Some(81.5));
    }

    #[test]
    fn test_histogram_buckets() {
        let h = Histogram::with_bounds(&[1.0, 10.0]);
        h.observe(0.5);
        h.observe(5.0);
        h.observe(50.0);
        let snap = h.snapshot();
        assert_eq!(snap.count, 3);
        assert_eq!(snap.buckets, vec![1, 1, 1]);
        assert!((snap.sum - 55.5).abs() < 1e-9);
        assert!((snap.mean() - 18.5).abs() < 1e-9);
    }

    #[test]
    fn test_snapshot_is_sorted_and_serializable() {
        let m = MetricsRegistry::new();
        m.incr("b", 1);
        m.incr("a", 2);
        m.observe_duration("stage_ms", Duration::from_millis(3));
        let snap = m.snapshot();
        let names: Vec<_> = snap.counters.keys().cloned().collect();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
        let json = serde_json::to_string(&snap).unwrap();
        assert!(json.contains("stage_ms"));
    }

    #[test]
    fn test_concurrent_increments() {
        let m = Arc::new(MetricsRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let m = Arc::clone(&m);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        m.incr("rows", 1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(m.counter("rows"), 8000);
    }
}
