//! Observability kit: metric emission and progress tracking.
//!
//! Structured event logging lives in [`crate::logging`]; this module holds
//! the in-process metric registry and the progress/ETA tracker. Both are
//! designed to be called on the per-row path.

pub mod metrics;
pub mod progress;

pub use metrics::{HistogramSnapshot, MetricsRegistry, MetricsSnapshot};
pub use progress::{Progress, ProgressTracker};
