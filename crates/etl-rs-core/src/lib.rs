//! # etl-rs-core
//!
//! Core types for the etl-rs pipeline. Every other crate depends on this one.
//!
//! ## Modules
//!
//! - [`error`] - The [`EtlError`] taxonomy and result alias
//! - [`settings`] / [`settings_loader`] - Settings with defaults, file and env loading
//! - [`logging`] - Tracing subscriber setup and per-stage spans
//! - [`observability`] - Metrics registry and progress/ETA tracking
//! - [`context`] - [`RunContext`], passed explicitly to every stage
//! - [`retry`] - Retry policy for target calls
//! - [`health`] - Host probes and the periodic health monitor
//! - [`utils`] - Checksums and atomic file writes

pub mod context;
pub mod error;
pub mod health;
pub mod logging;
pub mod observability;
pub mod retry;
pub mod settings;
pub mod settings_loader;
pub mod utils;

pub use context::RunContext;
pub use error::{EtlError, EtlResult};
pub use retry::RetryPolicy;
pub use settings::Settings;
