//! # etl-rs-profile
//!
//! The Data Profiler. Samples every table of the source, infers each
//! column's logical type and timestamp layout with a confidence score, and
//! evaluates the circuit breaker over the findings.
//!
//! ## Modules
//!
//! - [`formats`] - The fixed enumeration of timestamp layouts
//! - [`inference`] - Pure inference over a column sample
//! - [`sampler`] - Seeded row sampling from the read-only source
//! - [`circuit_breaker`] - PROCEED/HALT policy
//! - [`remediation`] - Cleaning rules applied by the cleaner
//! - [`dry_run`] - Rolled-back load of the remediated sample into the target
//! - [`report`] - The Profile Report and its JSON form
//! - [`profiler`] - The stage driver

pub mod circuit_breaker;
pub mod dry_run;
pub mod formats;
pub mod inference;
pub mod profiler;
pub mod remediation;
pub mod report;
pub mod sampler;

pub use circuit_breaker::{CircuitBreakerDecision, CircuitBreakerPolicy, Verdict};
pub use formats::TimestampFormat;
pub use inference::{infer, InferenceResult};
pub use profiler::{DryRunTarget, Profiler};
pub use remediation::{conforms, ColumnRemediation, Outcome};
pub use report::{ColumnProfile, ProfileReport, RemediationPlan};
