//! Core error types for etl-rs.
//!
//! Every stage of the pipeline reports failures through [`EtlError`]. The
//! variants follow the pipeline's error taxonomy: configuration problems are
//! caught at invocation, environment problems are surfaced by preflight and
//! health checks, integrity problems come from checksum mismatches, and the
//! transaction/target variants always send a run down the rollback path.

use thiserror::Error;

/// The primary error type for etl-rs.
///
/// Each variant carries a human-readable reason. [`EtlError::code`] gives the
/// stable machine-readable code written into failure reports.
#[derive(Error, Debug)]
pub enum EtlError {
    // ── Invocation ───────────────────────────────────────────────────

    /// Bad inputs or settings. Never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    // ── Environment ──────────────────────────────────────────────────

    /// Disk, memory, connectivity or tooling problems. The operator must
    /// remediate and retry.
    #[error("Environment error: {0}")]
    Environment(String),

    // ── Data safety ──────────────────────────────────────────────────

    /// A checksum did not match its recorded value.
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// Profiled data quality is below the safety threshold.
    #[error("Circuit breaker halted the run: {0}")]
    CircuitBreakerHalt(String),

    // ── Writes ───────────────────────────────────────────────────────

    /// A write failed mid-transaction in the cleaner or migrator.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// The target database rejected or failed an operation.
    #[error("Target error: {message}")]
    Target {
        /// The driver's error message.
        message: String,
        /// Whether the failure is a transient network/pool problem.
        transient: bool,
    },

    /// A local (source or cleaned snapshot) database error.
    #[error("Database error: {0}")]
    Database(String),

    // ── Plumbing ─────────────────────────────────────────────────────

    /// Report or manifest (de)serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The run was cancelled cooperatively.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EtlError {
    /// Creates a non-transient target error.
    pub fn target(message: impl Into<String>) -> Self {
        Self::Target {
            message: message.into(),
            transient: false,
        }
    }

    /// Creates a transient target error (network blip, pool exhaustion).
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Target {
            message: message.into(),
            transient: true,
        }
    }

    /// Returns the stable machine-readable code for this error.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Environment(_) => "ENVIRONMENT_ERROR",
            Self::Integrity(_) => "INTEGRITY_ERROR",
            Self::CircuitBreakerHalt(_) => "CIRCUIT_BREAKER_HALT",
            Self::Transaction(_) => "TRANSACTION_ERROR",
            Self::Target { .. } => "TARGET_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Cancelled(_) => "CANCELLED",
            Self::Io(_) => "IO_ERROR",
        }
    }

    /// Returns `true` if a bounded retry may succeed.
    ///
    /// Only target failures classified as transient qualify.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Target { transient: true, .. })
    }

    /// Returns `true` if this error, raised mid-stage, must trigger the
    /// rollback path rather than a plain failure.
    pub const fn triggers_rollback(&self) -> bool {
        matches!(
            self,
            Self::Transaction(_)
                | Self::Target { .. }
                | Self::Cancelled(_)
                | Self::Integrity(_)
                | Self::Environment(_)
                | Self::Database(_)
                | Self::Io(_)
        )
    }

    /// Returns the human-readable reason without the category prefix.
    pub fn reason(&self) -> String {
        match self {
            Self::Configuration(m)
            | Self::Environment(m)
            | Self::Integrity(m)
            | Self::CircuitBreakerHalt(m)
            | Self::Transaction(m)
            | Self::Database(m)
            | Self::Serialization(m)
            | Self::Cancelled(m)
            | Self::Target { message: m, .. } => m.clone(),
            Self::Io(e) => e.to_string(),
        }
    }

    /// Returns the process exit code for this error.
    ///
    /// Errors are always hard failures; warnings never surface as errors.
    pub const fn exit_code(&self) -> i32 {
        1
    }
}

impl From<serde_json::Error> for EtlError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// A convenience type alias for `Result<T, EtlError>`.
pub type EtlResult<T> = Result<T, EtlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(EtlError::Configuration("x".into()).code(), "CONFIGURATION_ERROR");
        assert_eq!(EtlError::Environment("x".into()).code(), "ENVIRONMENT_ERROR");
        assert_eq!(EtlError::Integrity("x".into()).code(), "INTEGRITY_ERROR");
        assert_eq!(
            EtlError::CircuitBreakerHalt("x".into()).code(),
            "CIRCUIT_BREAKER_HALT"
        );
        assert_eq!(EtlError::Transaction("x".into()).code(), "TRANSACTION_ERROR");
        assert_eq!(EtlError::target("x").code(), "TARGET_ERROR");
        assert_eq!(EtlError::Cancelled("x".into()).code(), "CANCELLED");
    }

    #[test]
    fn test_only_transient_target_errors_retry() {
        assert!(EtlError::transient("connection reset").is_transient());
        assert!(!EtlError::target("syntax error").is_transient());
        assert!(!EtlError::Transaction("disk full".into()).is_transient());
        assert!(!EtlError::Integrity("mismatch".into()).is_transient());
    }

    #[test]
    fn test_rollback_classification() {
        assert!(EtlError::Transaction("x".into()).triggers_rollback());
        assert!(EtlError::target("x").triggers_rollback());
        assert!(EtlError::Cancelled("x".into()).triggers_rollback());
        assert!(!EtlError::Configuration("x".into()).triggers_rollback());
        assert!(!EtlError::CircuitBreakerHalt("x".into()).triggers_rollback());
    }

    #[test]
    fn test_display_and_reason() {
        let err = EtlError::CircuitBreakerHalt("2 of 3 columns ambiguous".into());
        assert_eq!(
            err.to_string(),
            "Circuit breaker halted the run: 2 of 3 columns ambiguous"
        );
        assert_eq!(err.reason(), "2 of 3 columns ambiguous");
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: EtlError = io_err.into();
        assert_eq!(err.code(), "IO_ERROR");
        assert!(err.to_string().contains("denied"));
    }
}
