//! Logging integration for etl-rs.
//!
//! Provides helpers for configuring [`tracing`]-based logging from
//! [`Settings`](crate::settings::Settings) and for creating per-stage spans
//! keyed by stage name and correlation id.

use uuid::Uuid;

use crate::settings::Settings;

/// Sets up the global tracing subscriber based on the given settings.
///
/// The filter is read from `settings.log_level`. Debug mode or
/// `log_format = "pretty"` selects a human-readable format; anything else
/// emits structured JSON. Installing twice is a no-op.
pub fn setup_logging(settings: &Settings) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&settings.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    if settings.debug || settings.log_format.eq_ignore_ascii_case("pretty") {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .pretty()
            .try_init()
            .ok();
    } else {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .json()
            .try_init()
            .ok();
    }
}

/// Creates a tracing span for one pipeline stage.
///
/// Every event emitted while the span is entered carries the stage name,
/// the run id and the correlation id.
///
/// # Examples
///
/// ```
/// use etl_rs_core::logging::stage_span;
///
/// let span = stage_span("profile", uuid::Uuid::new_v4(), 7);
/// let _guard = span.enter();
/// tracing::info!("sampling source");
/// ```
pub fn stage_span(stage: &str, correlation_id: Uuid, run_id: u64) -> tracing::Span {
    tracing::info_span!(
        "stage",
        stage = stage,
        correlation_id = %correlation_id,
        run_id = run_id
    )
}
