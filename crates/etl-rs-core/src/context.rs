//! Per-run context passed explicitly to every stage.
//!
//! A [`RunContext`] replaces any process-wide pipeline state: it carries the
//! run's identity, its settings, the shared metric registry and the
//! cancellation token that every stage polls at its check points.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{EtlError, EtlResult};
use crate::observability::MetricsRegistry;
use crate::settings::Settings;

/// Everything a stage needs to know about the run it belongs to.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Monotonic run id handed out by the run ledger.
    pub run_id: u64,
    /// Correlation id attached to every log event of the run.
    pub correlation_id: Uuid,
    /// Settings for the run.
    pub settings: Arc<Settings>,
    /// Metrics shared by all stages.
    pub metrics: Arc<MetricsRegistry>,
    cancel: CancellationToken,
}

impl RunContext {
    /// Creates a context with a fresh correlation id and metric registry.
    pub fn new(run_id: u64, settings: Settings) -> Self {
        Self {
            run_id,
            correlation_id: Uuid::new_v4(),
            settings: Arc::new(settings),
            metrics: Arc::new(MetricsRegistry::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Ties the run to `parent`: cancelling `parent` cancels the run.
    #[must_use]
    pub fn with_parent(mut self, parent: &CancellationToken) -> Self {
        self.cancel = parent.child_token();
        self
    }

    /// Returns the run's cancellation token.
    pub const fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Returns a child token: cancelling the run cancels the child, but a
    /// stage may cancel its child (e.g. on a health breach) without
    /// cancelling the whole run.
    pub fn child_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Requests cooperative cancellation of the run.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns `true` if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Returns [`EtlError::Cancelled`] if cancellation has been requested.
    pub fn check_cancelled(&self) -> EtlResult<()> {
        check_token(&self.cancel)
    }

    /// Creates a tracing span for `stage` keyed by this run.
    pub fn stage_span(&self, stage: &str) -> tracing::Span {
        crate::logging::stage_span(stage, self.correlation_id, self.run_id)
    }
}

/// Returns [`EtlError::Cancelled`] if `token` has been cancelled.
pub fn check_token(token: &CancellationToken) -> EtlResult<()> {
    if token.is_cancelled() {
        Err(EtlError::Cancelled("cancellation requested".into()))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_context_is_not_cancelled() {
        let ctx = RunContext::new(1, Settings::default());
        assert!(!ctx.is_cancelled());
        assert!(ctx.check_cancelled().is_ok());
    }

    #[test]
    fn test_cancel_propagates_to_children() {
        let ctx = RunContext::new(2, Settings::default());
        let child = ctx.child_token();
        ctx.cancel();
        assert!(child.is_cancelled());
        assert!(matches!(ctx.check_cancelled(), Err(EtlError::Cancelled(_))));
    }

    #[test]
    fn test_child_cancel_does_not_cancel_run() {
        let ctx = RunContext::new(3, Settings::default());
        let child = ctx.child_token();
        child.cancel();
        assert!(!ctx.is_cancelled());
        assert!(check_token(&child).is_err());
    }

    #[test]
    fn test_parent_cancels_run() {
        let parent = CancellationToken::new();
        let ctx = RunContext::new(5, Settings::default()).with_parent(&parent);
        parent.cancel();
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn test_clones_share_metrics_and_token() {
        let ctx = RunContext::new(4, Settings::default());
        let other = ctx.clone();
        other.metrics.incr("rows", 3);
        assert_eq!(ctx.metrics.counter("rows"), 3);
        other.cancel();
        assert!(ctx.is_cancelled());
        assert_eq!(ctx.correlation_id, other.correlation_id);
    }
}
