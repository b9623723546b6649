//! Retry policy for calls against the target database.
//!
//! Only errors classified as transient ([`EtlError::is_transient`]) are
//! retried. Every other error, and cancellation, stops the loop at once.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::error::{EtlError, EtlResult};
use crate::settings::RetrySettings;

/// Exponential backoff with bounded jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Cap on any single delay.
    pub max_delay: Duration,
    /// Jitter as a fraction of the delay.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(s: &RetrySettings) -> Self {
        Self {
            max_attempts: s.max_attempts.max(1),
            base_delay: Duration::from_millis(s.base_delay_ms),
            max_delay: Duration::from_millis(s.max_delay_ms),
            jitter: s.jitter.clamp(0.0, 1.0),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: 0.0,
        }
    }

    /// Delay before retry number `retry` (1-based), without jitter.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Delay before retry number `retry` with jitter applied.
    pub fn delay_with_jitter(&self, retry: u32) -> Duration {
        let base = self.backoff(retry);
        if self.jitter <= 0.0 || base.is_zero() {
            return base;
        }
        let spread = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        base.mul_f64((1.0 + spread).max(0.0)).min(self.max_delay)
    }

    /// Runs `f` until it succeeds, fails permanently or attempts run out.
    pub async fn run<T, F, Fut>(&self, op: &str, cancel: &CancellationToken, mut f: F) -> EtlResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = EtlResult<T>>,
    {
        let mut attempt = 1;
        loop {
            if cancel.is_cancelled() {
                return Err(EtlError::Cancelled(format!("{op} cancelled")));
            }
            match f().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.delay_with_jitter(attempt);
                    tracing::warn!(
                        op = op,
                        attempt = attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "transient failure, retrying"
                    );
                    tokio::select! {
                        () = cancel.cancelled() => {
                            return Err(EtlError::Cancelled(format!("{op} cancelled during backoff")));
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: 0.5,
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let p = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
            jitter: 0.0,
        };
        assert_eq!(p.backoff(1), Duration::from_millis(100));
        assert_eq!(p.backoff(2), Duration::from_millis(200));
        assert_eq!(p.backoff(3), Duration::from_millis(300));
        assert_eq!(p.delay_with_jitter(2), Duration::from_millis(200));
    }

    #[test]
    fn test_jitter_stays_bounded() {
        let p = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            jitter: 0.2,
        };
        for _ in 0..100 {
            let d = p.delay_with_jitter(1);
            assert!(d >= Duration::from_millis(80) && d <= Duration::from_millis(120));
        }
    }

    #[test]
    fn test_from_settings() {
        let p = RetryPolicy::from(&RetrySettings::default());
        assert_eq!(p.max_attempts, 2);
        assert_eq!(p.base_delay, Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_transient_error_retried_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = fast(2)
            .run("insert", &CancellationToken::new(), || {
                let c = Arc::clone(&c);
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(EtlError::transient("connection reset"))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_attempts_exhausted() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result: EtlResult<()> = fast(2)
            .run("insert", &CancellationToken::new(), || {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(EtlError::transient("timeout"))
                }
            })
            .await;
        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result: EtlResult<()> = fast(5)
            .run("insert", &CancellationToken::new(), || {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(EtlError::target("invalid input syntax for type integer"))
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_attempt() {
        let token = CancellationToken::new();
        token.cancel();
        let result = fast(3).run("insert", &token, || async { Ok(1) }).await;
        assert!(matches!(result, Err(EtlError::Cancelled(_))));
    }
}
