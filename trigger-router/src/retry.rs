//! Retry executor
//!
//! Runs a fallible async operation up to `max_attempts` times, waiting between
//! attempts (doubling the wait when backoff is enabled). Errors carrying the
//! `NonRetryable` marker stop immediately, and a shutdown during a wait ends
//! the loop with a `Cancelled` error.

use crate::error::{is_non_retryable, Cancelled};
use crate::shutdown::ShutdownSignal;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Retry settings (`[retry]` config section)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub exponential_backoff: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            exponential_backoff: true,
        }
    }
}

impl RetryPolicy {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    /// Run `op` until it succeeds, fails non-retryably or attempts run out
    ///
    /// The final error wraps the last underlying error and states the number
    /// of attempts made.
    pub async fn run<T, F, Fut>(&self, signal: &ShutdownSignal, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut delay = self.initial_delay();
        let mut last_err = None;

        for attempt in 1..=attempts {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        log::debug!("{} succeeded on attempt {}", label, attempt);
                    }
                    return Ok(value);
                }
                Err(e) if is_non_retryable(&e) => {
                    log::debug!("{} failed with non-retryable error: {:#}", label, e);
                    return Err(e);
                }
                Err(e) => {
                    log::warn!("{} attempt {}/{} failed: {:#}", label, attempt, attempts, e);
                    last_err = Some(e);
                }
            }

            if attempt < attempts {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = signal.cancelled() => {
                        let err = last_err.unwrap_or_else(|| anyhow!("{} interrupted", label));
                        return Err(err.context(Cancelled));
                    }
                }
                if self.exponential_backoff {
                    delay = delay.saturating_mul(2);
                }
            }
        }

        let err = last_err.unwrap_or_else(|| anyhow!("{} made no attempts", label));
        Err(err.context(format!("{} failed after {} attempts", label, attempts)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{is_cancelled, non_retryable};
    use crate::shutdown::Shutdown;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay_ms: 1,
            exponential_backoff: true,
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let shutdown = Shutdown::new();
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let value = fast(3)
            .run(&shutdown.signal(), "flaky", || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(anyhow!("transient"))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_attempt_count() {
        let shutdown = Shutdown::new();
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let err = fast(3)
            .run(&shutdown.signal(), "push", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(anyhow!("queue unavailable"))
                }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let text = format!("{:#}", err);
        assert!(text.contains("failed after 3 attempts"), "{text}");
        assert!(text.contains("queue unavailable"), "{text}");
    }

    #[tokio::test]
    async fn test_non_retryable_stops_immediately() {
        let shutdown = Shutdown::new();
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let err = fast(5)
            .run(&shutdown.signal(), "decode", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(non_retryable(anyhow!("malformed")))
                }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(crate::error::is_non_retryable(&err));
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_wait() {
        let shutdown = Shutdown::new();
        let signal = shutdown.signal();
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_delay_ms: 60_000,
            exponential_backoff: false,
        };

        let task = tokio::spawn(async move {
            policy
                .run(&signal, "slow", || async { Err::<(), _>(anyhow!("down")) })
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.trigger();

        let err = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert!(is_cancelled(&err));
    }
}
