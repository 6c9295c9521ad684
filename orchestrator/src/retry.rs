//! Bounded retry with exponential backoff.
//!
//! Shared by the ledger, capability and scorer boundaries: each call site
//! decides which errors are transient, this module only decides when to stop.

use std::future::Future;
use std::time::Duration;

/// Retry budget and delay curve for one collaborator boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Total attempts including the first call.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl BackoffPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms,
            max_delay_ms,
        }
    }

    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        let delay_ms = self
            .base_delay_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(3, 200, 5_000)
    }
}

/// Terminal failure of a retried operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryFailure<E> {
    pub error: E,
    pub attempts: u32,
    /// True when the last error was transient and the budget ran out.
    pub exhausted: bool,
}

/// Run `op` until it succeeds, fails permanently, or the attempt budget is spent.
pub async fn retry_with_backoff<T, E, F, Fut, C>(
    policy: BackoffPolicy,
    label: &str,
    mut op: F,
    is_transient: C,
) -> Result<T, RetryFailure<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) if !is_transient(&error) => {
                return Err(RetryFailure {
                    error,
                    attempts: attempt,
                    exhausted: false,
                });
            }
            Err(error) if attempt >= policy.max_attempts => {
                tracing::warn!(
                    operation = label,
                    attempts = attempt,
                    error = %error,
                    "Retry budget exhausted"
                );
                return Err(RetryFailure {
                    error,
                    attempts: attempt,
                    exhausted: true,
                });
            }
            Err(error) => {
                let delay = policy.delay_for(attempt);
                tracing::debug!(
                    operation = label,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
