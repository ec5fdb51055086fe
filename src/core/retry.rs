//! Bounded retry for external capability calls.
//!
//! One reusable helper parameterized by a retryable-error predicate.
//! Transient failures (transport, 5xx) get a bounded number of attempts
//! with exponential backoff; validation failures are returned immediately.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Retry budget shared by all capability calls in a run
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryBudget {
    /// Maximum number of attempts (including the first try)
    pub max_attempts: u32,

    /// Initial delay between attempts in milliseconds
    pub initial_delay_ms: u64,

    /// Maximum delay between attempts in milliseconds
    pub max_delay_ms: u64,

    /// Delay multiplier after each failed attempt
    pub backoff_multiplier: f64,
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryBudget {
    /// Delay before the next attempt, given the attempt that just failed
    /// (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::from_millis(self.initial_delay_ms);
        }

        let delay =
            self.initial_delay_ms as f64 * self.backoff_multiplier.powi((attempt - 1) as i32);
        Duration::from_millis(delay.min(self.max_delay_ms as f64) as u64)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Run `op` up to the budget's attempt count, retrying only when
/// `is_retryable` says the error is worth another try.
///
/// A non-retryable error is returned from the failing attempt directly,
/// with no delay and no further attempts.
pub async fn retry_bounded<T, E, F, Fut, P>(
    budget: &RetryBudget,
    what: &str,
    is_retryable: P,
    mut op: F,
) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if is_retryable(&e) && budget.should_retry(attempt) => {
                let delay = budget.delay_for_attempt(attempt);
                warn!(
                    call = what,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    enum TestError {
        Transient,
        Fatal,
    }

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    fn fast_budget() -> RetryBudget {
        RetryBudget {
            max_attempts: 3,
            initial_delay_ms: 1,
            max_delay_ms: 2,
            backoff_multiplier: 1.0,
        }
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let calls = AtomicU32::new(0);

        let result: Result<u32, TestError> =
            retry_bounded(&fast_budget(), "test", |_| true, || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(TestError::Transient)
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_returns_last_error() {
        let calls = AtomicU32::new(0);

        let result: Result<(), TestError> =
            retry_bounded(&fast_budget(), "test", |_| true, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TestError::Transient)
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_on_first_attempt() {
        let calls = AtomicU32::new(0);

        let result: Result<(), TestError> = retry_bounded(
            &fast_budget(),
            "test",
            |e| matches!(e, TestError::Transient),
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TestError::Fatal)
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_delays() {
        let budget = RetryBudget {
            max_attempts: 5,
            initial_delay_ms: 100,
            max_delay_ms: 350,
            backoff_multiplier: 2.0,
        };

        assert_eq!(budget.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(budget.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(budget.delay_for_attempt(3), Duration::from_millis(350)); // capped
    }
}
