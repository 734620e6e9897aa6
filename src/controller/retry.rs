//! Retry utilities with exponential backoff and jitter
//!
//! Used for idempotent API mutations (finalizer patches, version adoption)
//! and, through `error_backoff`, for the controller's error requeue policy.

use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

/// Backoff parameters for transient failures
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts (0 = infinite)
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Fraction of the delay added at random (0.5 = up to +50%)
    pub jitter: f64,
}

impl Default for RetryConfig {
    /// 1s, ×1.5, 10 attempts, 50% jitter (roughly 40s in total)
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 1.5,
            jitter: 0.5,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (1-based), without jitter
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(64) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exp);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return delay;
        }
        let factor = 1.0 + rand::rng().random_range(0.0..self.jitter);
        Duration::from_secs_f64(delay.as_secs_f64() * factor)
    }
}

/// Execute an async operation with exponential backoff and jitter.
///
/// Returns the last error once `max_attempts` is exhausted.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_with_backoff_if(config, operation_name, |_| true, operation).await
}

/// Like `retry_with_backoff`, but errors rejected by `retryable` are
/// returned immediately.
pub async fn retry_with_backoff_if<F, Fut, T, E, P>(
    config: &RetryConfig,
    operation_name: &str,
    retryable: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !retryable(&e) {
                    return Err(e);
                }
                if config.max_attempts > 0 && attempt >= config.max_attempts {
                    error!(
                        operation = %operation_name,
                        attempt,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }

                let delay = config.jittered(config.delay(attempt));
                warn!(
                    operation = %operation_name,
                    attempt,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "Operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Requeue delay after `failures` consecutive reconcile errors:
/// 1s·1.5^failures, capped at `cap`.
pub fn error_backoff(failures: u32, cap: Duration) -> Duration {
    let secs = 1.5f64.powi(failures.min(64) as i32);
    Duration::from_secs_f64(secs.min(cap.as_secs_f64()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts: attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 1.5,
            jitter: 0.5,
        }
    }

    #[test]
    fn test_delay_schedule() {
        let config = RetryConfig::default();
        assert_eq!(config.delay(1), Duration::from_secs(1));
        assert_eq!(config.delay(2), Duration::from_millis(1500));
        assert_eq!(config.delay(3), Duration::from_millis(2250));
        assert_eq!(config.delay(50), Duration::from_secs(30));
    }

    #[test]
    fn test_error_backoff_is_capped() {
        let cap = Duration::from_secs(300);
        assert_eq!(error_backoff(0, cap), Duration::from_secs(1));
        assert_eq!(error_backoff(2, cap), Duration::from_millis(2250));
        assert_eq!(error_backoff(40, cap), cap);
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<u32, String> = retry_with_backoff(&fast(5), "flaky", || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 { Err(format!("attempt {n}")) } else { Ok(n) }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), String> = retry_with_backoff(&fast(3), "broken", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err("nope".to_string())
            }
        })
        .await;
        assert_eq!(result.unwrap_err(), "nope");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), String> = retry_with_backoff_if(
            &fast(5),
            "validate",
            |e: &String| e.starts_with("conflict"),
            || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    if n == 1 {
                        Err("conflict: object was modified".to_string())
                    } else {
                        Err("invalid: spec.chart.version".to_string())
                    }
                }
            },
        )
        .await;
        assert_eq!(result.unwrap_err(), "invalid: spec.chart.version");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
