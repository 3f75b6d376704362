//! Retry logic.
//!
//! # Responsibilities
//! - Re-run a fallible async operation up to `max_attempts` times
//! - Wait with exponential backoff + jitter between attempts
//!
//! # Design Decisions
//! - The last error is returned once attempts are exhausted
//! - Jittered backoff prevents thundering herd against discovery endpoints

use std::future::Future;

use crate::config::RetryPolicy;
use crate::error::Result;
use crate::resilience::backoff::retry_delay;

/// Run `op` until it succeeds or `policy.max_attempts` is reached.
pub async fn retry_with_backoff<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= max_attempts => {
                tracing::debug!(target_name = %label, attempts = attempt, error = %e, "Retries exhausted");
                return Err(e);
            }
            Err(e) => {
                let delay = retry_delay(policy, attempt);
                tracing::debug!(
                    target_name = %label,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::time::Instant;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay_ms: 100,
            max_delay_ms: 10_000,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let start = Instant::now();

        let result: Result<()> = retry_with_backoff(&policy(3), "endpoint", move |_| async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(GatewayError::Discovery("down".into()))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 100ms + 200ms of backoff, plus at most 10% jitter each.
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(300));
        assert!(waited < Duration::from_millis(330));
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_first_success() {
        let result = retry_with_backoff(&policy(5), "endpoint", |attempt| async move {
            if attempt < 2 {
                Err(GatewayError::Discovery("flaky".into()))
            } else {
                Ok(attempt)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
    }
}
