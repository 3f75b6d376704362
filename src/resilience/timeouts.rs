//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap subgraph calls, health probes and discovery fetches with a deadline
//! - Convert expiry into a distinct `Timeout` error
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities; the inner future is dropped on expiry
//! - Timeout errors are distinct from other errors but still count as
//!   failures wherever a circuit breaker observes them

use std::future::Future;
use std::time::Duration;

use crate::error::{GatewayError, Result};

/// Run `fut` with a deadline, tagging a timeout with `subgraph`.
pub async fn with_timeout<T, Fut>(subgraph: &str, after: Duration, fut: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::debug!(subgraph = %subgraph, timeout_ms = after.as_millis() as u64, "Call timed out");
            Err(GatewayError::Timeout {
                subgraph: subgraph.to_string(),
                after,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_distinct() {
        let result: Result<()> = with_timeout("slow", Duration::from_millis(100), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(())
        })
        .await;

        match result {
            Err(GatewayError::Timeout { subgraph, after }) => {
                assert_eq!(subgraph, "slow");
                assert_eq!(after, Duration::from_millis(100));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_inner_error_passes_through() {
        let result: Result<()> = with_timeout("fast", Duration::from_secs(1), async {
            Err(GatewayError::Upstream("refused".into()))
        })
        .await;
        assert_eq!(result.unwrap_err(), GatewayError::Upstream("refused".into()));
    }
}
