//! Delays between discovery retries.
//!
//! Several registries tend to restart together after a deploy and hit the
//! same discovery endpoints in the same second. The delay doubles per failed
//! attempt and carries a small random spread so those retries drift apart.

use rand::Rng;
use std::time::Duration;

use crate::config::RetryPolicy;

/// Largest random spread, as a fraction of the base delay (1/10).
const SPREAD_DIVISOR: u64 = 10;

/// Unjittered delay after `failed` attempts: `initial_ms`, `2 * initial_ms`,
/// `4 * initial_ms`, ... never above `cap_ms`. Zero failures means no wait.
fn doubling_delay_ms(failed: u32, initial_ms: u64, cap_ms: u64) -> u64 {
    if failed == 0 {
        return 0;
    }
    let factor = 1u64.checked_shl(failed - 1).unwrap_or(u64::MAX);
    initial_ms.saturating_mul(factor).min(cap_ms)
}

/// Wait before the next request to a discovery endpoint that has failed
/// `failed` times in a row.
pub fn retry_delay(policy: &RetryPolicy, failed: u32) -> Duration {
    let base = doubling_delay_ms(failed, policy.initial_delay_ms, policy.max_delay_ms);
    let spread = base / SPREAD_DIVISOR;
    let extra = if spread == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..spread)
    };
    Duration::from_millis(base + extra)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(initial_delay_ms: u64, max_delay_ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            initial_delay_ms,
            max_delay_ms,
        }
    }

    #[test]
    fn test_doubling_is_capped() {
        assert_eq!(doubling_delay_ms(0, 100, 2000), 0);
        assert_eq!(doubling_delay_ms(1, 100, 2000), 100);
        assert_eq!(doubling_delay_ms(3, 100, 2000), 400);
        assert_eq!(doubling_delay_ms(10, 100, 1000), 1000);
        assert_eq!(doubling_delay_ms(200, 100, 5000), 5000);
    }

    #[test]
    fn test_retry_delay_spread_stays_within_a_tenth() {
        let policy = policy(100, 2000);
        assert_eq!(retry_delay(&policy, 0), Duration::ZERO);

        for _ in 0..50 {
            let second = retry_delay(&policy, 2).as_millis();
            assert!((200..220).contains(&second), "got {}", second);
        }
    }

    #[test]
    fn test_small_delays_have_no_spread() {
        let policy = policy(5, 1000);
        assert_eq!(retry_delay(&policy, 1), Duration::from_millis(5));
    }
}
