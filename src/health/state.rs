//! Health states and classification.
//!
//! ```text
//! non-2xx, status >= 500   → Unhealthy
//! non-2xx, status <  500   → Degraded
//! 2xx,     < 100ms         → Healthy
//! 2xx,     100ms..500ms    → Degraded
//! 2xx,     >= 500ms        → Unhealthy
//! transport error/timeout  → Unhealthy
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime};

/// Responses faster than this are healthy.
pub const HEALTHY_LATENCY: Duration = Duration::from_millis(100);
/// Responses at or above this are unhealthy.
pub const UNHEALTHY_LATENCY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthState::Healthy => "healthy",
            HealthState::Degraded => "degraded",
            HealthState::Unhealthy => "unhealthy",
        };
        f.write_str(s)
    }
}

/// Best-effort probe measurements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthMetrics {
    pub response_time_ms: u64,
    pub status_code: Option<u16>,
    pub error_count: Option<u32>,
}

/// Result of one health probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub service_id: String,
    pub status: HealthState,
    pub last_check: SystemTime,
    pub metrics: Option<HealthMetrics>,
}

impl HealthStatus {
    /// Status for a probe that got an HTTP response.
    pub fn from_response(service_id: impl Into<String>, status_code: u16, elapsed: Duration) -> Self {
        Self {
            service_id: service_id.into(),
            status: classify(status_code, elapsed),
            last_check: SystemTime::now(),
            metrics: Some(HealthMetrics {
                response_time_ms: elapsed.as_millis() as u64,
                status_code: Some(status_code),
                error_count: None,
            }),
        }
    }

    /// Status for a probe that never got a response.
    pub fn unreachable(service_id: impl Into<String>, response_time: Duration) -> Self {
        Self {
            service_id: service_id.into(),
            status: HealthState::Unhealthy,
            last_check: SystemTime::now(),
            metrics: Some(HealthMetrics {
                response_time_ms: response_time.as_millis() as u64,
                status_code: None,
                error_count: Some(1),
            }),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthState::Healthy
    }
}

/// Map an HTTP status and latency to a health state.
pub fn classify(status_code: u16, elapsed: Duration) -> HealthState {
    if !(200..300).contains(&status_code) {
        return if status_code >= 500 {
            HealthState::Unhealthy
        } else {
            HealthState::Degraded
        };
    }

    if elapsed < HEALTHY_LATENCY {
        HealthState::Healthy
    } else if elapsed < UNHEALTHY_LATENCY {
        HealthState::Degraded
    } else {
        HealthState::Unhealthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_latency_bands() {
        assert_eq!(classify(200, ms(50)), HealthState::Healthy);
        assert_eq!(classify(204, ms(99)), HealthState::Healthy);
        assert_eq!(classify(200, ms(100)), HealthState::Degraded);
        assert_eq!(classify(200, ms(499)), HealthState::Degraded);
        assert_eq!(classify(200, ms(500)), HealthState::Unhealthy);
        assert_eq!(classify(200, ms(600)), HealthState::Unhealthy);
    }

    #[test]
    fn test_non_success_status() {
        assert_eq!(classify(503, ms(1)), HealthState::Unhealthy);
        assert_eq!(classify(500, ms(1)), HealthState::Unhealthy);
        assert_eq!(classify(404, ms(1)), HealthState::Degraded);
        assert_eq!(classify(301, ms(1)), HealthState::Degraded);
    }

    #[test]
    fn test_unreachable() {
        let status = HealthStatus::unreachable("users", Duration::ZERO);
        assert_eq!(status.status, HealthState::Unhealthy);
        let metrics = status.metrics.unwrap();
        assert_eq!(metrics.response_time_ms, 0);
        assert_eq!(metrics.status_code, None);
        assert_eq!(metrics.error_count, Some(1));
    }

    #[test]
    fn test_serialized_state() {
        assert_eq!(serde_json::to_string(&HealthState::Degraded).unwrap(), "\"degraded\"");
    }
}
