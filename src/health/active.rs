//! Active health checking.
//!
//! # Responsibilities
//! - Probe `GET {url}/health` under a timeout
//! - Classify each probe into a [`HealthStatus`]
//! - Run periodic rounds over every registered service

use futures_util::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{self, Instant};

use crate::health::state::HealthStatus;
use crate::lifecycle::task::loop_interval;
use crate::observability::metrics;
use crate::registry::{ServiceDefinition, SubgraphRegistry};

const MIN_CONCURRENCY: usize = 3;
const MAX_CONCURRENCY: usize = 10;

/// Parallelism for a round over `services` targets: `min(10, max(3, ceil(n/3)))`.
pub fn health_concurrency(services: usize) -> usize {
    services.div_ceil(3).clamp(MIN_CONCURRENCY, MAX_CONCURRENCY)
}

/// Issues health probes.
#[derive(Debug, Clone)]
pub struct HealthChecker {
    client: reqwest::Client,
    timeout: Duration,
}

impl HealthChecker {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Probe one service. Never fails; problems become an unhealthy status.
    pub async fn check(&self, service: &ServiceDefinition) -> HealthStatus {
        let url = service.health_url();
        let start = Instant::now();
        let request = self
            .client
            .get(&url)
            .header("user-agent", "federation-runtime-health-check")
            .send();

        let status = match time::timeout(self.timeout, request).await {
            Ok(Ok(response)) => {
                let code = response.status();
                if !code.is_success() {
                    tracing::warn!(service = %service.id, status = %code, "Health check failed: non-success status");
                }
                HealthStatus::from_response(&service.id, code.as_u16(), start.elapsed())
            }
            Ok(Err(e)) => {
                tracing::warn!(service = %service.id, error = %e, "Health check failed: connection error");
                HealthStatus::unreachable(&service.id, Duration::ZERO)
            }
            Err(_) => {
                tracing::warn!(service = %service.id, timeout_ms = self.timeout.as_millis() as u64, "Health check failed: timeout");
                HealthStatus::unreachable(&service.id, start.elapsed())
            }
        };

        metrics::record_health(&service.id, status.status);
        status
    }

    /// Probe many services with bounded parallelism. Results keep input order.
    pub async fn check_all(&self, services: &[ServiceDefinition]) -> Vec<HealthStatus> {
        let concurrency = health_concurrency(services.len());
        stream::iter(services.to_vec())
            .map(|service| {
                let checker = self.clone();
                async move { checker.check(&service).await }
            })
            .buffered(concurrency)
            .collect()
            .await
    }
}

/// Periodic health rounds over a registry.
pub struct HealthMonitor {
    registry: Arc<SubgraphRegistry>,
    interval: Duration,
}

impl HealthMonitor {
    pub fn new(registry: Arc<SubgraphRegistry>, interval: Duration) -> Self {
        Self { registry, interval }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let period = loop_interval("health-monitor", self.interval);
        tracing::info!(interval_ms = period.as_millis() as u64, "Health monitor starting");

        let mut ticker = time::interval(period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.round().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    async fn round(&self) {
        let statuses = self.registry.health_all().await;
        for status in &statuses {
            tracing::debug!(
                service = %status.service_id,
                status = %status.status,
                response_time_ms = status.metrics.as_ref().map(|m| m.response_time_ms),
                "Health check result"
            );
        }
        let unhealthy = statuses.iter().filter(|s| !s.is_healthy()).count();
        tracing::info!(
            services = statuses.len(),
            not_healthy = unhealthy,
            "Health round complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concurrency_bounds() {
        assert_eq!(health_concurrency(0), 3);
        assert_eq!(health_concurrency(1), 3);
        assert_eq!(health_concurrency(9), 3);
        assert_eq!(health_concurrency(10), 4);
        assert_eq!(health_concurrency(30), 10);
        assert_eq!(health_concurrency(300), 10);
    }

    #[tokio::test]
    async fn test_refused_connection_is_unhealthy() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let checker = HealthChecker::new(
            reqwest::Client::builder().no_proxy().build().unwrap(),
            Duration::from_secs(2),
        );
        let status = checker
            .check(&ServiceDefinition::new("gone", format!("http://{}", addr)))
            .await;

        assert_eq!(status.status, crate::health::HealthState::Unhealthy);
        let metrics = status.metrics.unwrap();
        assert_eq!(metrics.response_time_ms, 0);
        assert_eq!(metrics.status_code, None);
    }
}
