//! Service discovery.
//!
//! # Responsibilities
//! - Fetch `{ "services": [{ "id", "url" }, ...] }` from discovery endpoints
//! - Shape-check entries, dropping malformed ones
//! - Run the discovery loop for `with_auto_discovery`
//!
//! # Design Decisions
//! - At most 3 endpoints are queried at once
//! - An endpoint failure is logged and contributes nothing; it never fails
//!   the whole round
//! - Duplicate ids across endpoints keep the last definition in endpoint order

use futures_util::stream::{self, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;

use crate::config::RetryPolicy;
use crate::error::{GatewayError, Result};
use crate::lifecycle::task::loop_interval;
use crate::observability::metrics;
use crate::registry::service::ServiceDefinition;
use crate::registry::SubgraphRegistry;
use crate::resilience::retries::retry_with_backoff;

/// Endpoints queried in parallel.
pub const DISCOVERY_CONCURRENCY: usize = 3;

/// Extract service definitions from a discovery response body.
pub fn parse_services(endpoint: &str, body: &Value) -> Result<Vec<ServiceDefinition>> {
    let entries = body
        .get("services")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            GatewayError::Discovery(format!(
                "{} returned no 'services' array",
                endpoint
            ))
        })?;

    let mut services = Vec::with_capacity(entries.len());
    for entry in entries {
        let id = entry.get("id").and_then(Value::as_str);
        let url = entry.get("url").and_then(Value::as_str);
        let (Some(id), Some(url)) = (id, url) else {
            tracing::warn!(endpoint = %endpoint, entry = %entry, "Dropping malformed discovery entry");
            continue;
        };

        let service = ServiceDefinition::new(id, url);
        if let Err(e) = service.validate() {
            tracing::warn!(endpoint = %endpoint, error = %e, "Dropping invalid discovery entry");
            continue;
        }
        services.push(service);
    }
    Ok(services)
}

/// One request against one endpoint.
pub async fn fetch_endpoint(
    client: &reqwest::Client,
    endpoint: &str,
    timeout: Duration,
) -> Result<Vec<ServiceDefinition>> {
    let response = client
        .get(endpoint)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| GatewayError::Discovery(format!("{}: {}", endpoint, e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(GatewayError::Discovery(format!(
            "{} returned status {}",
            endpoint, status
        )));
    }

    let body: Value = response
        .json()
        .await
        .map_err(|e| GatewayError::Discovery(format!("{} returned malformed JSON: {}", endpoint, e)))?;

    parse_services(endpoint, &body)
}

/// Query every endpoint, retrying each per `policy`. Failing endpoints
/// contribute nothing.
pub async fn discover_endpoints(
    client: &reqwest::Client,
    endpoints: &[String],
    policy: &RetryPolicy,
    timeout: Duration,
) -> Vec<ServiceDefinition> {
    // Each request owns its inputs so the round can run inside a spawned loop.
    let per_endpoint: Vec<Vec<ServiceDefinition>> = stream::iter(endpoints.to_vec())
        .map(|endpoint| {
            let client = client.clone();
            let policy = policy.clone();
            async move {
                let result = retry_with_backoff(&policy, &endpoint, |_attempt| {
                    fetch_endpoint(&client, &endpoint, timeout)
                })
                .await;
                metrics::record_discovery(result.is_ok());
                match result {
                    Ok(services) => {
                        tracing::debug!(endpoint = %endpoint, count = services.len(), "Discovery endpoint answered");
                        services
                    }
                    Err(e) => {
                        tracing::warn!(endpoint = %endpoint, error = %e, "Discovery endpoint failed");
                        Vec::new()
                    }
                }
            }
        })
        .buffered(DISCOVERY_CONCURRENCY)
        .collect()
        .await;

    let mut merged: Vec<ServiceDefinition> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    for service in per_endpoint.into_iter().flatten() {
        match positions.get(&service.id) {
            Some(&i) => merged[i] = service,
            None => {
                positions.insert(service.id.clone(), merged.len());
                merged.push(service);
            }
        }
    }
    merged
}

/// Periodic discovery rounds over a registry.
pub struct DiscoveryLoop {
    registry: Arc<SubgraphRegistry>,
    interval: Duration,
}

impl DiscoveryLoop {
    pub fn new(registry: Arc<SubgraphRegistry>, interval: Duration) -> Self {
        Self { registry, interval }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let period = loop_interval("auto-discovery", self.interval);
        tracing::info!(interval_ms = period.as_millis() as u64, "Auto-discovery starting");

        let mut ticker = time::interval(period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.registry.discover().await {
                        Ok(services) => {
                            tracing::info!(count = services.len(), "Discovery round complete");
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Discovery round failed");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Auto-discovery received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_filters_malformed_entries() {
        let body = json!({
            "services": [
                { "id": "users", "url": "http://users:4001" },
                { "id": "orders" },
                { "id": 7, "url": "http://seven:4007" },
                { "url": "http://anon:4000" },
                { "id": "bad", "url": "not a url" },
                "garbage"
            ]
        });
        let services = parse_services("http://registry", &body).unwrap();
        assert_eq!(services, vec![ServiceDefinition::new("users", "http://users:4001")]);
    }

    #[test]
    fn test_parse_requires_services_array() {
        let err = parse_services("http://registry", &json!({ "services": {} })).unwrap_err();
        assert_eq!(err.code(), "DISCOVERY_ERROR");
        assert!(parse_services("http://registry", &json!([])).is_err());
    }

    #[test]
    fn test_parse_empty_list() {
        assert!(parse_services("http://registry", &json!({ "services": [] }))
            .unwrap()
            .is_empty());
    }
}
