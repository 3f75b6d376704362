//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_subgraph_calls_total` (counter): calls by subgraph, outcome
//! - `gateway_subgraph_call_duration_seconds` (histogram): call latency
//! - `gateway_circuit_breaker_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `gateway_plan_cache_lookups_total` (counter): lookups by result
//! - `gateway_plan_cache_size` (gauge), `gateway_plan_cache_evictions_total`
//! - `gateway_batches_total` (counter), `gateway_batch_size` (histogram)
//! - `gateway_subgraph_health` (gauge): 1=healthy, 0.5=degraded, 0=unhealthy
//! - `gateway_discovery_requests_total` (counter): by outcome
//! - `gateway_executions_total` (counter), `gateway_execution_duration_seconds`

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::health::HealthState;
use crate::resilience::circuit_breaker::CircuitState;

/// Install the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

fn outcome(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "failure"
    }
}

pub fn record_subgraph_call(subgraph: &str, success: bool, duration: Duration) {
    ::metrics::counter!(
        "gateway_subgraph_calls_total",
        "subgraph" => subgraph.to_string(),
        "outcome" => outcome(success)
    )
    .increment(1);
    ::metrics::histogram!(
        "gateway_subgraph_call_duration_seconds",
        "subgraph" => subgraph.to_string()
    )
    .record(duration.as_secs_f64());
}

pub fn record_breaker_state(subgraph: &str, state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    };
    ::metrics::gauge!("gateway_circuit_breaker_state", "subgraph" => subgraph.to_string()).set(value);
}

pub fn record_plan_cache_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    ::metrics::counter!("gateway_plan_cache_lookups_total", "result" => result).increment(1);
}

pub fn record_plan_cache_size(size: usize) {
    ::metrics::gauge!("gateway_plan_cache_size").set(size as f64);
}

pub fn record_plan_cache_evictions(count: usize) {
    ::metrics::counter!("gateway_plan_cache_evictions_total").increment(count as u64);
}

pub fn record_batch(subgraph: &str, size: usize) {
    ::metrics::counter!("gateway_batches_total", "subgraph" => subgraph.to_string()).increment(1);
    ::metrics::histogram!("gateway_batch_size", "subgraph" => subgraph.to_string()).record(size as f64);
}

pub fn record_health(service: &str, state: HealthState) {
    let value = match state {
        HealthState::Healthy => 1.0,
        HealthState::Degraded => 0.5,
        HealthState::Unhealthy => 0.0,
    };
    ::metrics::gauge!("gateway_subgraph_health", "service" => service.to_string()).set(value);
}

pub fn record_discovery(success: bool) {
    ::metrics::counter!("gateway_discovery_requests_total", "outcome" => outcome(success)).increment(1);
}

pub fn record_execution(success: bool, cache_hit: bool, duration: Duration) {
    let cache = if cache_hit { "hit" } else { "miss" };
    ::metrics::counter!(
        "gateway_executions_total",
        "outcome" => outcome(success),
        "plan_cache" => cache
    )
    .increment(1);
    ::metrics::histogram!("gateway_execution_duration_seconds").record(duration.as_secs_f64());
}
