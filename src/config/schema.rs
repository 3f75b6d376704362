//! Configuration schema definitions.
//!
//! This module defines every tunable of the runtime. All types derive Serde
//! traits so hosts can embed them in their own configuration files.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::GatewayError;
use crate::registry::ServiceDefinition;
use crate::resilience::transform::ErrorContext;

/// Root configuration for the runtime.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Error boundary settings (timeouts, breaker, partial failure).
    pub boundary: BoundaryConfig,

    /// Subgraph registry settings (discovery, health checks).
    pub registry: RegistryConfig,

    /// Query plan cache settings.
    pub plan_cache: PlanCacheConfig,

    /// Batching loader settings.
    pub batching: BatchConfig,

    /// Buffered metrics sink settings.
    pub metrics: MetricsSinkConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Error boundary configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BoundaryConfig {
    /// Timeout applied to subgraphs without an override, in milliseconds.
    pub default_timeout_ms: u64,

    /// Per-subgraph timeout overrides in milliseconds.
    pub subgraph_timeouts_ms: HashMap<String, u64>,

    /// Circuit breaker settings shared by every subgraph.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Partial failure policy.
    pub partial_failure: PartialFailureConfig,

    /// Error transformation policy.
    pub transformation: ErrorTransformationConfig,
}

impl BoundaryConfig {
    /// Timeout for the given subgraph.
    pub fn timeout_for(&self, subgraph_id: &str) -> Duration {
        let ms = self
            .subgraph_timeouts_ms
            .get(subgraph_id)
            .copied()
            .unwrap_or(self.default_timeout_ms);
        Duration::from_millis(ms)
    }
}

impl Default for BoundaryConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 10_000,
            subgraph_timeouts_ms: HashMap::new(),
            circuit_breaker: CircuitBreakerConfig::default(),
            partial_failure: PartialFailureConfig::default(),
            transformation: ErrorTransformationConfig::default(),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,

    /// Time the circuit stays open before probing, in milliseconds.
    pub reset_timeout_ms: u64,

    /// Consecutive half-open successes needed to close the circuit.
    /// Also caps the number of probes in flight while half-open.
    pub half_open_max_calls: u32,
}

impl CircuitBreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 60_000,
            half_open_max_calls: 3,
        }
    }
}

/// Policy for combining results when some subgraphs fail.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PartialFailureConfig {
    /// Return data from healthy subgraphs even when others fail.
    pub allow_partial_failure: bool,

    /// Subgraphs whose failure always fails the whole operation.
    pub critical_subgraphs: HashSet<String>,

    /// Values merged into the response in place of a failed subgraph's data.
    pub fallback_values: HashMap<String, serde_json::Value>,
}

impl Default for PartialFailureConfig {
    fn default() -> Self {
        Self {
            allow_partial_failure: true,
            critical_subgraphs: HashSet::new(),
            fallback_values: HashMap::new(),
        }
    }
}

/// Caller-supplied replacement for the standard error shape.
///
/// The returned JSON object should carry `message` and `code`; any other
/// fields become extensions.
pub type CustomErrorTransform =
    Arc<dyn Fn(&GatewayError, &ErrorContext) -> serde_json::Value + Send + Sync>;

/// How errors are presented to clients.
#[derive(Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ErrorTransformationConfig {
    /// Replace messages with a generic one.
    pub sanitize_errors: bool,

    /// Attach the underlying cause to the extensions.
    pub include_stack_trace: bool,

    /// Optional custom transformer. Not serializable.
    #[serde(skip)]
    pub custom_transformer: Option<CustomErrorTransform>,
}

impl Default for ErrorTransformationConfig {
    fn default() -> Self {
        Self {
            sanitize_errors: false,
            include_stack_trace: false,
            custom_transformer: None,
        }
    }
}

impl fmt::Debug for ErrorTransformationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorTransformationConfig")
            .field("sanitize_errors", &self.sanitize_errors)
            .field("include_stack_trace", &self.include_stack_trace)
            .field("custom_transformer", &self.custom_transformer.is_some())
            .finish()
    }
}

/// How the registry learns about subgraphs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMode {
    /// Services are listed in configuration.
    #[default]
    Static,
    /// Services are fetched from discovery endpoints.
    Dynamic,
}

/// Subgraph registry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Discovery mode.
    pub discovery_mode: DiscoveryMode,

    /// Statically configured services (static mode).
    pub services: Vec<ServiceDefinition>,

    /// Discovery endpoint URLs (dynamic mode).
    pub discovery_endpoints: Vec<String>,

    /// Interval between health rounds in seconds.
    pub health_check_interval_secs: u64,

    /// Timeout for one health check or discovery request in milliseconds.
    pub health_check_timeout_ms: u64,

    /// Retry policy for discovery requests.
    pub retry_policy: RetryPolicy,
}

impl RegistryConfig {
    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            discovery_mode: DiscoveryMode::Static,
            services: Vec::new(),
            discovery_endpoints: Vec::new(),
            health_check_interval_secs: 30,
            health_check_timeout_ms: 5_000,
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// Exponential backoff retry policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,

    /// Delay before the first retry in milliseconds. Doubles on every retry.
    pub initial_delay_ms: u64,

    /// Upper bound for a single delay in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }
}

/// Query plan cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PlanCacheConfig {
    /// Maximum number of cached plans.
    pub max_size: usize,
}

impl Default for PlanCacheConfig {
    fn default() -> Self {
        Self { max_size: 1_000 }
    }
}

/// Batching loader configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Scheduling window in milliseconds.
    pub window_ms: u64,

    /// Dispatch early once this many loads are pending.
    pub max_batch_size: usize,
}

impl BatchConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            window_ms: 10,
            max_batch_size: 100,
        }
    }
}

/// Buffered metrics sink configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsSinkConfig {
    /// Flush cadence in milliseconds.
    pub flush_interval_ms: u64,

    /// Failures slower than this are reported immediately, in milliseconds.
    pub slow_call_threshold_ms: u64,

    /// Samples each buffer holds before the oldest are dropped.
    pub max_buffered_samples: usize,
}

impl MetricsSinkConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn slow_call_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_call_threshold_ms)
    }
}

impl Default for MetricsSinkConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 1_000,
            slow_call_threshold_ms: 1_000,
            max_buffered_samples: 10_000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Install the Prometheus exporter.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
