//! Error boundary around every outbound subgraph call.
//!
//! # Responsibilities
//! - Run a resolver under its subgraph's timeout and circuit breaker
//! - Record one call sample per attempt into the metrics sink
//! - Downgrade failures to `null` fields when partial failure is allowed
//! - Reduce per-subgraph results into `{data, errors}`
//!
//! # Design Decisions
//! - Breakers are created lazily, one per subgraph id, and never shared
//! - The timeout sits inside the breaker, so expiry counts as a failure
//! - Critical subgraphs fail the operation even in partial-failure mode

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use crate::config::validation::{into_composition_error, validate_boundary};
use crate::config::BoundaryConfig;
use crate::error::{GatewayError, Result};
use crate::observability::{CallSample, MetricsSink};
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::resilience::timeouts::with_timeout;
use crate::resilience::transform::{ErrorContext, ErrorTransformer, TransformedError};

/// An async field/entity resolver.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, args: Value) -> Result<Value>;
}

#[async_trait]
impl<F, Fut> Resolver for F
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    async fn resolve(&self, args: Value) -> Result<Value> {
        (self)(args).await
    }
}

/// Outcome of one subgraph's part of an operation.
#[derive(Debug, Clone)]
pub struct SubgraphResult {
    pub subgraph_id: String,
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<GatewayError>,
}

impl SubgraphResult {
    pub fn ok(subgraph_id: impl Into<String>, data: Value) -> Self {
        Self {
            subgraph_id: subgraph_id.into(),
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failed(subgraph_id: impl Into<String>, error: GatewayError) -> Self {
        Self {
            subgraph_id: subgraph_id.into(),
            success: false,
            data: None,
            error: Some(error),
        }
    }
}

/// Merged data plus one error entry per tolerated failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartialResult {
    pub data: Map<String, Value>,
    pub errors: Vec<TransformedError>,
}

/// Timeout + circuit breaker + partial failure policy for all subgraphs.
pub struct ErrorBoundary {
    config: BoundaryConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    transformer: ErrorTransformer,
    sink: Arc<dyn MetricsSink>,
}

impl ErrorBoundary {
    /// Build a boundary. Invalid configuration is a composition error.
    pub fn new(config: BoundaryConfig, sink: Arc<dyn MetricsSink>) -> Result<Self> {
        validate_boundary(&config).map_err(into_composition_error)?;
        let transformer = ErrorTransformer::new(config.transformation.clone());

        Ok(Self {
            config,
            breakers: DashMap::new(),
            transformer,
            sink,
        })
    }

    pub fn config(&self) -> &BoundaryConfig {
        &self.config
    }

    /// Breaker for `subgraph_id`, created on first use.
    pub fn breaker(&self, subgraph_id: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(subgraph_id) {
            return Arc::clone(existing.value());
        }
        let entry = self
            .breakers
            .entry(subgraph_id.to_string())
            .or_insert_with(|| {
                tracing::debug!(subgraph = %subgraph_id, "Creating circuit breaker");
                Arc::new(CircuitBreaker::from_validated(
                    subgraph_id,
                    self.config.circuit_breaker.clone(),
                ))
            });
        Arc::clone(entry.value())
    }

    /// State of every breaker created so far.
    pub fn breaker_states(&self) -> HashMap<String, CircuitState> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().state()))
            .collect()
    }

    /// Run `op` against `subgraph_id` under the boundary.
    ///
    /// `Ok(None)` is a failure downgraded to a null field.
    pub async fn call<F, Fut>(&self, subgraph_id: &str, op: F) -> Result<Option<Value>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        let breaker = self.breaker(subgraph_id);
        let timeout = self.config.timeout_for(subgraph_id);
        let start = Instant::now();

        let result = breaker
            .protect(|| with_timeout(subgraph_id, timeout, op()))
            .await;
        let duration = start.elapsed();

        match result {
            Ok(value) => {
                self.sink.record_call(CallSample {
                    subgraph: subgraph_id.to_string(),
                    duration,
                    success: true,
                    error: None,
                });
                Ok(Some(value))
            }
            Err(e) => {
                self.sink.record_call(CallSample {
                    subgraph: subgraph_id.to_string(),
                    duration,
                    success: false,
                    error: Some(e.to_string()),
                });
                if self.config.partial_failure.allow_partial_failure {
                    tracing::warn!(
                        subgraph = %subgraph_id,
                        error = %e,
                        "Subgraph call failed, returning null"
                    );
                    Ok(None)
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Wrap `resolver` so every invocation goes through [`ErrorBoundary::call`].
    pub fn wrap_resolver<R: Resolver>(
        self: &Arc<Self>,
        subgraph_id: impl Into<String>,
        resolver: R,
    ) -> BoundedResolver<R> {
        BoundedResolver {
            boundary: Arc::clone(self),
            subgraph_id: subgraph_id.into(),
            resolver: Arc::new(resolver),
        }
    }

    /// Reduce per-subgraph results according to the partial failure policy.
    pub fn handle_partial_failure(&self, results: Vec<SubgraphResult>) -> Result<PartialResult> {
        let policy = &self.config.partial_failure;
        let (successful, failed): (Vec<_>, Vec<_>) =
            results.into_iter().partition(|r| r.success);

        let mut data = Map::new();
        for result in &successful {
            if let Some(Value::Object(fields)) = &result.data {
                shallow_merge(&mut data, fields);
            }
        }

        if failed.is_empty() {
            return Ok(PartialResult {
                data,
                errors: Vec::new(),
            });
        }

        let failed_ids: Vec<String> = failed.iter().map(|r| r.subgraph_id.clone()).collect();
        if !policy.allow_partial_failure {
            return Err(GatewayError::Federation { failed: failed_ids });
        }

        let critical: Vec<String> = failed_ids
            .iter()
            .filter(|id| policy.critical_subgraphs.contains(*id))
            .cloned()
            .collect();
        if !critical.is_empty() {
            tracing::error!(subgraphs = ?critical, "Critical subgraph failure");
            return Err(GatewayError::CriticalSubgraphFailure { failed: critical });
        }

        let mut errors = Vec::with_capacity(failed.len());
        for result in &failed {
            if let Some(Value::Object(fallback)) = policy.fallback_values.get(&result.subgraph_id) {
                shallow_merge(&mut data, fallback);
            }
            let error = result.error.clone().unwrap_or_else(|| {
                GatewayError::Upstream(format!("subgraph {} failed", result.subgraph_id))
            });
            errors.push(
                self.transformer
                    .transform(&error, &ErrorContext::subgraph(result.subgraph_id.clone())),
            );
        }

        tracing::debug!(
            succeeded = successful.len(),
            failed = failed.len(),
            "Returning partial result"
        );
        Ok(PartialResult { data, errors })
    }

    pub fn transform_error(&self, error: &GatewayError, context: &ErrorContext) -> TransformedError {
        self.transformer.transform(error, context)
    }
}

impl std::fmt::Debug for ErrorBoundary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorBoundary")
            .field("config", &self.config)
            .field("breakers", &self.breakers.len())
            .finish()
    }
}

fn shallow_merge(target: &mut Map<String, Value>, source: &Map<String, Value>) {
    for (key, value) in source {
        target.insert(key.clone(), value.clone());
    }
}

/// A resolver bound to one subgraph's boundary.
pub struct BoundedResolver<R> {
    boundary: Arc<ErrorBoundary>,
    subgraph_id: String,
    resolver: Arc<R>,
}

impl<R: Resolver> BoundedResolver<R> {
    pub fn subgraph_id(&self) -> &str {
        &self.subgraph_id
    }

    /// Invoke the resolver. `Ok(None)` is a tolerated failure.
    pub async fn invoke(&self, args: Value) -> Result<Option<Value>> {
        let resolver = Arc::clone(&self.resolver);
        self.boundary
            .call(&self.subgraph_id, move || async move { resolver.resolve(args).await })
            .await
    }
}

impl<R> Clone for BoundedResolver<R> {
    fn clone(&self) -> Self {
        Self {
            boundary: Arc::clone(&self.boundary),
            subgraph_id: self.subgraph_id.clone(),
            resolver: Arc::clone(&self.resolver),
        }
    }
}

#[async_trait]
impl<R: Resolver + 'static> Resolver for BoundedResolver<R> {
    async fn resolve(&self, args: Value) -> Result<Value> {
        Ok(self.invoke(args).await?.unwrap_or(Value::Null))
    }
}
