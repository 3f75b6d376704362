//! Query execution around the plan cache and batching loaders.
//!
//! # Data Flow
//! ```text
//! execute(query, variables)
//!     → plan_cache_key → PlanCache::get
//!         hit:  reuse plan
//!         miss: QueryPlanner::build_plan → PlanCache::set
//!     → ExecutionEngine::execute_plan(plan, variables, ExecutionContext { loaders, boundary })
//!     → batch stats of this request folded into the executor totals
//!     → MetricsSink::record_execution
//!     → ExecutionResult { data, errors, extensions }
//! ```
//!
//! Every context gets its own `LoaderRegistry`, so loads coalesce and memoize
//! within one request and never serve another request's results.
//!
//! Failures never escape `execute`; they become `{ data: null, errors }`.
//! That includes a planner or engine that panics.

use async_trait::async_trait;
use futures_util::FutureExt;
use serde::Serialize;
use serde_json::{Map, Value};
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::validation::{into_composition_error, validate_batching};
use crate::config::{BatchConfig, PlanCacheConfig};
use crate::error::{GatewayError, Result};
use crate::observability::{ExecutionSample, MetricsSink};
use crate::performance::batch::{BatchFunction, BatchLoader, BatchStats, LoaderRegistry};
use crate::performance::plan_cache::{plan_cache_key, PlanCache, PlanCacheStats, QueryPlan};
use crate::resilience::{ErrorBoundary, ErrorContext, ErrorTransformer, TransformedError};

/// Builds plans for queries. The schema lives with the planner.
#[async_trait]
pub trait QueryPlanner: Send + Sync {
    async fn build_plan(&self, query: &str) -> Result<QueryPlan>;
}

/// Runs plans against subgraphs.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    async fn execute_plan(
        &self,
        plan: &QueryPlan,
        variables: &Value,
        context: &ExecutionContext,
    ) -> Result<ExecutionOutput>;
}

/// What an engine returns for one plan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionOutput {
    pub data: Value,
    /// Subgraphs called while executing, in call order.
    pub subgraph_calls: Vec<String>,
}

/// Per-request state handed to the engine.
#[derive(Clone)]
pub struct ExecutionContext {
    pub request_id: Uuid,
    loaders: Arc<LoaderRegistry>,
    boundary: Option<Arc<ErrorBoundary>>,
}

impl ExecutionContext {
    /// This request's loader for `(subgraph_id, batch_fn)`.
    pub fn loader(&self, subgraph_id: &str, batch_fn: Arc<dyn BatchFunction>) -> BatchLoader {
        self.loaders.loader(subgraph_id, batch_fn)
    }

    /// Every loader created for this request.
    pub fn loaders(&self) -> &LoaderRegistry {
        &self.loaders
    }

    /// Boundary protecting subgraph calls, if the executor has one.
    pub fn boundary(&self) -> Option<&Arc<ErrorBoundary>> {
        self.boundary.as_ref()
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("request_id", &self.request_id)
            .field("boundary", &self.boundary.is_some())
            .finish()
    }
}

/// Response shape for one execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<TransformedError>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub extensions: Map<String, Value>,
}

impl ExecutionResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutorStats {
    pub plan_cache: PlanCacheStats,
    /// Batching counters per subgraph, summed over every request so far.
    pub loaders: HashMap<String, BatchStats>,
}

pub struct OptimizedExecutor {
    planner: Arc<dyn QueryPlanner>,
    engine: Arc<dyn ExecutionEngine>,
    plan_cache: PlanCache,
    batching: BatchConfig,
    batch_totals: Mutex<HashMap<String, BatchStats>>,
    boundary: Option<Arc<ErrorBoundary>>,
    transformer: ErrorTransformer,
    sink: Arc<dyn MetricsSink>,
}

impl OptimizedExecutor {
    pub fn new(
        planner: Arc<dyn QueryPlanner>,
        engine: Arc<dyn ExecutionEngine>,
        plan_cache: PlanCacheConfig,
        batching: BatchConfig,
        sink: Arc<dyn MetricsSink>,
    ) -> Result<Self> {
        validate_batching(&batching).map_err(into_composition_error)?;
        Ok(Self {
            planner,
            engine,
            plan_cache: PlanCache::new(plan_cache)?,
            batching,
            batch_totals: Mutex::new(HashMap::new()),
            boundary: None,
            transformer: ErrorTransformer::default(),
            sink,
        })
    }

    /// Hand `boundary` to engines and shape errors with its transformation
    /// settings.
    pub fn with_boundary(mut self, boundary: Arc<ErrorBoundary>) -> Self {
        self.transformer = ErrorTransformer::new(boundary.config().transformation.clone());
        self.boundary = Some(boundary);
        self
    }

    pub fn plan_cache(&self) -> &PlanCache {
        &self.plan_cache
    }

    /// A fresh context with a new request id and empty loaders.
    pub fn context(&self) -> ExecutionContext {
        ExecutionContext {
            request_id: Uuid::new_v4(),
            loaders: Arc::new(LoaderRegistry::from_validated(self.batching.clone())),
            boundary: self.boundary.clone(),
        }
    }

    pub async fn execute(&self, query: &str, variables: Option<Value>) -> ExecutionResult {
        self.execute_with_context(query, variables, self.context()).await
    }

    pub async fn execute_with_context(
        &self,
        query: &str,
        variables: Option<Value>,
        context: ExecutionContext,
    ) -> ExecutionResult {
        let start = Instant::now();
        let variables = variables.unwrap_or(Value::Null);
        let key = plan_cache_key(query, Some(&variables));
        let batch_baseline = context.loaders.all_stats();
        let mut cache_hit = false;

        let pipeline = self.plan_and_run(query, key, &variables, &context, &mut cache_hit);
        let outcome = match AssertUnwindSafe(pipeline).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(
                    request_id = %context.request_id,
                    panic = %message,
                    "Query execution panicked"
                );
                Err(GatewayError::FieldResolution(format!(
                    "execution panicked: {}",
                    message
                )))
            }
        };
        self.absorb_batch_stats(&batch_baseline, &context.loaders);

        let duration = start.elapsed();
        let success = outcome.is_ok();
        let subgraph_calls = outcome
            .as_ref()
            .map(|o| o.subgraph_calls.clone())
            .unwrap_or_default();

        self.sink.record_execution(ExecutionSample {
            request_id: context.request_id,
            duration,
            success,
            cache_hit,
            subgraph_calls: subgraph_calls.clone(),
        });

        let mut extensions = Map::new();
        extensions.insert("requestId".into(), Value::from(context.request_id.to_string()));
        extensions.insert("planCacheHit".into(), Value::from(cache_hit));
        extensions.insert("durationMs".into(), Value::from(duration.as_millis() as u64));
        extensions.insert(
            "subgraphCalls".into(),
            Value::from(subgraph_calls),
        );

        match outcome {
            Ok(output) => {
                tracing::debug!(
                    request_id = %context.request_id,
                    cache_hit,
                    duration_ms = duration.as_millis() as u64,
                    "Query executed"
                );
                ExecutionResult {
                    data: Some(output.data),
                    errors: Vec::new(),
                    extensions,
                }
            }
            Err(e) => {
                tracing::warn!(
                    request_id = %context.request_id,
                    cache_hit,
                    error = %e,
                    "Query execution failed"
                );
                ExecutionResult {
                    data: None,
                    errors: vec![self.transform(&e)],
                    extensions,
                }
            }
        }
    }

    async fn plan_and_run(
        &self,
        query: &str,
        key: String,
        variables: &Value,
        context: &ExecutionContext,
        cache_hit: &mut bool,
    ) -> Result<ExecutionOutput> {
        let plan = match self.plan_cache.get(&key) {
            Some(entry) => {
                *cache_hit = true;
                entry.plan
            }
            None => {
                let plan = self.planner.build_plan(query).await?;
                self.plan_cache.set(key, plan.clone());
                Arc::new(plan)
            }
        };
        self.engine.execute_plan(&plan, variables, context).await
    }

    fn transform(&self, error: &GatewayError) -> TransformedError {
        let context = match error {
            GatewayError::CircuitOpen { subgraph, .. } | GatewayError::Timeout { subgraph, .. } => {
                ErrorContext::subgraph(subgraph.clone())
            }
            _ => ErrorContext::default(),
        };
        self.transformer.transform(error, &context)
    }

    /// Fold what `loaders` batched since `baseline` into the executor totals.
    fn absorb_batch_stats(&self, baseline: &HashMap<String, BatchStats>, loaders: &LoaderRegistry) {
        let mut totals = self
            .batch_totals
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for (subgraph, stats) in loaders.all_stats() {
            let delta = match baseline.get(&subgraph) {
                Some(earlier) => stats.since(earlier),
                None => stats,
            };
            totals.entry(subgraph).or_default().merge(&delta);
        }
    }

    pub fn stats(&self) -> ExecutorStats {
        let loaders = self
            .batch_totals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        ExecutorStats {
            plan_cache: self.plan_cache.stats(),
            loaders,
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
