//! Request coalescing per subgraph.
//!
//! # Data Flow
//! ```text
//! load(key) ──┬─ memoized?  → return cached result
//!             ├─ in flight? → wait on the same batch
//!             └─ new        → queue ─┬─ queue full     → dispatch now
//!                                    └─ first in window → dispatch after window
//! dispatch: batch function(keys) → results[i] → every waiter of keys[i]
//! ```
//!
//! # Design Decisions
//! - Keys are JSON values; deduplication uses a key function (the JSON
//!   text by default)
//! - The state mutex is never held across an await
//! - Successful results are memoized until `clear`; errors are not

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::future::try_join_all;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

use crate::config::validation::{into_composition_error, validate_batching};
use crate::config::BatchConfig;
use crate::error::{GatewayError, Result};
use crate::observability::metrics;

/// Upstream call resolving many keys at once.
///
/// Must return exactly one result per key, in key order.
#[async_trait]
pub trait BatchFunction: Send + Sync + 'static {
    /// Stable name; loaders are shared per (subgraph, name).
    fn name(&self) -> &str;

    async fn load(&self, keys: Vec<Value>) -> Result<Vec<Value>>;
}

/// [`BatchFunction`] backed by a closure.
pub struct BatchFn<F> {
    name: String,
    f: F,
}

impl<F, Fut> BatchFn<F>
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<Value>>> + Send + 'static,
{
    pub fn new(name: impl Into<String>, f: F) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            f,
        })
    }
}

#[async_trait]
impl<F, Fut> BatchFunction for BatchFn<F>
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<Value>>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(&self, keys: Vec<Value>) -> Result<Vec<Value>> {
        (self.f)(keys).await
    }
}

/// Maps a key to its deduplication identity.
pub type KeyFn = Arc<dyn Fn(&Value) -> String + Send + Sync>;

fn default_key(value: &Value) -> String {
    value.to_string()
}

/// Accumulated counters for one loader (or one subgraph, when merged).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    pub batch_count: u64,
    pub total_batch_size: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

impl BatchStats {
    pub fn average_batch_size(&self) -> f64 {
        if self.batch_count == 0 {
            0.0
        } else {
            self.total_batch_size as f64 / self.batch_count as f64
        }
    }

    pub fn cache_hit_ratio(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }

    /// Add `other`'s counters to these.
    pub fn merge(&mut self, other: &BatchStats) {
        self.batch_count += other.batch_count;
        self.total_batch_size += other.total_batch_size;
        self.cache_hits += other.cache_hits;
        self.cache_misses += other.cache_misses;
    }

    /// Counters accumulated after `earlier` was taken. A loader cleared in
    /// between restarts from zero, so the subtraction saturates.
    pub fn since(&self, earlier: &BatchStats) -> BatchStats {
        BatchStats {
            batch_count: self.batch_count.saturating_sub(earlier.batch_count),
            total_batch_size: self.total_batch_size.saturating_sub(earlier.total_batch_size),
            cache_hits: self.cache_hits.saturating_sub(earlier.cache_hits),
            cache_misses: self.cache_misses.saturating_sub(earlier.cache_misses),
        }
    }
}

type Waiter = oneshot::Sender<Result<Value>>;

#[derive(Default)]
struct LoaderState {
    memo: HashMap<String, Value>,
    /// Waiters for keys queued or in flight.
    waiters: HashMap<String, Vec<Waiter>>,
    /// Keys not yet dispatched, in arrival order.
    queue: Vec<(String, Value)>,
    window_scheduled: bool,
    /// Bumped by `clear` so in-flight batches don't repopulate the memo.
    generation: u64,
    stats: BatchStats,
}

struct LoaderInner {
    subgraph_id: String,
    batch_fn: Arc<dyn BatchFunction>,
    key_fn: KeyFn,
    config: BatchConfig,
    state: Mutex<LoaderState>,
}

/// Coalesces concurrent loads into batch calls. Cloning shares the loader.
#[derive(Clone)]
pub struct BatchLoader {
    inner: Arc<LoaderInner>,
}

impl std::fmt::Debug for BatchLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchLoader")
            .field("subgraph", &self.inner.subgraph_id)
            .field("batch_fn", &self.inner.batch_fn.name())
            .finish()
    }
}

enum Admission {
    Ready(Value),
    Wait(oneshot::Receiver<Result<Value>>),
}

impl BatchLoader {
    pub fn new(
        subgraph_id: impl Into<String>,
        batch_fn: Arc<dyn BatchFunction>,
        config: BatchConfig,
    ) -> Self {
        Self::with_key_fn(subgraph_id, batch_fn, config, Arc::new(default_key))
    }

    pub fn with_key_fn(
        subgraph_id: impl Into<String>,
        batch_fn: Arc<dyn BatchFunction>,
        config: BatchConfig,
        key_fn: KeyFn,
    ) -> Self {
        Self {
            inner: Arc::new(LoaderInner {
                subgraph_id: subgraph_id.into(),
                batch_fn,
                key_fn,
                config,
                state: Mutex::new(LoaderState::default()),
            }),
        }
    }

    pub fn subgraph_id(&self) -> &str {
        &self.inner.subgraph_id
    }

    pub fn batch_name(&self) -> &str {
        self.inner.batch_fn.name()
    }

    fn state(&self) -> MutexGuard<'_, LoaderState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve one key, coalescing with concurrent loads.
    pub async fn load(&self, key: Value) -> Result<Value> {
        match self.admit(key) {
            Admission::Ready(value) => Ok(value),
            Admission::Wait(rx) => rx.await.unwrap_or_else(|_| {
                Err(GatewayError::EntityResolution(format!(
                    "batch for subgraph '{}' was dropped",
                    self.inner.subgraph_id
                )))
            }),
        }
    }

    /// Resolve several keys; fails on the first error.
    pub async fn load_many(&self, keys: Vec<Value>) -> Result<Vec<Value>> {
        try_join_all(keys.into_iter().map(|key| self.load(key))).await
    }

    fn admit(&self, key: Value) -> Admission {
        let cache_key = (self.inner.key_fn)(&key);
        let (tx, rx) = oneshot::channel();

        let mut state = self.state();
        if let Some(value) = state.memo.get(&cache_key).cloned() {
            state.stats.cache_hits += 1;
            return Admission::Ready(value);
        }
        if let Some(waiters) = state.waiters.get_mut(&cache_key) {
            waiters.push(tx);
            state.stats.cache_hits += 1;
            return Admission::Wait(rx);
        }

        state.stats.cache_misses += 1;
        state.waiters.insert(cache_key.clone(), vec![tx]);
        state.queue.push((cache_key, key));

        if state.queue.len() >= self.inner.config.max_batch_size {
            let batch = std::mem::take(&mut state.queue);
            let generation = state.generation;
            drop(state);
            let loader = self.clone();
            tokio::spawn(async move { loader.dispatch(batch, generation).await });
        } else if !state.window_scheduled {
            state.window_scheduled = true;
            drop(state);
            let loader = self.clone();
            let window = self.inner.config.window();
            tokio::spawn(async move {
                tokio::time::sleep(window).await;
                let (batch, generation) = {
                    let mut state = loader.state();
                    state.window_scheduled = false;
                    (std::mem::take(&mut state.queue), state.generation)
                };
                if !batch.is_empty() {
                    loader.dispatch(batch, generation).await;
                }
            });
        }
        Admission::Wait(rx)
    }

    async fn dispatch(&self, batch: Vec<(String, Value)>, generation: u64) {
        let size = batch.len();
        let (cache_keys, keys): (Vec<String>, Vec<Value>) = batch.into_iter().unzip();

        tracing::debug!(
            subgraph = %self.inner.subgraph_id,
            batch_fn = self.inner.batch_fn.name(),
            size,
            "Dispatching batch"
        );
        metrics::record_batch(&self.inner.subgraph_id, size);

        let outcome = match self.inner.batch_fn.load(keys).await {
            Ok(values) if values.len() == size => Ok(values),
            Ok(values) => Err(GatewayError::EntityResolution(format!(
                "batch function '{}' for subgraph '{}' returned {} results, expected {}",
                self.inner.batch_fn.name(),
                self.inner.subgraph_id,
                values.len(),
                size
            ))),
            Err(e) => Err(e),
        };

        let mut state = self.state();
        state.stats.batch_count += 1;
        state.stats.total_batch_size += size as u64;
        let memoize = state.generation == generation;

        match outcome {
            Ok(values) => {
                for (cache_key, value) in cache_keys.into_iter().zip(values) {
                    for waiter in state.waiters.remove(&cache_key).unwrap_or_default() {
                        let _ = waiter.send(Ok(value.clone()));
                    }
                    if memoize {
                        state.memo.insert(cache_key, value);
                    }
                }
            }
            Err(e) => {
                tracing::warn!(
                    subgraph = %self.inner.subgraph_id,
                    batch_fn = self.inner.batch_fn.name(),
                    size,
                    error = %e,
                    "Batch failed"
                );
                for cache_key in cache_keys {
                    for waiter in state.waiters.remove(&cache_key).unwrap_or_default() {
                        let _ = waiter.send(Err(e.clone()));
                    }
                }
            }
        }
    }

    pub fn stats(&self) -> BatchStats {
        self.state().stats
    }

    /// Forget memoized results and reset statistics. In-flight loads still
    /// complete.
    pub fn clear(&self) {
        let mut state = self.state();
        state.memo.clear();
        state.stats = BatchStats::default();
        state.generation += 1;
    }
}

/// Lazily created loaders keyed by (subgraph, batch function name).
pub struct LoaderRegistry {
    config: BatchConfig,
    loaders: DashMap<(String, String), BatchLoader>,
}

impl LoaderRegistry {
    pub fn new(config: BatchConfig) -> Result<Self> {
        validate_batching(&config).map_err(into_composition_error)?;
        Ok(Self::from_validated(config))
    }

    /// Registry from configuration that was already validated.
    pub(crate) fn from_validated(config: BatchConfig) -> Self {
        Self {
            config,
            loaders: DashMap::new(),
        }
    }

    /// The loader for `(subgraph_id, batch_fn.name())`, created on first use.
    pub fn loader(&self, subgraph_id: &str, batch_fn: Arc<dyn BatchFunction>) -> BatchLoader {
        let key = (subgraph_id.to_string(), batch_fn.name().to_string());
        self.loaders
            .entry(key)
            .or_insert_with(|| BatchLoader::new(subgraph_id, batch_fn, self.config.clone()))
            .value()
            .clone()
    }

    /// Like [`loader`](Self::loader) with a custom deduplication key. The key
    /// function only applies when the loader is created by this call.
    pub fn loader_with_key_fn(
        &self,
        subgraph_id: &str,
        batch_fn: Arc<dyn BatchFunction>,
        key_fn: KeyFn,
    ) -> BatchLoader {
        let key = (subgraph_id.to_string(), batch_fn.name().to_string());
        self.loaders
            .entry(key)
            .or_insert_with(|| {
                BatchLoader::with_key_fn(subgraph_id, batch_fn, self.config.clone(), key_fn)
            })
            .value()
            .clone()
    }

    /// Stats merged across every loader of one subgraph.
    pub fn stats_for(&self, subgraph_id: &str) -> BatchStats {
        let mut total = BatchStats::default();
        for entry in self.loaders.iter().filter(|e| e.key().0 == subgraph_id) {
            total.merge(&entry.value().stats());
        }
        total
    }

    /// Stats per subgraph.
    pub fn all_stats(&self) -> HashMap<String, BatchStats> {
        let mut all: HashMap<String, BatchStats> = HashMap::new();
        for entry in self.loaders.iter() {
            all.entry(entry.key().0.clone())
                .or_default()
                .merge(&entry.value().stats());
        }
        all
    }

    pub fn len(&self) -> usize {
        self.loaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaders.is_empty()
    }

    /// Drop every loader and its memo.
    pub fn clear_all(&self) {
        for entry in self.loaders.iter() {
            entry.value().clear();
        }
        self.loaders.clear();
    }
}
