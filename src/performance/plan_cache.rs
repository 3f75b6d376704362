//! Bounded query plan cache.
//!
//! # Responsibilities
//! - Map a (query, variables) key to a previously built plan
//! - Evict the least recently accessed tenth when full
//! - Track hits, misses and evictions
//!
//! # Design Decisions
//! - Lookups go straight to the concurrent map; inserts are serialized so
//!   capacity is enforced exactly
//! - Recency is a monotonic tick, so entries touched within the same clock
//!   resolution still order correctly

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use crate::config::validation::{into_composition_error, validate_plan_cache};
use crate::config::PlanCacheConfig;
use crate::error::Result;
use crate::observability::metrics;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// One step of a query plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub subgraph_id: String,
    pub operation: String,
    /// Indices of steps that must finish first.
    #[serde(default)]
    pub depends_on: Vec<usize>,
}

/// The resolved steps for one query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryPlan {
    pub query: String,
    pub steps: Vec<PlanStep>,
}

impl QueryPlan {
    /// Distinct subgraphs touched, in step order.
    pub fn subgraphs(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for step in &self.steps {
            if !seen.contains(&step.subgraph_id.as_str()) {
                seen.push(step.subgraph_id.as_str());
            }
        }
        seen
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub plan: Arc<QueryPlan>,
    pub created_at: Instant,
    pub access_count: u64,
    pub last_accessed: Instant,
    tick: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PlanCacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub miss_rate: f64,
    pub eviction_count: u64,
}

/// Deterministic cache key for a query and its variables.
///
/// Variables are serialized with sorted keys, so equal variable sets hash
/// the same regardless of insertion order.
pub fn plan_cache_key(query: &str, variables: Option<&Value>) -> String {
    let mut hash = fnv1a(FNV_OFFSET_BASIS, query.as_bytes());
    if let Some(vars) = variables.filter(|v| !v.is_null()) {
        hash = fnv1a(hash, &[0]);
        hash = fnv1a(hash, sort_json_value(vars).to_string().as_bytes());
    }
    format!("{:08x}", hash)
}

fn fnv1a(mut hash: u32, bytes: &[u8]) -> u32 {
    for byte in bytes {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

fn sort_json_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: Vec<_> = map.iter().collect();
            sorted.sort_by_key(|(k, _)| *k);
            Value::Object(
                sorted
                    .into_iter()
                    .map(|(k, v)| (k.clone(), sort_json_value(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_json_value).collect()),
        _ => value.clone(),
    }
}

/// Thread-safe plan cache with least-recently-accessed eviction.
#[derive(Debug)]
pub struct PlanCache {
    max_size: usize,
    entries: DashMap<String, CacheEntry>,
    write_lock: Mutex<()>,
    clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl PlanCache {
    pub fn new(config: PlanCacheConfig) -> Result<Self> {
        validate_plan_cache(&config).map_err(into_composition_error)?;
        Ok(Self {
            max_size: config.max_size,
            entries: DashMap::with_capacity(config.max_size.min(10_000)),
            write_lock: Mutex::new(()),
            clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        })
    }

    fn next_tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Look up a plan, refreshing its recency on a hit.
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let found = self.entries.get_mut(key).map(|mut entry| {
            entry.access_count += 1;
            entry.last_accessed = Instant::now();
            entry.tick = self.next_tick();
            entry.clone()
        });

        match &found {
            Some(_) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(cache_key = %key, "Plan cache hit");
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(cache_key = %key, "Plan cache miss");
            }
        }
        metrics::record_plan_cache_lookup(found.is_some());
        found
    }

    /// Store a plan, evicting first if the cache is full.
    pub fn set(&self, key: impl Into<String>, plan: QueryPlan) {
        let key = key.into();
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_size {
            self.evict();
        }

        let now = Instant::now();
        self.entries.insert(
            key,
            CacheEntry {
                plan: Arc::new(plan),
                created_at: now,
                access_count: 1,
                last_accessed: now,
                tick: self.next_tick(),
            },
        );
        metrics::record_plan_cache_size(self.entries.len());
    }

    fn evict(&self) {
        let count = eviction_batch(self.max_size);
        let mut by_recency: Vec<(u64, String)> = self
            .entries
            .iter()
            .map(|e| (e.value().tick, e.key().clone()))
            .collect();
        by_recency.sort_unstable();

        let mut evicted = 0;
        for (_, key) in by_recency.into_iter().take(count) {
            if self.entries.remove(&key).is_some() {
                evicted += 1;
            }
        }

        self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
        metrics::record_plan_cache_evictions(evicted);
        tracing::debug!(evicted, max_size = self.max_size, "Plan cache evicted entries");
    }

    /// Remove every key containing `pattern`, or everything when `None`.
    /// Returns the number of removed entries.
    pub fn invalidate(&self, pattern: Option<&str>) -> usize {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let before = self.entries.len();
        match pattern {
            Some(p) => self.entries.retain(|key, _| !key.contains(p)),
            None => self.entries.clear(),
        }
        let removed = before.saturating_sub(self.entries.len());
        metrics::record_plan_cache_size(self.entries.len());
        tracing::info!(pattern = pattern.unwrap_or("*"), removed, "Plan cache invalidated");
        removed
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> PlanCacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let (hit_rate, miss_rate) = if total == 0 {
            (0.0, 0.0)
        } else {
            let hit_rate = hits as f64 / total as f64;
            (hit_rate, 1.0 - hit_rate)
        };

        PlanCacheStats {
            size: self.entries.len(),
            max_size: self.max_size,
            hits,
            misses,
            hit_rate,
            miss_rate,
            eviction_count: self.evictions.load(Ordering::Relaxed),
        }
    }
}

/// Entries evicted when the cache is full: a tenth of capacity, at least one.
fn eviction_batch(max_size: usize) -> usize {
    max_size.div_ceil(10).max(1)
}
