//! Performance subsystem.
//!
//! # Data Flow
//! ```text
//! OptimizedExecutor (executor.rs)
//!     → PlanCache (plan_cache.rs): key = FNV-1a(query, sorted variables)
//!     → external planner on miss
//!     → external engine, with a per-request LoaderRegistry (batch.rs)
//!         → BatchLoader per (subgraph, batch function)
//! ```
//!
//! # Design Decisions
//! - The plan cache is shared by requests; loaders and their memos are not
//! - Batch statistics are summed into the executor after each request
//! - Collisions in the plan key only cost a cache miss

pub mod batch;
pub mod executor;
pub mod plan_cache;

pub use batch::{BatchFn, BatchFunction, BatchLoader, BatchStats, KeyFn, LoaderRegistry};
pub use executor::{
    ExecutionContext, ExecutionEngine, ExecutionOutput, ExecutionResult, ExecutorStats,
    OptimizedExecutor, QueryPlanner,
};
pub use plan_cache::{plan_cache_key, CacheEntry, PlanCache, PlanCacheStats, PlanStep, QueryPlan};
