//! Resilience and optimization runtime for a federated query gateway.
//!
//! Subsystems, leaves first:
//! - [`resilience`]: circuit breakers, timeouts, retries and the error boundary
//! - [`registry`] + [`health`]: subgraph discovery, registration and health
//! - [`performance`]: plan cache, batching loaders and the optimized executor
//! - [`observability`] + [`lifecycle`]: logging, metrics, background tasks

pub mod config;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod observability;
pub mod performance;
pub mod registry;
pub mod resilience;

pub use config::RuntimeConfig;
pub use error::{GatewayError, Result};
pub use lifecycle::{BackgroundTask, Shutdown};
pub use performance::OptimizedExecutor;
pub use registry::SubgraphRegistry;
pub use resilience::{CircuitBreaker, ErrorBoundary};
