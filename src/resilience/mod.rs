//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to a subgraph:
//!     → boundary.rs (per-subgraph policy, metrics sample)
//!     → circuit_breaker.rs (fail fast while open, track failures)
//!     → timeouts.rs (enforce the subgraph's deadline)
//!     → resolver
//!     ← failure: null field (partial mode) or propagated error (strict)
//!
//! Call to a discovery endpoint:
//!     → retries.rs (retry with backoff.rs delays)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Circuit breaker prevents cascading failures
//! - Errors are shaped for clients in one place (transform.rs)

pub mod backoff;
pub mod boundary;
pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;
pub mod transform;

pub use boundary::{BoundedResolver, ErrorBoundary, PartialResult, Resolver, SubgraphResult};
pub use circuit_breaker::{BreakerMetrics, CircuitBreaker, CircuitState};
pub use transform::{ErrorContext, ErrorTransformer, TransformedError};
