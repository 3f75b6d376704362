//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! host configuration (any serde format)
//!     → schema.rs (deserialize, defaults)
//!     → validation.rs (semantic checks)
//!     → RuntimeConfig (validated, immutable)
//!     → each component is built from its own section
//! ```
//!
//! # Design Decisions
//! - Config is immutable once a component is built from it
//! - All fields have defaults to allow minimal configs
//! - Invalid configuration fails construction, before any traffic

pub mod schema;
pub mod validation;

pub use schema::{
    BatchConfig, BoundaryConfig, CircuitBreakerConfig, CustomErrorTransform, DiscoveryMode,
    ErrorTransformationConfig, MetricsSinkConfig, ObservabilityConfig, PartialFailureConfig,
    PlanCacheConfig, RegistryConfig, RetryPolicy, RuntimeConfig,
};
pub use validation::{validate_config, ValidationError};
