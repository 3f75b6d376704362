//! Error taxonomy for the federation runtime.
//!
//! Every fallible operation in the crate returns [`GatewayError`]. Variants
//! only carry owned strings and plain values so an error can be cloned and
//! handed to every caller waiting on the same batch.

use std::time::Duration;
use thiserror::Error;

/// Errors raised by the resilience, registry and performance layers.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GatewayError {
    /// Input failed validation (bad service definition, bad arguments).
    #[error("Validation error: {0}")]
    Validation(String),

    /// An entity could not be resolved by its owning subgraph.
    #[error("Entity resolution error: {0}")]
    EntityResolution(String),

    /// A field resolver failed.
    #[error("Field resolution error: {0}")]
    FieldResolution(String),

    /// One or more subgraphs failed and partial results are not allowed.
    #[error("Federation error: subgraphs failed: {}", .failed.join(", "))]
    Federation { failed: Vec<String> },

    /// A subgraph marked as critical failed.
    #[error("Critical subgraph failure: {}", .failed.join(", "))]
    CriticalSubgraphFailure { failed: Vec<String> },

    /// The circuit breaker for a subgraph rejected the call.
    #[error("Circuit breaker open for subgraph {subgraph}")]
    CircuitOpen {
        subgraph: String,
        retry_after: Option<Duration>,
    },

    /// A call exceeded its deadline.
    #[error("Subgraph {subgraph} timed out after {}ms", .after.as_millis())]
    Timeout { subgraph: String, after: Duration },

    /// Invalid configuration or a failed topology change.
    #[error("Composition error: {0}")]
    Composition(String),

    /// A discovery endpoint could not be read.
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// A service could not be registered or unregistered.
    #[error("Registration error: {0}")]
    Registration(String),

    /// A health check could not be performed.
    #[error("Health check error: {0}")]
    HealthCheck(String),

    /// Opaque failure reported by an upstream call.
    #[error("Upstream error: {0}")]
    Upstream(String),
}

impl GatewayError {
    /// Stable machine-readable code for the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Validation(_) => "VALIDATION_ERROR",
            GatewayError::EntityResolution(_) => "ENTITY_RESOLUTION_ERROR",
            GatewayError::FieldResolution(_) => "FIELD_RESOLUTION_ERROR",
            GatewayError::Federation { .. } => "FEDERATION_ERROR",
            GatewayError::CriticalSubgraphFailure { .. } => "CRITICAL_SUBGRAPH_FAILURE",
            GatewayError::CircuitOpen { .. } => "CIRCUIT_BREAKER_OPEN",
            GatewayError::Timeout { .. } => "TIMEOUT",
            GatewayError::Composition(_) => "COMPOSITION_ERROR",
            GatewayError::Discovery(_) => "DISCOVERY_ERROR",
            GatewayError::Registration(_) => "REGISTRATION_ERROR",
            GatewayError::HealthCheck(_) => "HEALTH_CHECK_ERROR",
            GatewayError::Upstream(_) => "UPSTREAM_ERROR",
        }
    }

    /// Underlying detail, used as the "stack" when stack traces are exposed.
    pub fn detail(&self) -> Option<String> {
        match self {
            GatewayError::CircuitOpen {
                retry_after: Some(wait),
                ..
            } => Some(format!("retry after {}ms", wait.as_millis())),
            GatewayError::Upstream(msg)
            | GatewayError::FieldResolution(msg)
            | GatewayError::EntityResolution(msg) => Some(msg.clone()),
            _ => None,
        }
    }

    /// Build an upstream error from any displayable failure.
    pub fn upstream(err: impl std::fmt::Display) -> Self {
        GatewayError::Upstream(err.to_string())
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        GatewayError::Upstream(err.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Validation(err.to_string())
    }
}

/// Result type for runtime operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
