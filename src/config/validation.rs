//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds and timeouts > 0)
//! - Check that the selected discovery mode has something to discover
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is a pure function: &Config → Result<(), Vec<ValidationError>>
//! - Constructors fold the errors into a single composition error

use std::fmt;
use url::Url;

use crate::config::schema::{
    BatchConfig, BoundaryConfig, CircuitBreakerConfig, DiscoveryMode, PlanCacheConfig,
    RegistryConfig, RuntimeConfig,
};
use crate::error::GatewayError;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field.
    pub field: String,
    /// Human readable description.
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Fold validation errors into one composition error.
pub fn into_composition_error(errors: Vec<ValidationError>) -> GatewayError {
    let joined = errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    GatewayError::Composition(format!("invalid configuration: {}", joined))
}

pub fn validate_circuit_breaker(
    config: &CircuitBreakerConfig,
    errors: &mut Vec<ValidationError>,
) {
    if config.failure_threshold == 0 {
        errors.push(ValidationError::new(
            "circuit_breaker.failure_threshold",
            "must be greater than 0",
        ));
    }
    if config.reset_timeout_ms == 0 {
        errors.push(ValidationError::new(
            "circuit_breaker.reset_timeout_ms",
            "must be greater than 0",
        ));
    }
    if config.half_open_max_calls == 0 {
        errors.push(ValidationError::new(
            "circuit_breaker.half_open_max_calls",
            "must be at least 1",
        ));
    }
}

/// Validate an error boundary configuration.
pub fn validate_boundary(config: &BoundaryConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    validate_circuit_breaker(&config.circuit_breaker, &mut errors);

    if config.default_timeout_ms == 0 {
        errors.push(ValidationError::new(
            "boundary.default_timeout_ms",
            "must be greater than 0",
        ));
    }
    for (subgraph, ms) in &config.subgraph_timeouts_ms {
        if *ms == 0 {
            errors.push(ValidationError::new(
                format!("boundary.subgraph_timeouts_ms.{}", subgraph),
                "must be greater than 0",
            ));
        }
    }

    finish(errors)
}

/// Validate a registry configuration.
pub fn validate_registry(config: &RegistryConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    match config.discovery_mode {
        DiscoveryMode::Static => {
            if config.services.is_empty() {
                errors.push(ValidationError::new(
                    "registry.services",
                    "static discovery requires at least one service",
                ));
            }
            for (i, service) in config.services.iter().enumerate() {
                if let Err(e) = service.validate() {
                    errors.push(ValidationError::new(
                        format!("registry.services[{}]", i),
                        e.to_string(),
                    ));
                }
            }
        }
        DiscoveryMode::Dynamic => {
            if config.discovery_endpoints.is_empty() {
                errors.push(ValidationError::new(
                    "registry.discovery_endpoints",
                    "dynamic discovery requires at least one endpoint",
                ));
            }
            for (i, endpoint) in config.discovery_endpoints.iter().enumerate() {
                if Url::parse(endpoint).is_err() {
                    errors.push(ValidationError::new(
                        format!("registry.discovery_endpoints[{}]", i),
                        format!("invalid URL '{}'", endpoint),
                    ));
                }
            }
        }
    }

    if config.health_check_timeout_ms == 0 {
        errors.push(ValidationError::new(
            "registry.health_check_timeout_ms",
            "must be greater than 0",
        ));
    }
    if config.health_check_interval_secs == 0 {
        errors.push(ValidationError::new(
            "registry.health_check_interval_secs",
            "must be greater than 0",
        ));
    }
    if config.retry_policy.max_attempts == 0 {
        errors.push(ValidationError::new(
            "registry.retry_policy.max_attempts",
            "must be at least 1",
        ));
    }

    finish(errors)
}

pub fn validate_plan_cache(config: &PlanCacheConfig) -> Result<(), Vec<ValidationError>> {
    if config.max_size == 0 {
        return Err(vec![ValidationError::new(
            "plan_cache.max_size",
            "must be greater than 0",
        )]);
    }
    Ok(())
}

pub fn validate_batching(config: &BatchConfig) -> Result<(), Vec<ValidationError>> {
    if config.max_batch_size == 0 {
        return Err(vec![ValidationError::new(
            "batching.max_batch_size",
            "must be greater than 0",
        )]);
    }
    Ok(())
}

/// Validate the whole runtime configuration, collecting every error.
pub fn validate_config(config: &RuntimeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    for result in [
        validate_boundary(&config.boundary),
        validate_registry(&config.registry),
        validate_plan_cache(&config.plan_cache),
        validate_batching(&config.batching),
    ] {
        if let Err(mut e) = result {
            errors.append(&mut e);
        }
    }
    finish(errors)
}

fn finish(errors: Vec<ValidationError>) -> Result<(), Vec<ValidationError>> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ServiceDefinition;

    #[test]
    fn test_zero_threshold_rejected() {
        let mut config = BoundaryConfig::default();
        config.circuit_breaker.failure_threshold = 0;
        config.circuit_breaker.reset_timeout_ms = 0;

        let errors = validate_boundary(&config).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].to_string().contains("failure_threshold"));
    }

    #[test]
    fn test_static_registry_requires_services() {
        let config = RegistryConfig::default();
        let errors = validate_registry(&config).unwrap_err();
        assert_eq!(errors[0].field, "registry.services");

        let mut config = RegistryConfig::default();
        config
            .services
            .push(ServiceDefinition::new("users", "http://localhost:4001"));
        assert!(validate_registry(&config).is_ok());
    }

    #[test]
    fn test_zero_health_interval_rejected() {
        let mut config = RegistryConfig::default();
        config
            .services
            .push(ServiceDefinition::new("users", "http://localhost:4001"));
        config.health_check_interval_secs = 0;

        let errors = validate_registry(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "registry.health_check_interval_secs");
    }

    #[test]
    fn test_dynamic_registry_requires_endpoints() {
        let config = RegistryConfig {
            discovery_mode: DiscoveryMode::Dynamic,
            discovery_endpoints: vec!["not a url".into()],
            ..Default::default()
        };
        let errors = validate_registry(&config).unwrap_err();
        assert!(errors[0].message.contains("invalid URL"));
    }

    #[test]
    fn test_composition_error_lists_all() {
        let mut config = RuntimeConfig::default();
        config.plan_cache.max_size = 0;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 2);

        let err = into_composition_error(errors);
        assert_eq!(err.code(), "COMPOSITION_ERROR");
        assert!(err.to_string().contains("plan_cache.max_size"));
    }
}
