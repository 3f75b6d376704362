//! The subgraph registry.
//!
//! # Responsibilities
//! - Own the set of known services (static list or dynamic discovery)
//! - Register/unregister services and notify the recomposition hook
//! - Probe service health on demand or periodically

use std::sync::Arc;
use std::time::Duration;

use crate::config::validation::{into_composition_error, validate_registry};
use crate::config::{DiscoveryMode, RegistryConfig};
use crate::error::{GatewayError, Result};
use crate::health::{HealthChecker, HealthMonitor, HealthStatus};
use crate::lifecycle::BackgroundTask;
use crate::registry::discovery::{discover_endpoints, DiscoveryLoop};
use crate::registry::hook::{LoggingHook, RecompositionHook, TopologyChange};
use crate::registry::service::{ServiceDefinition, ServiceStore};

pub struct SubgraphRegistry {
    config: RegistryConfig,
    store: ServiceStore,
    client: reqwest::Client,
    checker: HealthChecker,
    hook: Arc<dyn RecompositionHook>,
}

impl std::fmt::Debug for SubgraphRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubgraphRegistry")
            .field("mode", &self.config.discovery_mode)
            .field("services", &self.store.len())
            .finish()
    }
}

impl SubgraphRegistry {
    /// Build a registry. Static services are loaded immediately without
    /// notifying the hook.
    pub fn new(config: RegistryConfig, hook: Arc<dyn RecompositionHook>) -> Result<Self> {
        validate_registry(&config).map_err(into_composition_error)?;

        // Subgraphs and discovery endpoints are internal; ignore proxy env vars.
        let client = reqwest::Client::builder()
            .no_proxy()
            .build()
            .map_err(|e| GatewayError::Composition(format!("failed to build HTTP client: {}", e)))?;
        let checker = HealthChecker::new(client.clone(), config.health_check_timeout());

        let store = ServiceStore::new();
        if config.discovery_mode == DiscoveryMode::Static {
            for service in &config.services {
                store.upsert(service.clone());
            }
        }

        tracing::info!(
            mode = ?config.discovery_mode,
            services = store.len(),
            endpoints = config.discovery_endpoints.len(),
            "Subgraph registry initialized"
        );

        Ok(Self {
            config,
            store,
            client,
            checker,
            hook,
        })
    }

    /// Build a registry whose hook only logs.
    pub fn with_logging_hook(config: RegistryConfig) -> Result<Self> {
        Self::new(config, Arc::new(LoggingHook))
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Add or replace a service.
    pub fn register(&self, service: ServiceDefinition) -> Result<()> {
        service
            .validate()
            .map_err(|e| GatewayError::Registration(e.to_string()))?;

        let previous = self.store.upsert(service.clone());
        tracing::info!(
            service = %service.id,
            url = %service.url,
            replaced = previous.is_some(),
            "Registered service"
        );
        self.hook
            .on_topology_change(&TopologyChange::Registered(service));
        Ok(())
    }

    /// Remove a service by id.
    pub fn unregister(&self, id: &str) -> Result<ServiceDefinition> {
        let removed = self
            .store
            .remove(id)
            .ok_or_else(|| GatewayError::Registration(format!("unknown service '{}'", id)))?;

        tracing::info!(service = %removed.id, "Unregistered service");
        self.hook
            .on_topology_change(&TopologyChange::Unregistered(removed.clone()));
        Ok(removed)
    }

    pub fn get(&self, id: &str) -> Option<ServiceDefinition> {
        self.store.get(id)
    }

    /// Registered services ordered by id.
    pub fn list(&self) -> Vec<ServiceDefinition> {
        self.store.list()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Resolve the current service list.
    ///
    /// Static mode returns the configured list. Dynamic mode queries every
    /// endpoint, stores the result and fires the hook for services that are
    /// new or whose URL changed.
    pub async fn discover(&self) -> Result<Vec<ServiceDefinition>> {
        match self.config.discovery_mode {
            DiscoveryMode::Static => Ok(self.config.services.clone()),
            DiscoveryMode::Dynamic => {
                let services = discover_endpoints(
                    &self.client,
                    &self.config.discovery_endpoints,
                    &self.config.retry_policy,
                    self.config.health_check_timeout(),
                )
                .await;

                for service in &services {
                    let previous = self.store.upsert(service.clone());
                    let changed = previous.map_or(true, |p| p.url != service.url);
                    if changed {
                        self.hook
                            .on_topology_change(&TopologyChange::Registered(service.clone()));
                    }
                }
                Ok(services)
            }
        }
    }

    /// Probe one registered service.
    pub async fn health(&self, id: &str) -> Result<HealthStatus> {
        let service = self
            .store
            .get(id)
            .ok_or_else(|| GatewayError::HealthCheck(format!("unknown service '{}'", id)))?;
        Ok(self.checker.check(&service).await)
    }

    /// Probe every registered service.
    pub async fn health_all(&self) -> Vec<HealthStatus> {
        let services = self.store.list();
        self.checker.check_all(&services).await
    }

    /// Fork periodic discovery rounds.
    #[must_use = "dropping the handle detaches the discovery loop"]
    pub fn with_auto_discovery(self: &Arc<Self>, interval: Duration) -> BackgroundTask {
        let discovery = DiscoveryLoop::new(Arc::clone(self), interval);
        BackgroundTask::spawn("auto-discovery", move |shutdown| discovery.run(shutdown))
    }

    /// Fork periodic health rounds.
    #[must_use = "dropping the handle detaches the health monitor"]
    pub fn with_health_monitoring(self: &Arc<Self>, interval: Duration) -> BackgroundTask {
        let monitor = HealthMonitor::new(Arc::clone(self), interval);
        BackgroundTask::spawn("health-monitor", move |shutdown| monitor.run(shutdown))
    }

    /// Fork health rounds every `health_check_interval_secs`.
    #[must_use = "dropping the handle detaches the health monitor"]
    pub fn with_health_monitoring_default(self: &Arc<Self>) -> BackgroundTask {
        self.with_health_monitoring(self.config.health_check_interval())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::hook::RecordingHook;

    fn static_config() -> RegistryConfig {
        RegistryConfig {
            services: vec![ServiceDefinition::new("users", "http://localhost:4001")],
            ..RegistryConfig::default()
        }
    }

    #[test]
    fn test_static_services_seeded_without_hook() {
        let hook = RecordingHook::new();
        let registry = SubgraphRegistry::new(static_config(), hook.clone()).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.get("users").is_some());
        assert!(hook.changes().is_empty());
    }

    #[test]
    fn test_invalid_config_is_composition_error() {
        let err = SubgraphRegistry::with_logging_hook(RegistryConfig::default()).unwrap_err();
        assert_eq!(err.code(), "COMPOSITION_ERROR");

        let dynamic = RegistryConfig {
            discovery_mode: DiscoveryMode::Dynamic,
            ..RegistryConfig::default()
        };
        assert!(SubgraphRegistry::with_logging_hook(dynamic).is_err());
    }

    #[test]
    fn test_register_and_unregister_fire_hook() {
        let hook = RecordingHook::new();
        let registry = SubgraphRegistry::new(static_config(), hook.clone()).unwrap();

        let orders = ServiceDefinition::new("orders", "http://localhost:4002");
        registry.register(orders.clone()).unwrap();
        assert_eq!(registry.len(), 2);

        let removed = registry.unregister("orders").unwrap();
        assert_eq!(removed, orders);
        assert_eq!(
            hook.changes(),
            vec![
                TopologyChange::Registered(orders.clone()),
                TopologyChange::Unregistered(orders),
            ]
        );
    }

    #[test]
    fn test_register_rejects_invalid_definition() {
        let hook = RecordingHook::new();
        let registry = SubgraphRegistry::new(static_config(), hook.clone()).unwrap();

        let err = registry
            .register(ServiceDefinition::new("", "http://localhost:4002"))
            .unwrap_err();
        assert_eq!(err.code(), "REGISTRATION_ERROR");
        assert!(registry
            .register(ServiceDefinition::new("orders", "::nope::"))
            .is_err());
        assert!(hook.changes().is_empty());
    }

    #[test]
    fn test_unregister_unknown() {
        let registry = SubgraphRegistry::with_logging_hook(static_config()).unwrap();
        let err = registry.unregister("ghost").unwrap_err();
        assert_eq!(err.code(), "REGISTRATION_ERROR");
    }

    #[tokio::test]
    async fn test_static_discover_returns_config() {
        let registry = SubgraphRegistry::with_logging_hook(static_config()).unwrap();
        registry
            .register(ServiceDefinition::new("orders", "http://localhost:4002"))
            .unwrap();
        let services = registry.discover().await.unwrap();
        assert_eq!(services, static_config().services);
    }

    #[tokio::test]
    async fn test_health_unknown_service() {
        let registry = SubgraphRegistry::with_logging_hook(static_config()).unwrap();
        let err = registry.health("ghost").await.unwrap_err();
        assert_eq!(err.code(), "HEALTH_CHECK_ERROR");
    }

    #[tokio::test]
    async fn test_zero_interval_monitor_keeps_running() {
        let registry = Arc::new(SubgraphRegistry::with_logging_hook(static_config()).unwrap());
        let task = registry.with_health_monitoring(Duration::ZERO);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!task.is_finished());
        task.shutdown().await;
    }

    #[tokio::test]
    async fn test_default_monitoring_uses_configured_interval() {
        let config = RegistryConfig {
            health_check_interval_secs: 3600,
            ..static_config()
        };
        let registry = Arc::new(SubgraphRegistry::with_logging_hook(config).unwrap());
        assert_eq!(registry.config().health_check_interval(), Duration::from_secs(3600));

        let task = registry.with_health_monitoring_default();
        assert_eq!(task.name(), "health-monitor");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());
        task.shutdown().await;
    }
}
