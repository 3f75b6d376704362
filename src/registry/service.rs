//! Subgraph service definitions and the concurrent service store.
//!
//! # Responsibilities
//! - Represent a single subgraph service (id + URL)
//! - Validate definitions before they enter the store
//! - Keep the id → definition map and the URL index consistent
//!
//! # Design Decisions
//! - Lock order is always services shard → URL shard
//! - Re-registering an id replaces the definition in place and drops the
//!   old URL from the index

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{GatewayError, Result};

/// A subgraph service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceDefinition {
    /// Unique, non-empty identifier.
    pub id: String,
    /// Base URL of the service.
    pub url: String,
}

impl ServiceDefinition {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
        }
    }

    /// Check that id and URL are non-empty and the URL parses.
    pub fn validate(&self) -> Result<Url> {
        if self.id.trim().is_empty() {
            return Err(GatewayError::Validation("service id must not be empty".into()));
        }
        if self.url.trim().is_empty() {
            return Err(GatewayError::Validation(format!(
                "service '{}' has an empty URL",
                self.id
            )));
        }
        Url::parse(&self.url).map_err(|e| {
            GatewayError::Validation(format!(
                "service '{}' has an invalid URL '{}': {}",
                self.id, self.url, e
            ))
        })
    }

    /// URL probed by health checks.
    pub fn health_url(&self) -> String {
        format!("{}/health", self.url.trim_end_matches('/'))
    }
}

/// Thread-safe store of registered services.
#[derive(Debug, Default)]
pub struct ServiceStore {
    services: DashMap<String, ServiceDefinition>,
    /// URL → id.
    by_url: DashMap<String, String>,
}

impl ServiceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a service. Returns the previous definition.
    pub fn upsert(&self, service: ServiceDefinition) -> Option<ServiceDefinition> {
        match self.services.entry(service.id.clone()) {
            Entry::Occupied(mut entry) => {
                let previous = entry.insert(service.clone());
                if previous.url != service.url {
                    self.by_url.remove_if(&previous.url, |_, id| *id == previous.id);
                }
                self.by_url.insert(service.url, service.id);
                Some(previous)
            }
            Entry::Vacant(entry) => {
                self.by_url.insert(service.url.clone(), service.id.clone());
                entry.insert(service);
                None
            }
        }
    }

    /// Remove a service by id.
    pub fn remove(&self, id: &str) -> Option<ServiceDefinition> {
        match self.services.entry(id.to_string()) {
            Entry::Occupied(entry) => {
                let url = entry.get().url.clone();
                self.by_url.remove_if(&url, |_, owner| owner == id);
                Some(entry.remove())
            }
            Entry::Vacant(_) => None,
        }
    }

    pub fn get(&self, id: &str) -> Option<ServiceDefinition> {
        self.services.get(id).map(|r| r.value().clone())
    }

    /// Id of the service registered at `url`.
    pub fn find_by_url(&self, url: &str) -> Option<String> {
        self.by_url.get(url).map(|r| r.value().clone())
    }

    /// All services, ordered by id.
    pub fn list(&self) -> Vec<ServiceDefinition> {
        let mut services: Vec<_> = self.services.iter().map(|r| r.value().clone()).collect();
        services.sort_by(|a, b| a.id.cmp(&b.id));
        services
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        assert!(ServiceDefinition::new("users", "http://localhost:4001").validate().is_ok());
        assert!(ServiceDefinition::new("", "http://localhost:4001").validate().is_err());
        assert!(ServiceDefinition::new("users", "").validate().is_err());

        let err = ServiceDefinition::new("users", "localhost:4001/graphql ql")
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("invalid URL"));
    }

    #[test]
    fn test_health_url() {
        let svc = ServiceDefinition::new("users", "http://localhost:4001/");
        assert_eq!(svc.health_url(), "http://localhost:4001/health");
    }

    #[test]
    fn test_reregistration_drops_old_url() {
        let store = ServiceStore::new();
        assert!(store
            .upsert(ServiceDefinition::new("users", "http://a:1"))
            .is_none());
        assert_eq!(store.find_by_url("http://a:1").as_deref(), Some("users"));

        let previous = store.upsert(ServiceDefinition::new("users", "http://b:2"));
        assert_eq!(previous.unwrap().url, "http://a:1");
        assert_eq!(store.len(), 1);
        assert!(store.find_by_url("http://a:1").is_none());
        assert_eq!(store.find_by_url("http://b:2").as_deref(), Some("users"));
    }

    #[test]
    fn test_remove() {
        let store = ServiceStore::new();
        store.upsert(ServiceDefinition::new("b", "http://b:2"));
        store.upsert(ServiceDefinition::new("a", "http://a:1"));
        assert_eq!(
            store.list().iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );

        assert!(store.remove("a").is_some());
        assert!(store.remove("a").is_none());
        assert!(store.find_by_url("http://a:1").is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_concurrent_upserts() {
        let store = std::sync::Arc::new(ServiceStore::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        store.upsert(ServiceDefinition::new(
                            format!("svc-{}", i % 10),
                            format!("http://host-{}:{}", t, i),
                        ));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.len(), 10);
        for service in store.list() {
            assert_eq!(store.find_by_url(&service.url).as_deref(), Some(service.id.as_str()));
        }
    }
}
