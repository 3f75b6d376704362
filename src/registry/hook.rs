//! Topology change notifications.

use std::sync::{Arc, Mutex, PoisonError};

use crate::registry::service::ServiceDefinition;

/// A change to the set of registered services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyChange {
    /// A service was added or its definition replaced.
    Registered(ServiceDefinition),
    Unregistered(ServiceDefinition),
}

impl TopologyChange {
    pub fn service(&self) -> &ServiceDefinition {
        match self {
            TopologyChange::Registered(s) | TopologyChange::Unregistered(s) => s,
        }
    }
}

/// Called after every successful topology change so the host can recompose
/// its supergraph.
pub trait RecompositionHook: Send + Sync {
    fn on_topology_change(&self, change: &TopologyChange);
}

/// Hook that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHook;

impl RecompositionHook for LoggingHook {
    fn on_topology_change(&self, change: &TopologyChange) {
        match change {
            TopologyChange::Registered(s) => {
                tracing::info!(service = %s.id, url = %s.url, "Service registered, recomposition required");
            }
            TopologyChange::Unregistered(s) => {
                tracing::info!(service = %s.id, url = %s.url, "Service unregistered, recomposition required");
            }
        }
    }
}

/// Hook that keeps every change it sees.
#[derive(Debug, Default)]
pub struct RecordingHook {
    changes: Mutex<Vec<TopologyChange>>,
}

impl RecordingHook {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn changes(&self) -> Vec<TopologyChange> {
        self.changes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl RecompositionHook for RecordingHook {
    fn on_topology_change(&self, change: &TopologyChange) {
        self.changes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(change.clone());
    }
}
