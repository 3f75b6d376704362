//! Subgraph registry subsystem.
//!
//! # Data Flow
//! ```text
//! Static:   RegistryConfig.services → ServiceStore (at construction)
//! Dynamic:  discovery endpoints (≤3 in parallel, retried)
//!               → shape check → dedupe by id
//!               → ServiceStore → RecompositionHook (new or moved services)
//! register / unregister → ServiceStore → RecompositionHook
//! ```
//!
//! # Design Decisions
//! - The store is a concurrent map; reads never block discovery
//! - A failing discovery endpoint never fails the round

pub mod discovery;
pub mod hook;
pub mod manager;
pub mod service;

pub use discovery::{parse_services, DISCOVERY_CONCURRENCY};
pub use hook::{LoggingHook, RecompositionHook, RecordingHook, TopologyChange};
pub use manager::SubgraphRegistry;
pub use service::{ServiceDefinition, ServiceStore};
