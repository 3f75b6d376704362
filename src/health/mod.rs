//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! SubgraphRegistry::health / health_all
//!     → active.rs (GET {url}/health under a timeout)
//!     → state.rs (status code + latency → Healthy | Degraded | Unhealthy)
//!
//! HealthMonitor (active.rs):
//!     Periodic timer
//!     → health_all with adaptive parallelism
//!     → log per-service results
//! ```
//!
//! # Design Decisions
//! - A probe never errors; failures are reported as an unhealthy status
//! - Health is reported, never acted on; routing decisions belong to callers

pub mod active;
pub mod state;

pub use active::{health_concurrency, HealthChecker, HealthMonitor};
pub use state::{classify, HealthMetrics, HealthState, HealthStatus};
