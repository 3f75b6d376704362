//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → tracing macros (structured log events, see logging.rs)
//!     → metrics.rs (counters, gauges, histograms via the `metrics` facade)
//!
//! Error boundary and executor additionally produce:
//!     → sink.rs (per-call samples, buffered and flushed on a cadence)
//! ```
//!
//! # Design Decisions
//! - Structured logging with fields, never formatted blobs, for state changes
//! - Metric updates are cheap; the recorder is installed by the host
//! - The sample buffer is an owned component injected into its users

pub mod logging;
pub mod metrics;
pub mod sink;

pub use sink::{BufferedMetricsSink, CallSample, ExecutionSample, MetricsSink, NoopSink};

use std::net::SocketAddr;

use crate::config::ObservabilityConfig;
use crate::error::{GatewayError, Result};

/// Install logging and, when enabled, the Prometheus exporter.
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    logging::init_logging(&config.log_level);

    if config.metrics_enabled {
        let addr: SocketAddr = config.metrics_address.parse().map_err(|e| {
            GatewayError::Composition(format!(
                "invalid metrics address '{}': {}",
                config.metrics_address, e
            ))
        })?;
        metrics::init_metrics(addr);
    }
    Ok(())
}
