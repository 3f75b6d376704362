//! Buffered per-call metrics.
//!
//! The error boundary and the executor report one sample per call. Samples
//! are buffered and flushed to the `metrics` facade on a fixed cadence so the
//! hot path only pays for a push onto a queue. Slow failures are logged
//! immediately, without waiting for the next flush.
//!
//! Each buffer holds at most `max_buffered_samples`; past that the oldest
//! samples are dropped and counted, so a sink whose flusher was never
//! forked stays bounded.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use uuid::Uuid;

use crate::config::MetricsSinkConfig;
use crate::lifecycle::task::loop_interval;
use crate::lifecycle::BackgroundTask;
use crate::observability::metrics;

/// One guarded subgraph call.
#[derive(Debug, Clone)]
pub struct CallSample {
    pub subgraph: String,
    pub duration: Duration,
    pub success: bool,
    pub error: Option<String>,
}

/// One executor run.
#[derive(Debug, Clone)]
pub struct ExecutionSample {
    pub request_id: Uuid,
    pub duration: Duration,
    pub success: bool,
    pub cache_hit: bool,
    pub subgraph_calls: Vec<String>,
}

/// Destination for call and execution samples.
pub trait MetricsSink: Send + Sync {
    fn record_call(&self, sample: CallSample);
    fn record_execution(&self, sample: ExecutionSample);
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl MetricsSink for NoopSink {
    fn record_call(&self, _sample: CallSample) {}
    fn record_execution(&self, _sample: ExecutionSample) {}
}

/// Sink that buffers samples and flushes them periodically.
#[derive(Debug)]
pub struct BufferedMetricsSink {
    config: MetricsSinkConfig,
    calls: Mutex<VecDeque<CallSample>>,
    executions: Mutex<VecDeque<ExecutionSample>>,
    flushed: AtomicU64,
    dropped: AtomicU64,
}

impl BufferedMetricsSink {
    pub fn new(config: MetricsSinkConfig) -> Self {
        Self {
            config,
            calls: Mutex::new(VecDeque::new()),
            executions: Mutex::new(VecDeque::new()),
            flushed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Append to a bounded buffer, evicting the oldest sample when full.
    fn push_bounded<T>(&self, buffer: &Mutex<VecDeque<T>>, sample: T) {
        let cap = self.config.max_buffered_samples.max(1);
        let mut buffer = buffer.lock().unwrap_or_else(PoisonError::into_inner);
        if buffer.len() >= cap {
            buffer.pop_front();
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if dropped == 1 || dropped % cap as u64 == 0 {
                tracing::warn!(cap, dropped, "Metrics buffer full, dropping oldest samples");
            }
        }
        buffer.push_back(sample);
    }

    /// Number of samples waiting for the next flush.
    pub fn pending(&self) -> usize {
        let calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner).len();
        let executions = self
            .executions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        calls + executions
    }

    /// Total samples flushed so far.
    pub fn flushed_count(&self) -> u64 {
        self.flushed.load(Ordering::Relaxed)
    }

    /// Samples evicted because a buffer was full.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Drain the buffers into the metrics recorder. Returns the sample count.
    pub fn flush(&self) -> usize {
        let calls = std::mem::take(&mut *self.calls.lock().unwrap_or_else(PoisonError::into_inner));
        let executions = std::mem::take(
            &mut *self
                .executions
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );

        for sample in &calls {
            metrics::record_subgraph_call(&sample.subgraph, sample.success, sample.duration);
        }
        for sample in &executions {
            metrics::record_execution(sample.success, sample.cache_hit, sample.duration);
        }

        let total = calls.len() + executions.len();
        if total > 0 {
            let failures = calls.iter().filter(|s| !s.success).count();
            tracing::debug!(
                calls = calls.len(),
                failures,
                executions = executions.len(),
                "Flushed metrics buffer"
            );
        }
        self.flushed.fetch_add(total as u64, Ordering::Relaxed);
        total
    }

    /// Fork the periodic flush loop.
    #[must_use = "dropping the handle detaches the flush loop"]
    pub fn spawn_flusher(self: &Arc<Self>) -> BackgroundTask {
        let sink = Arc::clone(self);
        let interval = loop_interval("metrics-flush", self.config.flush_interval());

        BackgroundTask::spawn("metrics-flush", move |mut shutdown| async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        sink.flush();
                    }
                    _ = shutdown.recv() => {
                        sink.flush();
                        break;
                    }
                }
            }
        })
    }
}

impl Default for BufferedMetricsSink {
    fn default() -> Self {
        Self::new(MetricsSinkConfig::default())
    }
}

impl MetricsSink for BufferedMetricsSink {
    fn record_call(&self, sample: CallSample) {
        if !sample.success && sample.duration > self.config.slow_call_threshold() {
            tracing::warn!(
                subgraph = %sample.subgraph,
                duration_ms = sample.duration.as_millis() as u64,
                error = sample.error.as_deref().unwrap_or("unknown"),
                "Slow subgraph failure"
            );
        }
        self.push_bounded(&self.calls, sample);
    }

    fn record_execution(&self, sample: ExecutionSample) {
        self.push_bounded(&self.executions, sample);
    }
}
