//! Supervised background tasks.

use std::future::Future;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::lifecycle::Shutdown;

/// Shortest period a background loop will tick at.
pub const MIN_LOOP_INTERVAL: Duration = Duration::from_millis(100);

/// Raise a configured period to [`MIN_LOOP_INTERVAL`].
///
/// `tokio::time::interval` panics on zero, which would kill the loop with
/// nobody watching.
pub(crate) fn loop_interval(task: &str, requested: Duration) -> Duration {
    if requested < MIN_LOOP_INTERVAL {
        tracing::warn!(
            task,
            requested_ms = requested.as_millis() as u64,
            min_ms = MIN_LOOP_INTERVAL.as_millis() as u64,
            "Loop interval too short, clamping"
        );
        MIN_LOOP_INTERVAL
    } else {
        requested
    }
}

/// Handle to a named background loop.
///
/// The loop keeps running until [`cancel`](Self::cancel) or
/// [`shutdown`](Self::shutdown) is called. Dropping the handle detaches the
/// loop; it then runs until the runtime itself stops.
#[derive(Debug)]
#[must_use = "dropping the handle detaches the loop; keep it to stop the loop later"]
pub struct BackgroundTask {
    name: String,
    shutdown: Shutdown,
    handle: JoinHandle<()>,
}

impl BackgroundTask {
    /// Spawn `f` on the current runtime.
    pub fn spawn<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: FnOnce(broadcast::Receiver<()>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let shutdown = Shutdown::new();
        // Subscribe before spawning so an early cancel is never missed.
        let rx = shutdown.subscribe();
        let fut = f(rx);
        // The loop owns a sender too, otherwise dropping the handle would
        // close the channel and the loop would read that as a stop.
        let keepalive = shutdown.clone();
        let handle = tokio::spawn(async move {
            let _keepalive = keepalive;
            fut.await;
        });
        tracing::debug!(task = %name, "Background task started");

        Self {
            name,
            shutdown,
            handle,
        }
    }

    /// Task name, for logging.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Signal the loop to stop after its current round.
    pub fn cancel(&self) {
        self.shutdown.trigger();
    }

    /// True once the loop has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signal the loop and wait for it to exit.
    pub async fn shutdown(self) {
        self.shutdown.trigger();
        if let Err(e) = self.handle.await {
            if !e.is_cancelled() {
                tracing::error!(task = %self.name, error = %e, "Background task panicked");
            }
        }
        tracing::debug!(task = %self.name, "Background task stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn ticker(ticks: Arc<AtomicU32>, period: Duration) -> BackgroundTask {
        BackgroundTask::spawn("ticker", move |mut shutdown| async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        ticks.fetch_add(1, Ordering::SeqCst);
                    }
                    _ = shutdown.recv() => break,
                }
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_stops_on_shutdown() {
        let ticks = Arc::new(AtomicU32::new(0));
        let task = ticker(ticks.clone(), Duration::from_millis(100));

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(!task.is_finished());
        task.shutdown().await;

        let seen = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), seen);
        assert!(seen >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_handle_keeps_loop_running() {
        let ticks = Arc::new(AtomicU32::new(0));
        drop(ticker(ticks.clone(), Duration::from_millis(100)));

        tokio::time::sleep(Duration::from_millis(150)).await;
        let early = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(ticks.load(Ordering::SeqCst) >= early + 3);
    }

    #[tokio::test]
    async fn test_cancel_before_first_poll() {
        let task = BackgroundTask::spawn("noop", |mut shutdown| async move {
            let _ = shutdown.recv().await;
        });
        task.cancel();
        assert_eq!(task.name(), "noop");
        task.shutdown().await;
    }

    #[test]
    fn test_loop_interval_clamps_zero() {
        assert_eq!(loop_interval("t", Duration::ZERO), MIN_LOOP_INTERVAL);
        assert_eq!(
            loop_interval("t", Duration::from_secs(30)),
            Duration::from_secs(30)
        );
    }
}
