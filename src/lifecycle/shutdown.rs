//! Stop signal for forked loops.

use tokio::sync::broadcast;

/// One-shot stop signal shared by a background loop and its handle.
///
/// Discovery, health monitoring and metric flushing each get their own
/// instance. The loop holds a receiver and checks it between rounds; a round
/// already in flight finishes before the loop notices.
///
/// Clones share the same channel. The channel stays open while any clone is
/// alive, which is what lets a loop outlive a dropped handle.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        // A single slot is enough: the signal carries no payload and is
        // only ever sent to stop.
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Receiver for a loop's `select!`.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Ask every subscribed loop to stop. Harmless if none is listening.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Loops still holding a receiver.
    pub fn listeners(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_reaches_every_loop() {
        let shutdown = Shutdown::new();
        let mut discovery = shutdown.subscribe();
        let mut health = shutdown.clone().subscribe();
        assert_eq!(shutdown.listeners(), 2);

        shutdown.trigger();
        assert!(discovery.recv().await.is_ok());
        assert!(health.recv().await.is_ok());
    }

    #[tokio::test]
    async fn test_trigger_without_listeners() {
        let shutdown = Shutdown::default();
        assert_eq!(shutdown.listeners(), 0);
        shutdown.trigger();

        let mut late = shutdown.subscribe();
        assert!(late.try_recv().is_err());
    }
}
