//! Shutdown coordination for accept loops.

use tokio::sync::broadcast;

/// Coordinator for stopping long-running loops.
///
/// Provides a broadcast channel that loops subscribe to. Dropping the
/// coordinator closes the channel, which subscribers treat as a shutdown.
#[derive(Debug)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        // no subscribers left means nothing is running
        let _ = self.tx.send(());
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
