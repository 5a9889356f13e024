//! Application lifecycle signals

use tokio::sync::broadcast;
use tracing::debug;

/// Process lifecycle transitions the scheduler reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplicationEvent {
    /// The process is ready to do work
    Up,
    /// The process is going away
    Down,
}

/// Broadcasts lifecycle transitions
#[derive(Debug, Clone)]
pub struct Lifecycle {
    tx: broadcast::Sender<ApplicationEvent>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ApplicationEvent> {
        self.tx.subscribe()
    }

    /// Announce a transition to every listener
    pub fn signal(&self, event: ApplicationEvent) {
        let listeners = self.tx.send(event).unwrap_or(0);
        debug!(?event, listeners, "Lifecycle signal");
    }
}
