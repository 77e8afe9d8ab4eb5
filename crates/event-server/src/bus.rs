use std::sync::Arc;

use sureroute_protocol::Event;
use tokio::sync::broadcast;

use crate::EVENT_BUFFER_SIZE;

/// Broadcast channel of serialized events. Cheap to clone.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Arc<str>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_BUFFER_SIZE)
    }

    /// Creates a bus that buffers `capacity` events per listener.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Serializes `event` once and hands it to every current listener.
    ///
    /// Returns the number of listeners it was queued for. Having none is
    /// not an error.
    pub fn publish(&self, event: &Event) -> usize {
        let json = match serde_json::to_string(event) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(event = event.name(), "failed to serialize event: {e}");
                return 0;
            }
        };
        self.tx.send(Arc::from(json)).unwrap_or(0)
    }

    /// Registers a new listener.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<str>> {
        self.tx.subscribe()
    }

    /// Number of listeners currently subscribed.
    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
