//! Lifecycle event source for `WAIT` instructions.
//!
//! Built on `tokio::sync::broadcast`: each executor holds its own receiver,
//! so every pipeline waiting on an event sees it. Events emitted before a
//! receiver subscribes are not replayed to it.

use tokio::sync::broadcast;

/// Broadcast channel of lifecycle event names.
pub struct LifecycleBus {
    sender: broadcast::Sender<String>,
}

impl LifecycleBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Emit an event. Returns how many subscribers it was delivered to.
    pub fn emit(&self, event: impl Into<String>) -> usize {
        let event = event.into();
        let delivered = self.sender.send(event.clone()).unwrap_or(0);
        tracing::debug!(%event, delivered, "lifecycle event emitted");
        delivered
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Clone for LifecycleBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl std::fmt::Debug for LifecycleBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleBus")
            .field("subscriber_count", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_subscriber_sees_each_event() {
        let bus = LifecycleBus::new(8);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        assert_eq!(bus.emit("phase-start"), 2);
        assert_eq!(a.recv().await.unwrap(), "phase-start");
        assert_eq!(b.recv().await.unwrap(), "phase-start");
    }

    #[test]
    fn emit_without_subscribers_is_a_no_op() {
        let bus = LifecycleBus::new(8);
        assert_eq!(bus.emit("phase-start"), 0);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
