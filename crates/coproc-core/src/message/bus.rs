//! Broadcast bus for distributing `KernelMessage`s to host subscribers.
//!
//! Built on `tokio::sync::broadcast`. Publishing with no active subscribers
//! is a no-op.

use coproc_types::message::KernelMessage;
use tokio::sync::broadcast;

/// Multi-consumer message bus.
///
/// Cloning the bus clones the sender, allowing multiple producers and consumers.
pub struct MessageBus {
    sender: broadcast::Sender<KernelMessage>,
}

impl MessageBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Create a new subscriber that will receive all future messages.
    pub fn subscribe(&self) -> broadcast::Receiver<KernelMessage> {
        self.sender.subscribe()
    }

    /// Publish a message to all current subscribers.
    pub fn publish(&self, message: KernelMessage) {
        let _ = self.sender.send(message);
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Clone for MessageBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::envelope::{MessageDraft, create_message};
    use coproc_types::message::MessageType;
    use serde_json::json;

    fn heartbeat() -> KernelMessage {
        create_message(MessageDraft::new(
            MessageType::Heartbeat,
            "kernel",
            "host",
            json!({}),
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn multiple_subscribers_each_receive_message() {
        let bus = MessageBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(heartbeat());

        assert_eq!(rx1.recv().await.unwrap().message_type, MessageType::Heartbeat);
        assert_eq!(rx2.recv().await.unwrap().message_type, MessageType::Heartbeat);
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = MessageBus::new(16);
        bus.publish(heartbeat());
        assert_eq!(bus.receiver_count(), 0);
    }

    #[test]
    fn clone_shares_channel() {
        let bus = MessageBus::new(16);
        let bus2 = bus.clone();
        let mut rx = bus.subscribe();
        bus2.publish(heartbeat());
        assert!(rx.try_recv().is_ok());
    }
}
