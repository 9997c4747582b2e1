//! In-memory broadcast event bus.
//!
//! Pub/sub within a single process over a tokio broadcast channel. Hosts
//! with their own event transport implement
//! [`EventBus`](keeper_core::events::EventBus) against it instead.

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

use keeper_core::error::Result;
use keeper_core::events::{EventBus, TrackerEvent};

/// Channel capacity for broadcast.
const CHANNEL_CAPACITY: usize = 256;

/// Event bus backed by a tokio broadcast channel.
///
/// Publishing never blocks; a subscriber that lags behind the channel
/// capacity loses the oldest undelivered events.
pub struct BroadcastEventBus {
    sender: broadcast::Sender<TrackerEvent>,
}

impl BroadcastEventBus {
    /// Creates a new bus.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for BroadcastEventBus {
    async fn publish(&self, event: TrackerEvent) -> Result<()> {
        // send fails only when no receiver exists; events published into
        // the void are fine.
        if self.sender.send(event).is_err() {
            debug!("Event published with no subscribers");
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let bus = BroadcastEventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(TrackerEvent::ChatChanged {
            conversation_id: "chat-1".into(),
        })
        .await
        .unwrap();

        match rx.recv().await.unwrap() {
            TrackerEvent::ChatChanged { conversation_id } => {
                assert_eq!(conversation_id, "chat-1");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let bus = BroadcastEventBus::new();
        bus.publish(TrackerEvent::ChatChanged {
            conversation_id: "chat-1".into(),
        })
        .await
        .unwrap();
    }
}
