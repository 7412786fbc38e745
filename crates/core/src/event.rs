//! Domain event system: decoupled notifications out of the pipeline.
//!
//! Events are published when a turn is accepted or rejected, when memory
//! tiers change, and when a response mentions another window. The CLI and
//! tests subscribe; nothing in the pipeline depends on a subscriber.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A narrator reply passed validation
    TurnAccepted {
        window_id: String,
        request_id: String,
        channel: String,
        timestamp: DateTime<Utc>,
    },

    /// A narrator reply was replaced by the placeholder
    TurnRejected {
        window_id: String,
        request_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A memory tier changed
    MemoryConsolidated {
        window_id: String,
        tier: String, // "stm", "ltm"
        length: usize,
        timestamp: DateTime<Utc>,
    },

    /// A response mentioned another known window
    CrossWindowLeak {
        window_id: String,
        request_id: String,
        leaked: Vec<String>,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(DomainEvent::MemoryConsolidated {
            window_id: "win-a".into(),
            tier: "ltm".into(),
            length: 42,
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::MemoryConsolidated { window_id, tier, .. } => {
                assert_eq!(window_id, "win-a");
                assert_eq!(tier, "ltm");
            }
            _ => panic!("Expected MemoryConsolidated event"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(DomainEvent::TurnRejected {
            window_id: "win-a".into(),
            request_id: "r1".into(),
            reason: "refusal".into(),
            timestamp: Utc::now(),
        });
    }
}
