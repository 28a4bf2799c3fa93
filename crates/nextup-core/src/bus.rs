//! In-process event bus.
//!
//! Thin wrapper over `tokio::sync::broadcast`: at-least-once within the
//! process, lagging subscribers drop the oldest events. Subscribers get
//! an explicit handle they can drop to tear down -- no weak-reference
//! registration.

use tokio::sync::broadcast;

use crate::events::Event;

const BUS_CAPACITY: usize = 256;

/// Publish/subscribe hub for domain events.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Publish to all current subscribers. Publishing with no
    /// subscribers is not an error.
    pub fn publish(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Owner, Task};

    #[tokio::test]
    async fn delivers_to_all_subscribers() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        bus.publish(Event::TaskUpserted { task: Task::new("t", Owner::Device("d".into())) });

        assert!(matches!(a.recv().await.unwrap(), Event::TaskUpserted { .. }));
        assert!(matches!(b.recv().await.unwrap(), Event::TaskUpserted { .. }));
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.publish(Event::TaskDeleted { task_id: "x".into(), at: chrono::Utc::now() });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn dropped_subscriber_tears_down() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        drop(rx);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
