//! Event broadcast for queue and task activity.
//!
//! The queue emits an event on every noteworthy transition; anything with a
//! subscription (CLI progress rendering, tests) receives them through a
//! broadcast channel. Slow receivers lag instead of blocking the queue.

use serde::Serialize;
use tokio::sync::broadcast;

/// Capacity of the broadcast channel; laggards lose oldest events first.
const EVENT_CAPACITY: usize = 256;

/// A queue/task lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum QueueEvent {
    TaskAdded { name: String },
    TaskStatus { name: String, message: String },
    TaskEnded { name: String },
    QueueAdded { download_id: i64 },
    QueueStatus { download_id: i64 },
    QueueEnded { download_id: i64 },
}

/// Broadcast hub for [`QueueEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<QueueEvent>,
}

impl EventBus {
    /// Creates a new bus.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    /// Emits an event; silently dropped when nobody listens.
    pub fn emit(&self, event: QueueEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribes to all future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_reach_subscriber() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(QueueEvent::QueueAdded { download_id: 1 });
        bus.emit(QueueEvent::QueueEnded { download_id: 1 });

        assert_eq!(rx.recv().await.unwrap(), QueueEvent::QueueAdded { download_id: 1 });
        assert_eq!(rx.recv().await.unwrap(), QueueEvent::QueueEnded { download_id: 1 });
    }

    #[test]
    fn test_emit_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.emit(QueueEvent::TaskAdded {
            name: "scan".to_string(),
        });
    }
}
