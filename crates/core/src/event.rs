//! Domain event system — decoupled observation of the conversation engine.
//!
//! The engine publishes an event whenever a turn is received, answered,
//! fails, or the session/model changes. Subscribers (logging sinks, tests)
//! react without the engine knowing about them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::session::ChatId;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A typed message or button press was accepted for a chat
    MessageReceived {
        chat_id: ChatId,
        transport: String,
        content_preview: String,
        timestamp: DateTime<Utc>,
    },

    /// The backend produced an answer that was written into the history
    AnswerGenerated {
        chat_id: ChatId,
        backend: String,
        prompt_tokens: usize,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// Generation failed (lock timeout or backend error)
    GenerationFailed {
        chat_id: ChatId,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A session was reset to its character's initial state
    SessionReset {
        chat_id: ChatId,
        timestamp: DateTime<Utc>,
    },

    /// The backend switched models
    ModelLoaded {
        model: String,
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
    async fn subscriber_sees_generation_failure() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(DomainEvent::GenerationFailed {
            chat_id: ChatId(7),
            reason: "lock timeout".into(),
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::GenerationFailed { chat_id, reason, .. } => {
                assert_eq!(*chat_id, ChatId(7));
                assert_eq!(reason, "lock timeout");
            }
            other => panic!("Expected GenerationFailed, got {other:?}"),
        }
    }

    #[test]
    fn publishing_without_subscribers_is_silent() {
        let bus = EventBus::new(4);
        bus.publish(DomainEvent::ModelLoaded {
            model: "llama".into(),
            timestamp: Utc::now(),
        });
    }
}
