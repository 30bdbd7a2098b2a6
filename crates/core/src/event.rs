//! Engine event system — the extension point for UI and audio feedback.
//!
//! The presentation layer subscribes here to show which tools were offered,
//! play an earcon when a tool starts, or display a failure — without ever
//! touching engine state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All events published by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineEvent {
    /// A tool was made visible to the model on this turn
    ToolExposed {
        tool_name: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// The coordinator accepted a tool call request
    ToolRequested {
        call_id: String,
        tool_name: String,
        timestamp: DateTime<Utc>,
    },

    /// A tool execution completed successfully
    ToolSucceeded {
        call_id: String,
        tool_name: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A tool execution failed (validation, handler error, or timeout)
    ToolFailed {
        call_id: String,
        tool_name: String,
        reason: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// Always published after a tool call, success or failure
    ToolFinished {
        call_id: String,
        tool_name: String,
        success: bool,
        return_value: String,
        timestamp: DateTime<Utc>,
    },

    /// The model produced the turn's final text
    ResponseGenerated {
        session_id: String,
        model: String,
        output_text: String,
        timestamp: DateTime<Utc>,
    },

    /// A turn was dropped because the budget could not fit the input
    TurnDropped {
        session_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A recoverable error became a visible error turn
    ErrorOccurred {
        context: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub. Subscribers
/// receive all events and filter for what they care about; they can never
/// mutate engine state through this channel.
pub struct EventBus {
    sender: broadcast::Sender<Arc<EngineEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: EngineEvent) {
        // Ignore send errors (no subscribers = that's fine)
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<EngineEvent>> {
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

        bus.publish(EngineEvent::ToolFinished {
            call_id: "call_1".into(),
            tool_name: "weather".into(),
            success: true,
            return_value: "sunny".into(),
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            EngineEvent::ToolFinished {
                tool_name, success, ..
            } => {
                assert_eq!(tool_name, "weather");
                assert!(success);
            }
            _ => panic!("Expected ToolFinished event"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(EngineEvent::ErrorOccurred {
            context: "test".into(),
            error_message: "no subscribers".into(),
            timestamp: Utc::now(),
        });
    }
}
