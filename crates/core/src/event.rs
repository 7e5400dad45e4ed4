//! Session event system — the read-only projection of orchestrator state.
//!
//! The orchestrator publishes an [`AgentEvent`] whenever something a
//! presentation layer cares about changes. Subscribers only ever receive
//! copies; there is no path back into session state.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::agent::{Mode, Phase};
use crate::message::Role;

/// Severity of a user-visible notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Warning,
    /// The loop stopped because of an unrecoverable failure.
    Fatal,
}

/// Status of a single tool call as it moves through the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Pending,
    Succeeded,
    Failed,
}

/// All events a session emits, in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    PhaseChanged { phase: Phase },

    ModeChanged { mode: Mode },

    /// A new assistant turn started streaming.
    AssistantStarted { message_id: String },

    /// Streamed text for the pending assistant message.
    TextDelta { message_id: String, text: String },

    /// The pending assistant message was finalized.
    AssistantFinished { message_id: String, content: String },

    /// A message was committed to the conversation.
    MessageAppended { message_id: String, role: Role },

    ToolCallUpdated {
        message_id: String,
        call_id: String,
        name: String,
        status: ToolCallStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },

    /// Something the user should see (retry notices, fatal errors, ...).
    Notice { level: NoticeLevel, text: String },

    /// The model signalled completion through `task_complete`.
    TaskCompleted { summary: String },
}

/// A broadcast-based event bus for session events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
/// A slow subscriber lags rather than blocking the orchestrator.
pub struct EventBus {
    sender: broadcast::Sender<Arc<AgentEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: AgentEvent) {
        // No subscribers is fine.
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<AgentEvent>> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
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

        bus.publish(AgentEvent::ToolCallUpdated {
            message_id: "m1".into(),
            call_id: "c1".into(),
            name: "write_file".into(),
            status: ToolCallStatus::Succeeded,
            summary: None,
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            AgentEvent::ToolCallUpdated { name, status, .. } => {
                assert_eq!(name, "write_file");
                assert_eq!(*status, ToolCallStatus::Succeeded);
            }
            _ => panic!("Expected ToolCallUpdated event"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(AgentEvent::Notice {
            level: NoticeLevel::Info,
            text: "no subscribers".into(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(AgentEvent::PhaseChanged {
            phase: Phase::Building,
        })
        .unwrap();
        assert_eq!(json["type"], "phase_changed");
        assert_eq!(json["phase"], "building");
    }
}
