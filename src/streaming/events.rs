//! Events pushed to streaming clients

use crate::models::MessageType;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Kind of a pushed event; doubles as the SSE event name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Connected,
    Message,
    Error,
    Complete,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Connected => "connected",
            EventKind::Message => "message",
            EventKind::Error => "error",
            EventKind::Complete => "complete",
        }
    }

    /// Record type used when this event is persisted. Connection bookkeeping
    /// and the completion marker are not persisted.
    pub fn message_type(&self) -> Option<MessageType> {
        match self {
            EventKind::Message => Some(MessageType::Agent),
            EventKind::Error => Some(MessageType::Error),
            EventKind::Connected | EventKind::Complete => None,
        }
    }
}

/// One event on a connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StreamEvent {
    pub event: EventKind,
    pub payload: Value,
}

impl StreamEvent {
    pub fn new(event: EventKind, payload: Value) -> Self {
        Self { event, payload }
    }

    pub fn connected(connection_id: &str, session_id: &str) -> Self {
        Self::new(
            EventKind::Connected,
            json!({ "connectionId": connection_id, "sessionId": session_id }),
        )
    }

    pub fn chunk(text: &str) -> Self {
        Self::new(EventKind::Message, json!({ "answer": text }))
    }

    pub fn error(message: &str) -> Self {
        Self::new(EventKind::Error, json!({ "error": message }))
    }

    pub fn complete(connection_id: &str) -> Self {
        Self::new(EventKind::Complete, json!({ "connectionId": connection_id }))
    }

    /// Payload as SSE `data:` text
    pub fn data(&self) -> String {
        self.payload.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_names() {
        assert_eq!(EventKind::Complete.as_str(), "complete");
        assert_eq!(serde_json::to_value(EventKind::Connected).unwrap(), "connected");
    }

    #[test]
    fn test_only_content_events_persist() {
        assert_eq!(EventKind::Message.message_type(), Some(MessageType::Agent));
        assert_eq!(EventKind::Error.message_type(), Some(MessageType::Error));
        assert!(EventKind::Complete.message_type().is_none());
        assert!(EventKind::Connected.message_type().is_none());
    }

    #[test]
    fn test_chunk_payload() {
        let event = StreamEvent::chunk("hi");
        assert_eq!(event.data(), r#"{"answer":"hi"}"#);
    }
}
