//! Session, event record and conversation memory models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One logical user conversation. Many connections may serve it over time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: String,
    pub user_id: String,
    #[serde(default)]
    pub session_name: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    #[serde(default)]
    pub expired_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deleted: bool,
}

impl SessionInfo {
    pub fn new(session_id: &str, user_id: &str) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            session_name: None,
            is_active: true,
            created_at: now,
            last_active_at: now,
            expired_at: None,
            deleted: false,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expired_at.map_or(false, |at| at <= now)
    }

    /// Mark active and bump the activity timestamp
    pub fn touch(&mut self) {
        self.is_active = true;
        self.last_active_at = Utc::now();
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    User,
    Agent,
    Log,
    Error,
    Table,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::User => "user",
            MessageType::Agent => "agent",
            MessageType::Log => "log",
            MessageType::Error => "error",
            MessageType::Table => "table",
        }
    }
}

/// Append-only record of one delivered (or undeliverable) event.
/// Only `agent_id` (stamped post-hoc) and `deleted` ever change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: String,
    pub user_id: String,
    pub session_id: String,
    pub connection_id: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    pub message_type: MessageType,
    pub content: Value,
    pub sent_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted: bool,
}

impl MessageRecord {
    pub fn new(
        user_id: &str,
        session_id: &str,
        connection_id: &str,
        message_type: MessageType,
        content: Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            connection_id: connection_id.to_string(),
            agent_id: None,
            message_type,
            content,
            sent_at: Utc::now(),
            deleted: false,
        }
    }
}

/// Messages of one connection, i.e. one question and its answer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageGroup {
    pub connection_id: String,
    pub started_at: DateTime<Utc>,
    pub messages: Vec<MessageRecord>,
}

impl MessageGroup {
    /// Group records by connection id, keeping first-seen order of groups
    /// and arrival order within each group.
    pub fn group(records: Vec<MessageRecord>) -> Vec<MessageGroup> {
        let mut groups: Vec<MessageGroup> = Vec::new();
        for record in records {
            match groups
                .iter_mut()
                .find(|g| g.connection_id == record.connection_id)
            {
                Some(group) => group.messages.push(record),
                None => groups.push(MessageGroup {
                    connection_id: record.connection_id.clone(),
                    started_at: record.sent_at,
                    messages: vec![record],
                }),
            }
        }
        groups
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MemoryRole {
    User,
    Assistant,
}

impl MemoryRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryRole::User => "user",
            MemoryRole::Assistant => "assistant",
        }
    }
}

/// One turn in conversation memory, keyed by the conversation key string
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MemoryMessage {
    pub conversation_id: String,
    pub role: MemoryRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub agent_name: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl MemoryMessage {
    pub fn new(conversation_id: &str, role: MemoryRole, content: &str) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            role,
            content: content.to_string(),
            created_at: Utc::now(),
            agent_name: None,
            session_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(conn: &str, text: &str) -> MessageRecord {
        MessageRecord::new("u", "s", conn, MessageType::Agent, json!({ "answer": text }))
    }

    #[test]
    fn test_group_preserves_order() {
        let groups = MessageGroup::group(vec![
            record("c1", "a"),
            record("c2", "b"),
            record("c1", "c"),
        ]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].connection_id, "c1");
        assert_eq!(groups[0].messages.len(), 2);
        assert_eq!(groups[0].messages[1].content["answer"], "c");
        assert_eq!(groups[1].connection_id, "c2");
    }

    #[test]
    fn test_session_expiry() {
        let mut session = SessionInfo::new("s", "u");
        let now = Utc::now();
        assert!(!session.is_expired(now));
        session.expired_at = Some(now - chrono::Duration::seconds(1));
        assert!(session.is_expired(now));
    }

    #[test]
    fn test_message_type_serializes_lowercase() {
        let value = serde_json::to_value(MessageType::Agent).unwrap();
        assert_eq!(value, json!("agent"));
    }
}
