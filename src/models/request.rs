//! Explicit per-request context passed through every agent call

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// User id substituted when a request carries none
pub const DEFAULT_USER_ID: &str = "test";

/// One unit of work for an agent. User and session travel with the request
/// rather than through ambient state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRequest {
    pub message: String,
    pub user_id: String,
    pub session_id: String,
    #[serde(default)]
    pub connection_id: Option<String>,
    /// Values for dynamic and runtime prompt variables
    #[serde(default)]
    pub context: HashMap<String, Value>,
}

impl AgentRequest {
    pub fn new(message: &str, user_id: &str, session_id: &str) -> Self {
        Self {
            message: message.to_string(),
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            connection_id: None,
            context: HashMap::new(),
        }
    }

    pub fn with_connection(mut self, connection_id: &str) -> Self {
        self.connection_id = Some(connection_id.to_string());
        self
    }

    pub fn with_context(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }

    pub fn conversation_key(&self, agent_name: &str) -> ConversationKey {
        ConversationKey::new(&self.session_id, &self.user_id, agent_name)
    }
}

/// Memory partition for one user talking to one agent inside one session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationKey {
    pub session_id: String,
    pub user_id: String,
    pub agent_name: String,
}

impl ConversationKey {
    pub fn new(session_id: &str, user_id: &str, agent_name: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            agent_name: agent_name.to_string(),
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.session_id, self.user_id, self.agent_name)
    }
}
