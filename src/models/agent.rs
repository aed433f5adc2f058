//! Agent configuration snapshot and memory policy descriptor

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

fn default_agent_type() -> String {
    AgentKind::Chat.as_str().to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_messages() -> usize {
    20
}

/// Immutable configuration snapshot for one agent.
///
/// Read fresh from the config store on every reload and never mutated in place;
/// a changed agent gets a new snapshot and a new instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    pub agent_name: String,
    /// `chat` or `stream`, validated when the instance is built
    #[serde(default = "default_agent_type")]
    pub agent_type: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Tera template for the system prompt
    #[serde(default)]
    pub system_prompt: String,
    /// Static prompt variables
    #[serde(default)]
    pub prompt_variables: BTreeMap<String, Value>,
    /// Keys expected in the request context on every call
    #[serde(default)]
    pub dynamic_prompt_variable_keys: Vec<String>,
    /// Keys filled in by the caller at runtime
    #[serde(default)]
    pub runtime_prompt_variable_keys: Vec<String>,
    /// Ordered tool names
    #[serde(default)]
    pub tool_names: Vec<String>,
    #[serde(default)]
    pub memory: Option<MemoryPolicy>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Last modification time as recorded by the store
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl AgentConfig {
    pub fn new(agent_name: &str, system_prompt: &str) -> Self {
        Self {
            agent_name: agent_name.to_string(),
            agent_type: default_agent_type(),
            description: None,
            system_prompt: system_prompt.to_string(),
            prompt_variables: BTreeMap::new(),
            dynamic_prompt_variable_keys: Vec::new(),
            runtime_prompt_variable_keys: Vec::new(),
            tool_names: Vec::new(),
            memory: None,
            enabled: true,
            updated_at: Some(Utc::now()),
        }
    }

    pub fn with_variable(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.prompt_variables.insert(key.to_string(), value.into());
        self
    }

    pub fn with_tools(mut self, tools: &[&str]) -> Self {
        self.tool_names = tools.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_memory(mut self, policy: MemoryPolicy) -> Self {
        self.memory = Some(policy);
        self
    }

    pub fn with_agent_type(mut self, agent_type: &str) -> Self {
        self.agent_type = agent_type.to_string();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn has_tools(&self) -> bool {
        !self.tool_names.is_empty()
    }

    /// Keys that must arrive with each request (dynamic then runtime)
    pub fn required_request_keys(&self) -> impl Iterator<Item = (&'static str, &String)> {
        self.dynamic_prompt_variable_keys
            .iter()
            .map(|k| ("dynamic", k))
            .chain(
                self.runtime_prompt_variable_keys
                    .iter()
                    .map(|k| ("runtime", k)),
            )
    }
}

/// How an agent is meant to be driven
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Chat,
    Stream,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Chat => "chat",
            AgentKind::Stream => "stream",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "chat" => Some(AgentKind::Chat),
            "stream" => Some(AgentKind::Stream),
            _ => None,
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum MemoryType {
    #[default]
    #[serde(rename = "messageWindow")]
    MessageWindow,
}

/// Descriptor for conversation memory. Storage is only touched on first use.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MemoryPolicy {
    #[serde(default)]
    pub memory_type: MemoryType,
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
    /// Entries older than this are ignored; absent means never expire
    #[serde(default)]
    pub message_expire_secs: Option<u64>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl MemoryPolicy {
    pub fn message_window(max_messages: usize) -> Self {
        Self {
            memory_type: MemoryType::MessageWindow,
            max_messages,
            message_expire_secs: None,
            enabled: true,
        }
    }

    pub fn with_expiry_secs(mut self, secs: u64) -> Self {
        self.message_expire_secs = Some(secs);
        self
    }

    pub fn is_active(&self) -> bool {
        self.enabled && self.max_messages > 0
    }

    /// Oldest timestamp still inside the window, if the policy expires entries
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let secs = i64::try_from(self.message_expire_secs?).ok()?;
        chrono::Duration::try_seconds(secs).and_then(|d| now.checked_sub_signed(d))
    }
}

impl Default for MemoryPolicy {
    fn default() -> Self {
        Self::message_window(default_max_messages())
    }
}
