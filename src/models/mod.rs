// Data models for agent configuration, requests, sessions and message history

pub mod agent;
pub mod request;
pub mod session;

pub use agent::{AgentConfig, AgentKind, MemoryPolicy, MemoryType};
pub use request::{AgentRequest, ConversationKey, DEFAULT_USER_ID};
pub use session::{
    MemoryMessage, MemoryRole, MessageGroup, MessageRecord, MessageType, SessionInfo,
};
