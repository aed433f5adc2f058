//! Persistence collaborators
//!
//! The core only talks to the traits below. Two backends are provided:
//! - `memory`: process-local maps, used for tests and `--memory` runs
//! - `files`: JSON documents under a data directory, plus YAML agent definitions

pub mod files;
pub mod memory;
pub mod yaml_config;

pub use files::FileStore;
pub use memory::InMemoryStore;
pub use yaml_config::YamlConfigStore;

use crate::error::HubResult;
use crate::models::{AgentConfig, MemoryMessage, MessageRecord, SessionInfo};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fs;
use std::path::Path;

/// Result type used by the file helpers
pub type FileResult<T> = Result<T, String>;

/// Source of agent configuration snapshots
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn list_enabled(&self) -> HubResult<Vec<AgentConfig>>;

    /// Latest snapshot for `name`, enabled or not
    async fn find_by_name(&self, name: &str) -> HubResult<Option<AgentConfig>>;
}

/// Durable event records. Reads skip soft-deleted rows and return arrival order.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn save_message(&self, record: &MessageRecord) -> HubResult<()>;

    async fn find_by_session(&self, session_id: &str) -> HubResult<Vec<MessageRecord>>;

    async fn find_by_user_and_session(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> HubResult<Vec<MessageRecord>>;

    async fn find_by_connection(&self, connection_id: &str) -> HubResult<Vec<MessageRecord>>;

    /// Stamp `agent_id` on the records of one connection in the session that
    /// have none. Returns how many were stamped.
    async fn assign_agent(
        &self,
        session_id: &str,
        connection_id: &str,
        agent_id: &str,
    ) -> HubResult<usize>;

    async fn soft_delete_by_session(&self, session_id: &str) -> HubResult<usize>;
}

/// Session bookkeeping. Reads skip soft-deleted sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert or replace by session id
    async fn save_session(&self, session: &SessionInfo) -> HubResult<()>;

    async fn find_session(&self, session_id: &str) -> HubResult<Option<SessionInfo>>;

    /// Active sessions of a user, most recently active first
    async fn find_active_by_user(&self, user_id: &str) -> HubResult<Vec<SessionInfo>>;

    /// Soft-delete sessions expired at `now`, returning their ids
    async fn delete_expired(&self, now: DateTime<Utc>) -> HubResult<Vec<String>>;

    async fn soft_delete_session(&self, session_id: &str) -> HubResult<bool>;
}

/// Conversation memory keyed by the conversation key string
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn append(&self, message: &MemoryMessage) -> HubResult<()>;

    /// Last `limit` entries (oldest first) created at or after `since`
    async fn recent(
        &self,
        conversation_id: &str,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> HubResult<Vec<MemoryMessage>>;

    /// Stamp agent name and session on entries that have no agent yet
    async fn assign_agent(
        &self,
        conversation_id: &str,
        agent_name: &str,
        session_id: &str,
    ) -> HubResult<usize>;
}

/// Keep the last `limit` items of an oldest-first list
pub(crate) fn tail<T>(mut items: Vec<T>, limit: usize) -> Vec<T> {
    if items.len() > limit {
        items.drain(..items.len() - limit);
    }
    items
}

// =============================================================================
// File helpers
// =============================================================================

/// Create a directory (and parents) if it does not exist
pub fn ensure_dir(path: &Path) -> FileResult<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .map_err(|e| format!("Failed to create directory {:?}: {}", path, e))?;
    }
    Ok(())
}

/// Write `content` to a sibling temp file and rename it over `path`
pub fn atomic_write(path: &Path, content: &str) -> FileResult<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let tmp_path = path.with_extension(format!(
        "tmp-{}",
        uuid::Uuid::new_v4().simple()
    ));
    fs::write(&tmp_path, content)
        .map_err(|e| format!("Failed to write temp file {:?}: {}", tmp_path, e))?;
    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        format!("Failed to move {:?} into place: {}", path, e)
    })
}

/// Read and deserialize a JSON file
pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> FileResult<T> {
    let content =
        fs::read_to_string(path).map_err(|e| format!("Failed to read {:?}: {}", path, e))?;
    serde_json::from_str(&content).map_err(|e| format!("Failed to parse {:?}: {}", path, e))
}

/// Serialize `value` as pretty JSON and write it atomically
pub fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> FileResult<()> {
    let content = serde_json::to_string_pretty(value)
        .map_err(|e| format!("Failed to serialize {:?}: {}", path, e))?;
    atomic_write(path, &content)
}
