//! Process-local implementation of every store trait

use super::{tail, ConfigStore, MemoryStore, MessageStore, SessionStore};
use crate::error::HubResult;
use crate::models::{AgentConfig, MemoryMessage, MessageRecord, SessionInfo};
use crate::utils::{lock_mutex, read_lock, write_lock};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, RwLock};

#[derive(Default)]
pub struct InMemoryStore {
    configs: RwLock<BTreeMap<String, AgentConfig>>,
    messages: Mutex<Vec<MessageRecord>>,
    sessions: Mutex<HashMap<String, SessionInfo>>,
    memory: Mutex<Vec<MemoryMessage>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an agent config, keyed by name
    pub fn upsert_config(&self, config: AgentConfig) {
        write_lock(&self.configs).insert(config.agent_name.clone(), config);
    }

    pub fn remove_config(&self, name: &str) -> Option<AgentConfig> {
        write_lock(&self.configs).remove(name)
    }

    /// Every stored record including soft-deleted ones
    pub fn all_messages(&self) -> Vec<MessageRecord> {
        lock_mutex(&self.messages).clone()
    }

    fn select_messages<F>(&self, predicate: F) -> Vec<MessageRecord>
    where
        F: Fn(&MessageRecord) -> bool,
    {
        lock_mutex(&self.messages)
            .iter()
            .filter(|m| !m.deleted && predicate(m))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ConfigStore for InMemoryStore {
    async fn list_enabled(&self) -> HubResult<Vec<AgentConfig>> {
        Ok(read_lock(&self.configs)
            .values()
            .filter(|c| c.enabled)
            .cloned()
            .collect())
    }

    async fn find_by_name(&self, name: &str) -> HubResult<Option<AgentConfig>> {
        Ok(read_lock(&self.configs).get(name).cloned())
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn save_message(&self, record: &MessageRecord) -> HubResult<()> {
        lock_mutex(&self.messages).push(record.clone());
        Ok(())
    }

    async fn find_by_session(&self, session_id: &str) -> HubResult<Vec<MessageRecord>> {
        Ok(self.select_messages(|m| m.session_id == session_id))
    }

    async fn find_by_user_and_session(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> HubResult<Vec<MessageRecord>> {
        Ok(self.select_messages(|m| m.user_id == user_id && m.session_id == session_id))
    }

    async fn find_by_connection(&self, connection_id: &str) -> HubResult<Vec<MessageRecord>> {
        Ok(self.select_messages(|m| m.connection_id == connection_id))
    }

    async fn assign_agent(
        &self,
        session_id: &str,
        connection_id: &str,
        agent_id: &str,
    ) -> HubResult<usize> {
        let mut messages = lock_mutex(&self.messages);
        let mut stamped = 0;
        for record in messages.iter_mut().filter(|m| {
            m.agent_id.is_none() && m.session_id == session_id && m.connection_id == connection_id
        }) {
            record.agent_id = Some(agent_id.to_string());
            stamped += 1;
        }
        Ok(stamped)
    }

    async fn soft_delete_by_session(&self, session_id: &str) -> HubResult<usize> {
        let mut messages = lock_mutex(&self.messages);
        let mut deleted = 0;
        for record in messages
            .iter_mut()
            .filter(|m| !m.deleted && m.session_id == session_id)
        {
            record.deleted = true;
            deleted += 1;
        }
        Ok(deleted)
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn save_session(&self, session: &SessionInfo) -> HubResult<()> {
        lock_mutex(&self.sessions).insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn find_session(&self, session_id: &str) -> HubResult<Option<SessionInfo>> {
        Ok(lock_mutex(&self.sessions)
            .get(session_id)
            .filter(|s| !s.deleted)
            .cloned())
    }

    async fn find_active_by_user(&self, user_id: &str) -> HubResult<Vec<SessionInfo>> {
        let mut sessions: Vec<SessionInfo> = lock_mutex(&self.sessions)
            .values()
            .filter(|s| !s.deleted && s.is_active && s.user_id == user_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.last_active_at.cmp(&a.last_active_at));
        Ok(sessions)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> HubResult<Vec<String>> {
        let mut sessions = lock_mutex(&self.sessions);
        let mut removed = Vec::new();
        for session in sessions
            .values_mut()
            .filter(|s| !s.deleted && s.is_expired(now))
        {
            session.deleted = true;
            session.is_active = false;
            removed.push(session.session_id.clone());
        }
        removed.sort();
        Ok(removed)
    }

    async fn soft_delete_session(&self, session_id: &str) -> HubResult<bool> {
        let mut sessions = lock_mutex(&self.sessions);
        match sessions.get_mut(session_id).filter(|s| !s.deleted) {
            Some(session) => {
                session.deleted = true;
                session.is_active = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn append(&self, message: &MemoryMessage) -> HubResult<()> {
        lock_mutex(&self.memory).push(message.clone());
        Ok(())
    }

    async fn recent(
        &self,
        conversation_id: &str,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> HubResult<Vec<MemoryMessage>> {
        let matching: Vec<MemoryMessage> = lock_mutex(&self.memory)
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .filter(|m| since.map_or(true, |cutoff| m.created_at >= cutoff))
            .cloned()
            .collect();
        Ok(tail(matching, limit))
    }

    async fn assign_agent(
        &self,
        conversation_id: &str,
        agent_name: &str,
        session_id: &str,
    ) -> HubResult<usize> {
        let mut memory = lock_mutex(&self.memory);
        let mut stamped = 0;
        for entry in memory
            .iter_mut()
            .filter(|m| m.conversation_id == conversation_id && m.agent_name.is_none())
        {
            entry.agent_name = Some(agent_name.to_string());
            entry.session_id = Some(session_id.to_string());
            stamped += 1;
        }
        Ok(stamped)
    }
}
