//! JSON-file backed message, session and memory stores
//!
//! Layout under the data directory:
//! - `messages/{session_id}.json` event records of one session
//! - `sessions/index.json` every session
//! - `memory/{conversation_id}.json` conversation memory
//!
//! Every read-modify-write holds an in-process mutex plus an advisory
//! `fs2` lock on `.lock`, so two processes sharing a data dir do not
//! interleave writes.

use super::{
    atomic_write, ensure_dir, read_json, tail, FileResult, MemoryStore, MessageStore,
    SessionStore,
};
use crate::error::{HubError, HubResult};
use crate::models::{MemoryMessage, MessageRecord, SessionInfo};
use crate::utils::lock_mutex;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Version of the document format
const STORE_VERSION: u32 = 1;

/// Versioned list wrapper written to every document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreFile<T> {
    version: u32,
    updated_at: DateTime<Utc>,
    entries: Vec<T>,
}

impl<T> StoreFile<T> {
    fn new(entries: Vec<T>) -> Self {
        Self {
            version: STORE_VERSION,
            updated_at: Utc::now(),
            entries,
        }
    }
}

pub struct FileStore {
    root: PathBuf,
    write_guard: Mutex<()>,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `root`
    pub fn open(root: &Path) -> HubResult<Self> {
        for dir in ["messages", "sessions", "memory"] {
            ensure_dir(&root.join(dir)).map_err(HubError::Storage)?;
        }
        log::info!("[FileStore] Using data directory {:?}", root);
        Ok(Self {
            root: root.to_path_buf(),
            write_guard: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn messages_path(&self, session_id: &str) -> PathBuf {
        self.root
            .join("messages")
            .join(format!("{}.json", file_stem(session_id)))
    }

    fn sessions_path(&self) -> PathBuf {
        self.root.join("sessions").join("index.json")
    }

    fn memory_path(&self, conversation_id: &str) -> PathBuf {
        self.root
            .join("memory")
            .join(format!("{}.json", file_stem(conversation_id)))
    }

    /// Run `f` while holding both the process mutex and the file lock
    fn locked<T, F>(&self, f: F) -> HubResult<T>
    where
        F: FnOnce() -> FileResult<T>,
    {
        let _guard = lock_mutex(&self.write_guard);
        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(self.root.join(".lock"))
            .map_err(|e| HubError::Storage(format!("Failed to open lock file: {}", e)))?;
        lock_file
            .lock_exclusive()
            .map_err(|e| HubError::Storage(format!("Failed to lock data dir: {}", e)))?;

        let result = f().map_err(HubError::Storage);

        if let Err(e) = lock_file.unlock() {
            log::warn!("[FileStore] Failed to release data dir lock: {}", e);
        }
        result
    }

    /// Read-modify-write one document
    fn update<T, R, F>(&self, path: &Path, f: F) -> HubResult<R>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut Vec<T>) -> R,
    {
        self.locked(|| {
            let mut entries = load_entries::<T>(path)?;
            let result = f(&mut entries);
            store_entries(path, entries)?;
            Ok(result)
        })
    }

    fn read<T: DeserializeOwned>(&self, path: &Path) -> HubResult<Vec<T>> {
        load_entries(path).map_err(HubError::Storage)
    }
}

/// Make an id safe to use as a file name
fn file_stem(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn load_entries<T: DeserializeOwned>(path: &Path) -> FileResult<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file: StoreFile<T> = read_json(path)?;
    Ok(file.entries)
}

fn store_entries<T: Serialize>(path: &Path, entries: Vec<T>) -> FileResult<()> {
    let content = serde_json::to_string_pretty(&StoreFile::new(entries))
        .map_err(|e| format!("Failed to serialize {:?}: {}", path, e))?;
    atomic_write(path, &content)
}

#[async_trait]
impl MessageStore for FileStore {
    async fn save_message(&self, record: &MessageRecord) -> HubResult<()> {
        let path = self.messages_path(&record.session_id);
        self.update::<MessageRecord, _, _>(&path, |entries| entries.push(record.clone()))
    }

    async fn find_by_session(&self, session_id: &str) -> HubResult<Vec<MessageRecord>> {
        let entries: Vec<MessageRecord> = self.read(&self.messages_path(session_id))?;
        Ok(entries
            .into_iter()
            .filter(|m| !m.deleted && m.session_id == session_id)
            .collect())
    }

    async fn find_by_user_and_session(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> HubResult<Vec<MessageRecord>> {
        Ok(self
            .find_by_session(session_id)
            .await?
            .into_iter()
            .filter(|m| m.user_id == user_id)
            .collect())
    }

    async fn find_by_connection(&self, connection_id: &str) -> HubResult<Vec<MessageRecord>> {
        let dir = self.root.join("messages");
        let entries = fs::read_dir(&dir)
            .map_err(|e| HubError::Storage(format!("Failed to read {:?}: {}", dir, e)))?;

        let mut found = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            match load_entries::<MessageRecord>(&path) {
                Ok(records) => found.extend(
                    records
                        .into_iter()
                        .filter(|m| !m.deleted && m.connection_id == connection_id),
                ),
                Err(e) => log::warn!("[FileStore] Skipping unreadable {:?}: {}", path, e),
            }
        }
        found.sort_by(|a, b| a.sent_at.cmp(&b.sent_at));
        Ok(found)
    }

    async fn assign_agent(
        &self,
        session_id: &str,
        connection_id: &str,
        agent_id: &str,
    ) -> HubResult<usize> {
        let path = self.messages_path(session_id);
        if !path.exists() {
            return Ok(0);
        }
        self.update::<MessageRecord, _, _>(&path, |entries| {
            let mut stamped = 0;
            for record in entries
                .iter_mut()
                .filter(|m| m.agent_id.is_none() && m.connection_id == connection_id)
            {
                record.agent_id = Some(agent_id.to_string());
                stamped += 1;
            }
            stamped
        })
    }

    async fn soft_delete_by_session(&self, session_id: &str) -> HubResult<usize> {
        let path = self.messages_path(session_id);
        if !path.exists() {
            return Ok(0);
        }
        self.update::<MessageRecord, _, _>(&path, |entries| {
            let mut deleted = 0;
            for record in entries.iter_mut().filter(|m| !m.deleted) {
                record.deleted = true;
                deleted += 1;
            }
            deleted
        })
    }
}

#[async_trait]
impl SessionStore for FileStore {
    async fn save_session(&self, session: &SessionInfo) -> HubResult<()> {
        self.update::<SessionInfo, _, _>(&self.sessions_path(), |entries| {
            match entries
                .iter()
                .position(|s| s.session_id == session.session_id)
            {
                Some(idx) => entries[idx] = session.clone(),
                None => entries.push(session.clone()),
            }
        })
    }

    async fn find_session(&self, session_id: &str) -> HubResult<Option<SessionInfo>> {
        let sessions: Vec<SessionInfo> = self.read(&self.sessions_path())?;
        Ok(sessions
            .into_iter()
            .find(|s| s.session_id == session_id && !s.deleted))
    }

    async fn find_active_by_user(&self, user_id: &str) -> HubResult<Vec<SessionInfo>> {
        let mut sessions: Vec<SessionInfo> = self
            .read::<SessionInfo>(&self.sessions_path())?
            .into_iter()
            .filter(|s| !s.deleted && s.is_active && s.user_id == user_id)
            .collect();
        sessions.sort_by(|a, b| b.last_active_at.cmp(&a.last_active_at));
        Ok(sessions)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> HubResult<Vec<String>> {
        self.update::<SessionInfo, _, _>(&self.sessions_path(), |entries| {
            let mut removed = Vec::new();
            for session in entries
                .iter_mut()
                .filter(|s| !s.deleted && s.is_expired(now))
            {
                session.deleted = true;
                session.is_active = false;
                removed.push(session.session_id.clone());
            }
            removed
        })
    }

    async fn soft_delete_session(&self, session_id: &str) -> HubResult<bool> {
        self.update::<SessionInfo, _, _>(&self.sessions_path(), |entries| {
            match entries
                .iter_mut()
                .find(|s| s.session_id == session_id && !s.deleted)
            {
                Some(session) => {
                    session.deleted = true;
                    session.is_active = false;
                    true
                }
                None => false,
            }
        })
    }
}

#[async_trait]
impl MemoryStore for FileStore {
    async fn append(&self, message: &MemoryMessage) -> HubResult<()> {
        let path = self.memory_path(&message.conversation_id);
        self.update::<MemoryMessage, _, _>(&path, |entries| entries.push(message.clone()))
    }

    async fn recent(
        &self,
        conversation_id: &str,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> HubResult<Vec<MemoryMessage>> {
        let entries: Vec<MemoryMessage> = self.read(&self.memory_path(conversation_id))?;
        let matching = entries
            .into_iter()
            .filter(|m| m.conversation_id == conversation_id)
            .filter(|m| since.map_or(true, |cutoff| m.created_at >= cutoff))
            .collect();
        Ok(tail(matching, limit))
    }

    async fn assign_agent(
        &self,
        conversation_id: &str,
        agent_name: &str,
        session_id: &str,
    ) -> HubResult<usize> {
        let path = self.memory_path(conversation_id);
        if !path.exists() {
            return Ok(0);
        }
        self.update::<MemoryMessage, _, _>(&path, |entries| {
            let mut stamped = 0;
            for entry in entries.iter_mut().filter(|m| m.agent_name.is_none()) {
                entry.agent_name = Some(agent_name.to_string());
                entry.session_id = Some(session_id.to_string());
                stamped += 1;
            }
            stamped
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MemoryRole, MessageType};
    use serde_json::json;
    use tempfile::TempDir;

    fn setup() -> (TempDir, FileStore) {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::open(temp_dir.path()).unwrap();
        (temp_dir, store)
    }

    #[test]
    fn test_file_stem_sanitizes() {
        assert_eq!(file_stem("s1_u1_writer"), "s1_u1_writer");
        assert_eq!(file_stem("../etc/passwd"), ".._etc_passwd");
    }

    #[tokio::test]
    async fn test_messages_round_trip_in_order() {
        let (_dir, store) = setup();
        for text in ["one", "two", "three"] {
            let record =
                MessageRecord::new("u1", "s1", "c1", MessageType::Agent, json!({ "answer": text }));
            store.save_message(&record).await.unwrap();
        }

        let records = store.find_by_connection("c1").await.unwrap();
        let answers: Vec<_> = records.iter().map(|r| r.content["answer"].clone()).collect();
        assert_eq!(answers, vec![json!("one"), json!("two"), json!("three")]);

        assert_eq!(MessageStore::assign_agent(&store, "s1", "c2", "writer").await.unwrap(), 0);
        assert_eq!(MessageStore::assign_agent(&store, "s1", "c1", "writer").await.unwrap(), 3);
        assert_eq!(store.soft_delete_by_session("s1").await.unwrap(), 3);
        assert!(store.find_by_session("s1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sessions_persist_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = FileStore::open(temp_dir.path()).unwrap();
            let mut session = SessionInfo::new("s1", "u1");
            session.session_name = Some("first".into());
            store.save_session(&session).await.unwrap();
            session.session_name = Some("renamed".into());
            store.save_session(&session).await.unwrap();
        }

        let store = FileStore::open(temp_dir.path()).unwrap();
        let found = store.find_session("s1").await.unwrap().unwrap();
        assert_eq!(found.session_name.as_deref(), Some("renamed"));
        assert_eq!(store.find_active_by_user("u1").await.unwrap().len(), 1);
        assert!(store.soft_delete_session("s1").await.unwrap());
        assert!(store.find_session("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_recent_respects_cutoff() {
        let (_dir, store) = setup();
        let mut old = MemoryMessage::new("conv", MemoryRole::User, "old");
        old.created_at = Utc::now() - chrono::Duration::hours(2);
        store.append(&old).await.unwrap();
        store
            .append(&MemoryMessage::new("conv", MemoryRole::Assistant, "new"))
            .await
            .unwrap();

        let cutoff = Utc::now() - chrono::Duration::hours(1);
        let recent = store.recent("conv", 10, Some(cutoff)).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].content, "new");
    }
}
