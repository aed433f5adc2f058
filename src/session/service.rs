// Session bookkeeping and conversation history

use crate::error::HubResult;
use crate::models::{AgentRequest, MessageGroup, SessionInfo, DEFAULT_USER_ID};
use crate::storage::{MessageStore, SessionStore};
use crate::utils::truncate_chars;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Characters of the first message used as a session name
const SESSION_NAME_CHARS: usize = 20;
const DEFAULT_SESSION_NAME: &str = "New session";
pub const DEFAULT_EXPIRY_DAYS: i64 = 365;
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

pub struct SessionService {
    sessions: Arc<dyn SessionStore>,
    messages: Arc<dyn MessageStore>,
    expiry: ChronoDuration,
    default_user_warned: AtomicBool,
}

impl SessionService {
    pub fn new(sessions: Arc<dyn SessionStore>, messages: Arc<dyn MessageStore>) -> Self {
        Self {
            sessions,
            messages,
            expiry: ChronoDuration::days(DEFAULT_EXPIRY_DAYS),
            default_user_warned: AtomicBool::new(false),
        }
    }

    pub fn with_expiry_days(mut self, days: i64) -> Self {
        self.expiry = ChronoDuration::days(days);
        self
    }

    /// Caller's user id, or the default user when none was sent
    pub fn resolve_user(&self, user_id: Option<&str>) -> String {
        match user_id.map(str::trim).filter(|u| !u.is_empty()) {
            Some(user) => user.to_string(),
            None => {
                if !self.default_user_warned.swap(true, Ordering::SeqCst) {
                    log::warn!(
                        "[Sessions] Request without user id, using default user '{}'",
                        DEFAULT_USER_ID
                    );
                }
                DEFAULT_USER_ID.to_string()
            }
        }
    }

    fn session_name(message: &str) -> String {
        if message.trim().is_empty() {
            DEFAULT_SESSION_NAME.to_string()
        } else {
            truncate_chars(message, SESSION_NAME_CHARS)
        }
    }

    /// Fill in user and session for an incoming message and make sure the
    /// session exists and is marked active.
    pub async fn prepare_request(
        &self,
        message: &str,
        user_id: Option<&str>,
        session_id: Option<&str>,
    ) -> HubResult<AgentRequest> {
        let user = self.resolve_user(user_id);
        let session_id = match session_id.map(str::trim).filter(|s| !s.is_empty()) {
            Some(id) => id.to_string(),
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                log::info!("[Sessions] No session id sent, created {}", id);
                id
            }
        };

        self.touch(&session_id, &user, message).await?;
        Ok(AgentRequest::new(message, &user, &session_id))
    }

    /// Create the session or mark it active, extending its expiry
    pub async fn touch(&self, session_id: &str, user_id: &str, message: &str) -> HubResult<SessionInfo> {
        let session = match self.sessions.find_session(session_id).await? {
            Some(mut existing) => {
                existing.touch();
                existing.expired_at = Some(existing.last_active_at + self.expiry);
                existing
            }
            None => {
                let mut created = SessionInfo::new(session_id, user_id);
                created.session_name = Some(Self::session_name(message));
                created.expired_at = Some(created.last_active_at + self.expiry);
                log::info!("[Sessions] Created session {} for {}", session_id, user_id);
                created
            }
        };
        self.sessions.save_session(&session).await?;
        Ok(session)
    }

    pub async fn list_sessions(&self, user_id: &str) -> HubResult<Vec<SessionInfo>> {
        self.sessions.find_active_by_user(user_id).await
    }

    pub async fn get_session(&self, session_id: &str) -> HubResult<Option<SessionInfo>> {
        self.sessions.find_session(session_id).await
    }

    /// Create an empty session, optionally named
    pub async fn create_session(&self, user_id: &str, name: Option<&str>) -> HubResult<SessionInfo> {
        let mut session = SessionInfo::new(&uuid::Uuid::new_v4().to_string(), user_id);
        session.session_name = Some(Self::session_name(name.unwrap_or_default()));
        session.expired_at = Some(session.last_active_at + self.expiry);
        self.sessions.save_session(&session).await?;
        Ok(session)
    }

    /// The user's messages in a session, grouped per connection
    pub async fn session_messages(&self, user_id: &str, session_id: &str) -> HubResult<Vec<MessageGroup>> {
        let records = self
            .messages
            .find_by_user_and_session(user_id, session_id)
            .await?;
        Ok(MessageGroup::group(records))
    }

    /// Soft-delete a session and its messages
    pub async fn delete_session(&self, session_id: &str) -> HubResult<bool> {
        let deleted = self.sessions.soft_delete_session(session_id).await?;
        if deleted {
            let messages = self.messages.soft_delete_by_session(session_id).await?;
            log::info!(
                "[Sessions] Deleted session {} ({} message(s))",
                session_id,
                messages
            );
        }
        Ok(deleted)
    }

    /// Soft-delete expired sessions and their messages
    pub async fn purge_expired(&self) -> HubResult<Vec<String>> {
        let expired = self.sessions.delete_expired(Utc::now()).await?;
        for session_id in &expired {
            if let Err(e) = self.messages.soft_delete_by_session(session_id).await {
                log::warn!(
                    "[Sessions] Failed to delete messages of expired session {}: {}",
                    session_id,
                    e
                );
            }
        }
        if !expired.is_empty() {
            log::info!("[Sessions] Purged {} expired session(s)", expired.len());
        }
        Ok(expired)
    }

    /// Periodically purge expired sessions
    pub fn start_cleanup_task(service: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if let Err(e) = service.purge_expired().await {
                    log::warn!("[Sessions] Cleanup failed: {}", e);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MessageRecord, MessageType};
    use crate::storage::InMemoryStore;
    use serde_json::json;

    fn service() -> (Arc<InMemoryStore>, SessionService) {
        let store = Arc::new(InMemoryStore::new());
        (store.clone(), SessionService::new(store.clone(), store))
    }

    #[tokio::test]
    async fn test_prepare_fills_defaults() {
        let (_store, service) = service();
        let request = service
            .prepare_request("a fairly long first question here", None, None)
            .await
            .unwrap();
        assert_eq!(request.user_id, "test");
        assert!(!request.session_id.is_empty());

        let session = service.get_session(&request.session_id).await.unwrap().unwrap();
        assert_eq!(session.session_name.as_deref(), Some("a fairly long first ..."));
        assert!(session.expired_at.unwrap() > Utc::now() + ChronoDuration::days(364));
    }

    #[tokio::test]
    async fn test_prepare_touches_existing_session() {
        let (_store, service) = service();
        let created = service.create_session("u1", Some("mine")).await.unwrap();
        let request = service
            .prepare_request("next", Some("u1"), Some(&created.session_id))
            .await
            .unwrap();
        assert_eq!(request.session_id, created.session_id);

        let session = service.get_session(&created.session_id).await.unwrap().unwrap();
        assert_eq!(session.session_name.as_deref(), Some("mine"));
        assert!(session.last_active_at >= created.last_active_at);
    }

    #[tokio::test]
    async fn test_messages_grouped_and_deleted() {
        let (store, service) = service();
        service.touch("s1", "u1", "hi").await.unwrap();
        for (conn, kind) in [("c1", MessageType::User), ("c1", MessageType::Agent), ("c2", MessageType::User)] {
            store
                .save_message(&MessageRecord::new("u1", "s1", conn, kind, json!({})))
                .await
                .unwrap();
        }

        let groups = service.session_messages("u1", "s1").await.unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].messages.len(), 2);

        assert!(service.delete_session("s1").await.unwrap());
        assert!(service.session_messages("u1", "s1").await.unwrap().is_empty());
        assert!(service.list_sessions("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (store, service) = service();
        let mut old = SessionInfo::new("old", "u1");
        old.expired_at = Some(Utc::now() - ChronoDuration::days(1));
        store.save_session(&old).await.unwrap();
        service.touch("fresh", "u1", "hi").await.unwrap();

        assert_eq!(service.purge_expired().await.unwrap(), vec!["old"]);
        assert!(service.get_session("fresh").await.unwrap().is_some());
    }
}
