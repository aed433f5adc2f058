// Session-related commands

use crate::models::{MessageGroup, SessionInfo};
use crate::session::SessionService;

/// Active sessions of the caller, most recent first
pub async fn list_sessions(sessions: &SessionService, user_id: Option<&str>) -> Result<Vec<SessionInfo>, String> {
    let user = sessions.resolve_user(user_id);
    sessions.list_sessions(&user).await.map_err(|e| e.to_string())
}

pub async fn get_session(sessions: &SessionService, session_id: &str) -> Result<SessionInfo, String> {
    sessions
        .get_session(session_id)
        .await
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("Session not found: {}", session_id))
}

pub async fn create_session(
    sessions: &SessionService,
    user_id: Option<&str>,
    name: Option<&str>,
) -> Result<SessionInfo, String> {
    let user = sessions.resolve_user(user_id);
    sessions
        .create_session(&user, name)
        .await
        .map_err(|e| e.to_string())
}

/// History of a session, one group per connection
pub async fn get_session_messages(
    sessions: &SessionService,
    user_id: Option<&str>,
    session_id: &str,
) -> Result<Vec<MessageGroup>, String> {
    let user = sessions.resolve_user(user_id);
    sessions
        .session_messages(&user, session_id)
        .await
        .map_err(|e| e.to_string())
}

pub async fn delete_session(sessions: &SessionService, session_id: &str) -> Result<(), String> {
    if sessions
        .delete_session(session_id)
        .await
        .map_err(|e| e.to_string())?
    {
        Ok(())
    } else {
        Err(format!("Session not found: {}", session_id))
    }
}

/// Purge expired sessions now, returning their ids
pub async fn cleanup_expired_sessions(sessions: &SessionService) -> Result<Vec<String>, String> {
    sessions.purge_expired().await.map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_session_commands() {
        let store = Arc::new(InMemoryStore::new());
        let sessions = SessionService::new(store.clone(), store);

        let created = create_session(&sessions, Some("u1"), Some("notes")).await.unwrap();
        assert_eq!(list_sessions(&sessions, Some("u1")).await.unwrap().len(), 1);
        assert_eq!(
            get_session(&sessions, &created.session_id).await.unwrap().session_name.as_deref(),
            Some("notes")
        );
        assert!(get_session_messages(&sessions, Some("u1"), &created.session_id)
            .await
            .unwrap()
            .is_empty());

        delete_session(&sessions, &created.session_id).await.unwrap();
        assert!(delete_session(&sessions, &created.session_id).await.is_err());
        assert!(get_session(&sessions, &created.session_id).await.is_err());
        assert!(cleanup_expired_sessions(&sessions).await.unwrap().is_empty());
    }
}
