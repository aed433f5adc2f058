//! Session-related command routing
//!
//! Handles: list_sessions, get_session, create_session, get_session_messages,
//! delete_session, cleanup_expired_sessions

use crate::commands;
use serde_json::Value;

use super::{get_arg, get_opt_arg, route_async, route_unit_async, ServerAppState, UserContext};

/// Route session-related commands
pub async fn route_session_command(
    cmd: &str,
    args: Value,
    user: &UserContext,
    state: &ServerAppState,
) -> Result<Value, String> {
    let sessions = &state.sessions;
    match cmd {
        "list_sessions" => {
            route_async!(commands::list_sessions(sessions, user.user_id()))
        }

        "get_session" => {
            let session_id: String = get_arg(&args, "sessionId")?;
            route_async!(commands::get_session(sessions, &session_id))
        }

        "create_session" => {
            let name: Option<String> = get_opt_arg(&args, "name")?;
            route_async!(commands::create_session(
                sessions,
                user.user_id(),
                name.as_deref()
            ))
        }

        "get_session_messages" => {
            let session_id: String = get_arg(&args, "sessionId")?;
            route_async!(commands::get_session_messages(
                sessions,
                user.user_id(),
                &session_id
            ))
        }

        "delete_session" => {
            let session_id: String = get_arg(&args, "sessionId")?;
            route_unit_async!(commands::delete_session(sessions, &session_id))
        }

        "cleanup_expired_sessions" => {
            route_async!(commands::cleanup_expired_sessions(sessions))
        }

        _ => Err(format!("Unknown session command: {}", cmd)),
    }
}

/// Check if a command is a session command
pub fn is_session_command(cmd: &str) -> bool {
    matches!(
        cmd,
        "list_sessions"
            | "get_session"
            | "create_session"
            | "get_session_messages"
            | "delete_session"
            | "cleanup_expired_sessions"
    )
}
