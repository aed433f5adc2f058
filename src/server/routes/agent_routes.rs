//! Agent-related command routing
//!
//! Handles: chat, list_agents, get_agent_config, agent_task_counts

use crate::commands;
use crate::commands::ChatRequest;
use serde_json::Value;
use std::collections::HashMap;

use super::{get_arg, get_opt_arg, route_async, route_sync, route_value, ServerAppState, UserContext};

/// Route agent-related commands
pub async fn route_agent_command(
    cmd: &str,
    args: Value,
    user: &UserContext,
    state: &ServerAppState,
) -> Result<Value, String> {
    match cmd {
        "chat" => {
            let request = ChatRequest {
                agent_name: get_arg(&args, "agentName")?,
                message: get_arg(&args, "message")?,
                session_id: get_opt_arg(&args, "sessionId")?,
                context: get_opt_arg::<HashMap<String, Value>>(&args, "context")?
                    .unwrap_or_default(),
            };
            route_async!(commands::chat(
                &state.executor,
                &state.sessions,
                user.user_id(),
                request
            ))
        }

        "list_agents" => route_value!(commands::list_agents(&state.registry)),

        "get_agent_config" => {
            let agent_name: String = get_arg(&args, "agentName")?;
            route_sync!(commands::get_agent_config(&state.registry, &agent_name))
        }

        "agent_task_counts" => route_value!(commands::agent_task_counts(&state.registry)),

        _ => Err(format!("Unknown agent command: {}", cmd)),
    }
}

/// Check if a command is an agent command
pub fn is_agent_command(cmd: &str) -> bool {
    matches!(
        cmd,
        "chat" | "list_agents" | "get_agent_config" | "agent_task_counts"
    )
}
