//! Administrative command routing
//!
//! Handles: reload_agent, reload_all_agents, unregister_agent, check_config_changes

use crate::commands;
use serde_json::Value;

use super::{get_arg, route_async, route_value, ServerAppState};

/// Route administrative commands
pub async fn route_admin_command(
    cmd: &str,
    args: Value,
    state: &ServerAppState,
) -> Result<Value, String> {
    match cmd {
        "reload_agent" => {
            let agent_name: String = get_arg(&args, "agentName")?;
            route_async!(commands::reload_agent(&state.registry, &agent_name))
        }

        "reload_all_agents" => {
            route_value!(commands::reload_all_agents(&state.registry).await)
        }

        "unregister_agent" => {
            let agent_name: String = get_arg(&args, "agentName")?;
            route_value!(commands::unregister_agent(&state.registry, &agent_name).await)
        }

        "check_config_changes" => {
            route_async!(commands::check_config_changes(&state.poller))
        }

        _ => Err(format!("Unknown admin command: {}", cmd)),
    }
}

/// Check if a command is an admin command
pub fn is_admin_command(cmd: &str) -> bool {
    matches!(
        cmd,
        "reload_agent" | "reload_all_agents" | "unregister_agent" | "check_config_changes"
    )
}
