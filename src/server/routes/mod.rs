//! Command routing modules
//!
//! Command routing is split into focused sub-modules by domain:
//! - agent_routes: chat, agent listing and inspection
//! - admin_routes: hot reload, unregister and config change polling
//! - session_routes: session management and message history

pub mod admin_routes;
pub mod agent_routes;
pub mod session_routes;

use serde_json::Value;

use super::user::UserContext;
use super::ServerAppState;

// =============================================================================
// Helper functions for use by route modules
// =============================================================================

/// Extract a required argument from JSON args
pub fn get_arg<T: serde::de::DeserializeOwned>(args: &Value, name: &str) -> Result<T, String> {
    serde_json::from_value(
        args.get(name)
            .ok_or_else(|| format!("Missing argument: {}", name))?
            .clone(),
    )
    .map_err(|e| format!("Invalid argument {}: {}", name, e))
}

/// Extract an optional argument from JSON args
pub fn get_opt_arg<T: serde::de::DeserializeOwned>(
    args: &Value,
    name: &str,
) -> Result<Option<T>, String> {
    match args.get(name) {
        Some(v) if !v.is_null() => serde_json::from_value(v.clone())
            .map(Some)
            .map_err(|e| format!("Invalid argument {}: {}", name, e)),
        _ => Ok(None),
    }
}

// =============================================================================
// Command Routing Macros
// =============================================================================

/// Routes an async command: awaits the handler, serializes the result
#[macro_export]
macro_rules! route_async {
    ($handler:expr) => {{
        let result = $handler.await?;
        serde_json::to_value(result).map_err(|e| e.to_string())
    }};
}

/// Routes a sync command
#[macro_export]
macro_rules! route_sync {
    ($handler:expr) => {{
        let result = $handler?;
        serde_json::to_value(result).map_err(|e| e.to_string())
    }};
}

/// Routes an infallible command by serializing its value
#[macro_export]
macro_rules! route_value {
    ($value:expr) => {{
        serde_json::to_value($value).map_err(|e| e.to_string())
    }};
}

/// Routes an async command that returns ()
#[macro_export]
macro_rules! route_unit_async {
    ($handler:expr) => {{
        $handler.await?;
        Ok(serde_json::Value::Null)
    }};
}

pub use route_async;
pub use route_sync;
pub use route_unit_async;
pub use route_value;

// =============================================================================
// Main Command Dispatcher
// =============================================================================

/// Route a command to its implementation by dispatching to the appropriate sub-router
pub async fn route_command(
    cmd: &str,
    args: Value,
    user: &UserContext,
    state: &ServerAppState,
) -> Result<Value, String> {
    if agent_routes::is_agent_command(cmd) {
        return agent_routes::route_agent_command(cmd, args, user, state).await;
    }

    if admin_routes::is_admin_command(cmd) {
        return admin_routes::route_admin_command(cmd, args, state).await;
    }

    if session_routes::is_session_command(cmd) {
        return session_routes::route_session_command(cmd, args, user, state).await;
    }

    Err(format!("Unknown command: {}", cmd))
}
