//! Server-sent events endpoint for streamed agent answers
//!
//! `GET /sse/agents/:name` opens a connection, starts the agent on a task and
//! relays the connection's events until the delivery closes it.

use super::proxy::InvokeError;
use super::user::UserContext;
use super::ServerAppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::convert::Infallible;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamQuery {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
    /// Overrides the header user; `EventSource` cannot send headers
    #[serde(default)]
    pub user_id: Option<String>,
    /// JSON object of request-scoped prompt variables
    #[serde(default)]
    pub context: Option<String>,
}

fn parse_context(raw: Option<&str>) -> Result<HashMap<String, Value>, String> {
    match raw {
        Some(raw) if !raw.trim().is_empty() => {
            serde_json::from_str(raw).map_err(|e| format!("Invalid context: {}", e))
        }
        _ => Ok(HashMap::new()),
    }
}

pub async fn stream_handler(
    State(state): State<ServerAppState>,
    Path(agent_name): Path<String>,
    user: UserContext,
    Query(query): Query<StreamQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, InvokeError> {
    let context = parse_context(query.context.as_deref())
        .map_err(|e| InvokeError::new(StatusCode::BAD_REQUEST, e))?;
    let user_id = query.user_id.as_deref().or(user.user_id());

    let mut request = state
        .sessions
        .prepare_request(&query.message, user_id, query.session_id.as_deref())
        .await
        .map_err(|e| InvokeError::new(StatusCode::BAD_REQUEST, e.to_string()))?;
    request.context = context;

    let connection_id = uuid::Uuid::new_v4().to_string();
    let handle = state.connections.open(&connection_id, &request.session_id);
    let request = request.with_connection(&connection_id);

    log::info!(
        "[Stream] [{}] connection {} opened for session {}",
        agent_name,
        connection_id,
        request.session_id
    );

    let executor = state.executor.clone();
    tokio::spawn(async move {
        match executor.execute_stream(&agent_name, &request).await {
            Ok(report) => log::debug!(
                "[Stream] [{}] connection {} finished: {:?}",
                agent_name,
                report.connection_id,
                report.status
            ),
            Err(e) => log::warn!("[Stream] [{}] request failed: {}", agent_name, e),
        }
    });

    let events = handle.map(|event| {
        Ok::<_, Infallible>(Event::default().event(event.event.as_str()).data(event.data()))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
