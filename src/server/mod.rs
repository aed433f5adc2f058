//! HTTP server for the agent hub
//!
//! Exposes the command proxy, the SSE stream endpoint and the health and
//! version routes behind Bearer-token auth and CORS.

mod auth;
mod proxy;
pub mod routes;
pub mod state;
mod stream;
mod user;

pub use auth::{generate_auth_token, AuthLayer};
pub use proxy::{invoke_handler, InvokeRequest, InvokeResponse};
pub use state::ServerAppState;
pub use user::{UserContext, USER_HEADER};

use axum::{
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue,
    },
    routing::{get, post},
    Json, Router,
};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

/// Version information for the server
#[derive(serde::Serialize)]
struct VersionInfo {
    name: String,
    version: String,
}

fn cors_layer(cors_origins: &[String]) -> CorsLayer {
    // Explicit headers instead of Any: browsers reject a wildcard together
    // with the Authorization header
    let headers = [
        AUTHORIZATION,
        CONTENT_TYPE,
        ACCEPT,
        HeaderName::from_static(USER_HEADER),
    ];
    if cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(headers)
    } else {
        let allowed_origins: Vec<HeaderValue> =
            cors_origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new()
            .allow_origin(allowed_origins)
            .allow_methods(Any)
            .allow_headers(headers)
    }
}

/// Build the router. Layer order: cors (outer) -> auth -> handler, so CORS
/// preflight requests are answered before the auth check.
pub fn build_router(state: ServerAppState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/api/invoke", post(proxy::invoke_handler))
        .route("/sse/agents/:name", get(stream::stream_handler))
        .route("/health", get(health_handler))
        .route("/api/version", get(version_handler))
        .layer(AuthLayer::new(state.auth_token.clone()))
        .layer(cors_layer(cors_origins))
        .with_state(state)
}

/// Serve until the shutdown flag is raised
pub async fn run_server(
    port: u16,
    bind: &str,
    state: ServerAppState,
    cors_origins: &[String],
) -> Result<(), String> {
    let app = build_router(state.clone(), cors_origins);

    let addr: SocketAddr = format!("{}:{}", bind, port)
        .parse()
        .map_err(|e| format!("Invalid address: {}", e))?;

    let cors_display = if cors_origins.is_empty() {
        "*".to_string()
    } else {
        cors_origins.join(", ")
    };

    println!("\n╔══════════════════════════════════════════════════════════════╗");
    println!("║                        Agent Hub                             ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║                                                              ║");
    println!("║  Server URL: http://{}:{:<24} ║", bind, port);
    println!("║  Auth Token: {}                ║", state.auth_token);
    println!("║  CORS Origins: {:<45} ║", cors_display);
    println!("║  Agents: {:<51} ║", state.registry.len());
    println!("║                                                              ║");
    println!("║  Endpoints:                                                  ║");
    println!("║    POST /api/invoke        - Command proxy                   ║");
    println!("║    GET  /sse/agents/:name  - Streamed agent answer           ║");
    println!("║    GET  /api/version       - Server version info             ║");
    println!("║    GET  /health            - Health check                    ║");
    println!("║                                                              ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| format!("Failed to bind to {}: {}", addr, e))?;

    log::info!("Server listening on http://{}", addr);

    let shutdown_state = state.shutdown_state.clone();
    let shutdown_signal = async move {
        shutdown_state.wait_for_shutdown().await;
        log::info!("Shutdown signal received, stopping server...");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .map_err(|e| format!("Server error: {}", e))
}

/// Health check endpoint
async fn health_handler() -> &'static str {
    "OK"
}

async fn version_handler() -> Json<VersionInfo> {
    Json(VersionInfo {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HubConfig, ModelProvider};
    use crate::models::AgentConfig;
    use crate::shutdown::ShutdownState;
    use crate::startup::{start_with_stores, Services, Stores};
    use crate::storage::InMemoryStore;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    const TOKEN: &str = "secret";

    async fn services() -> Services {
        let store = Arc::new(InMemoryStore::new());
        store.upsert_config(AgentConfig::new("echoer", "Be brief"));
        let mut config = HubConfig::default();
        config.poller.enabled = false;
        config.model.provider = ModelProvider::Echo;
        start_with_stores(config, Stores::in_memory(store), None)
            .await
            .unwrap()
    }

    fn router(services: &Services) -> Router {
        let state = ServerAppState::new(TOKEN.to_string(), ShutdownState::new(), services);
        build_router(state, &[])
    }

    fn invoke(body: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/invoke")
            .header(CONTENT_TYPE, "application/json")
            .header(USER_HEADER, r#"{"userId":"u1"}"#);
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let services = services().await;
        let response = router(&services)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_invoke_requires_token() {
        let services = services().await;
        let response = router(&services)
            .oneshot(invoke(r#"{"cmd":"list_agents"}"#, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_invoke_chat_and_list_sessions() {
        let services = services().await;
        let app = router(&services);

        let response = app
            .clone()
            .oneshot(invoke(
                r#"{"cmd":"chat","args":{"agentName":"echoer","message":"ping"}}"#,
                Some(TOKEN),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["answer"], "echo: ping");

        let response = app
            .oneshot(invoke(r#"{"cmd":"list_sessions"}"#, Some(TOKEN)))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["data"].as_array().map(|a| a.len()), Some(1));
    }

    #[tokio::test]
    async fn test_invoke_unknown_command() {
        let services = services().await;
        let response = router(&services)
            .oneshot(invoke(r#"{"cmd":"launch_rocket"}"#, Some(TOKEN)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_sse_streams_events_with_query_token() {
        let services = services().await;
        let response = router(&services)
            .oneshot(
                Request::builder()
                    .uri("/sse/agents/echoer?message=hello%20world&token=secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // The stream ends once the delivery closes the connection
        let bytes = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            to_bytes(response.into_body(), usize::MAX),
        )
        .await
        .unwrap()
        .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        let connected = text.find("event: connected").unwrap();
        let message = text.find("event: message").unwrap();
        let complete = text.find("event: complete").unwrap();
        assert!(connected < message && message < complete);
    }
}
