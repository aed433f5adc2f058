//! Authentication middleware for the server
//!
//! Validates Bearer tokens on `/api/` and `/sse/` requests. Browsers cannot set
//! headers on an `EventSource`, so `/sse/` also accepts a `token` query parameter.

use axum::{
    body::Body,
    extract::Request,
    http::{header::AUTHORIZATION, Method, StatusCode},
    response::Response,
};
use std::sync::Arc;
use tower::Layer;

/// Authentication layer that validates Bearer tokens
#[derive(Clone)]
pub struct AuthLayer {
    token: Arc<String>,
}

impl AuthLayer {
    pub fn new(token: String) -> Self {
        Self {
            token: Arc::new(token),
        }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthMiddleware {
            inner,
            token: self.token.clone(),
        }
    }
}

/// The actual middleware service
#[derive(Clone)]
pub struct AuthMiddleware<S> {
    inner: S,
    token: Arc<String>,
}

/// Whether `query` carries `token=<expected>` as a whole parameter
fn query_token_matches(query: &str, expected: &str) -> bool {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .any(|(key, value)| key == "token" && value == expected)
}

fn bearer_matches(req: &Request, expected: &str) -> bool {
    req.headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .is_some_and(|provided| provided == expected)
}

fn unauthorized() -> Response {
    let mut response = Response::new(Body::from("Unauthorized: Invalid or missing Bearer token"));
    *response.status_mut() = StatusCode::UNAUTHORIZED;
    response
}

impl<S> tower::Service<Request> for AuthMiddleware<S>
where
    S: tower::Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let token = self.token.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            // Skip auth for CORS preflight OPTIONS requests
            if req.method() == Method::OPTIONS {
                return inner.call(req).await;
            }

            let path = req.uri().path();
            let is_stream = path.starts_with("/sse/");
            if !path.starts_with("/api/") && !is_stream {
                return inner.call(req).await;
            }

            let query_ok = is_stream
                && req
                    .uri()
                    .query()
                    .is_some_and(|q| query_token_matches(q, &token));

            if query_ok || bearer_matches(&req, &token) {
                return inner.call(req).await;
            }

            log::debug!("Rejected unauthenticated request to {}", path);
            Ok(unauthorized())
        })
    }
}

/// Generate a secure random auth token
pub fn generate_auth_token() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: [u8; 16] = rng.gen();
    hex::encode(&bytes)
}

mod hex {
    const HEX_CHARS: &[u8; 16] = b"0123456789abcdef";

    pub fn encode(bytes: &[u8]) -> String {
        let mut result = String::with_capacity(bytes.len() * 2);
        for &byte in bytes {
            result.push(HEX_CHARS[(byte >> 4) as usize] as char);
            result.push(HEX_CHARS[(byte & 0xf) as usize] as char);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_auth_token() {
        let token = generate_auth_token();
        assert_eq!(token.len(), 32); // 16 bytes = 32 hex chars
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_query_token_matches_whole_parameter() {
        assert!(query_token_matches("message=hi&token=abc", "abc"));
        assert!(!query_token_matches("token=abcd", "abc"));
        assert!(!query_token_matches("xtoken=abc", "abc"));
        assert!(!query_token_matches("message=token=abc", "abc"));
    }

    #[test]
    fn test_bearer_matches() {
        let req = axum::http::Request::builder()
            .uri("/api/invoke")
            .header(AUTHORIZATION, "Bearer abc")
            .body(Body::empty())
            .unwrap();
        assert!(bearer_matches(&req, "abc"));
        assert!(!bearer_matches(&req, "abd"));
    }
}
