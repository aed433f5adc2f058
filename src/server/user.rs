//! Caller identity taken from the `x-client-token-user` header

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use serde::Deserialize;
use std::convert::Infallible;

pub const USER_HEADER: &str = "x-client-token-user";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClientTokenUser {
    user_id: Option<String>,
}

/// User of the current request. `None` when the header is missing or unusable;
/// the session service substitutes the default user.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserContext {
    pub user_id: Option<String>,
}

impl UserContext {
    pub fn from_header(value: &str) -> Self {
        let user_id = serde_json::from_str::<ClientTokenUser>(value)
            .ok()
            .and_then(|u| u.user_id)
            .filter(|id| !id.trim().is_empty());
        Self { user_id }
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for UserContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let context = parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(UserContext::from_header)
            .unwrap_or_default();
        Ok(context)
    }
}
