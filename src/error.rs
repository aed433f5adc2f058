//! Error taxonomy shared by the registry, capabilities and delivery layers.

use thiserror::Error;

/// Errors surfaced by the agent hub core.
///
/// A drain that does not finish in time is not an error: `TaskCounter::drain`
/// reports it as `false` and the caller logs a warning and proceeds.
#[derive(Debug, Error)]
pub enum HubError {
    /// Unknown agent, connection or session
    #[error("{0}")]
    NotFound(String),

    /// Building one agent instance failed
    #[error("Failed to construct agent '{name}': {reason}")]
    Construction { name: String, reason: String },

    /// A capability was still initializing after all resolve attempts
    #[error("Dependency '{name}' not ready after {attempts} attempt(s): {reason}")]
    DependencyNotReady {
        name: String,
        attempts: u32,
        reason: String,
    },

    /// Push to a connection failed after the retry
    #[error("Delivery to connection '{connection_id}' failed: {reason}")]
    Delivery {
        connection_id: String,
        reason: String,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Template error: {0}")]
    Template(String),

    /// The model collaborator failed for this request
    #[error("Model call failed: {0}")]
    Model(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl HubError {
    pub fn agent_not_found(name: &str) -> Self {
        HubError::NotFound(format!("Agent not found: {}", name))
    }

    pub fn construction(name: &str, reason: impl Into<String>) -> Self {
        HubError::Construction {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, HubError::NotFound(_))
    }
}

impl From<String> for HubError {
    fn from(message: String) -> Self {
        HubError::Storage(message)
    }
}

pub type HubResult<T> = Result<T, HubError>;
