//! Server application state shared across handlers

use crate::agents::{AgentExecutor, AgentRegistry, ConfigChangePoller};
use crate::session::SessionService;
use crate::shutdown::ShutdownState;
use crate::startup::Services;
use crate::streaming::ConnectionRegistry;
use std::sync::Arc;

/// Shared state for the server: handles onto the running services
#[derive(Clone)]
pub struct ServerAppState {
    /// Authentication token for this process
    pub auth_token: String,

    pub shutdown_state: ShutdownState,

    pub registry: Arc<AgentRegistry>,

    pub executor: Arc<AgentExecutor>,

    pub sessions: Arc<SessionService>,

    pub poller: Arc<ConfigChangePoller>,

    /// Live SSE connections
    pub connections: Arc<ConnectionRegistry>,
}

impl ServerAppState {
    pub fn new(auth_token: String, shutdown_state: ShutdownState, services: &Services) -> Self {
        Self {
            auth_token,
            shutdown_state,
            registry: services.registry.clone(),
            executor: services.executor.clone(),
            sessions: services.sessions.clone(),
            poller: services.poller.clone(),
            connections: services.connections.clone(),
        }
    }
}
