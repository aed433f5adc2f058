// Agent commands: chat, inspection and hot reload

use crate::agents::{
    AgentExecutor, AgentRegistry, AgentTaskCount, ConfigChangePoller, PollReport, ReloadOutcome,
};
use crate::models::{AgentConfig, AgentRequest};
use crate::session::SessionService;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Input of the `chat` command
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub agent_name: String,
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub context: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub session_id: String,
    pub answer: String,
}

/// One registered agent as listed to clients
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSummary {
    pub agent_name: String,
    pub agent_type: String,
    pub description: Option<String>,
    pub tools: Vec<String>,
    pub active_tasks: usize,
}

/// Single-completion chat with a registered agent
pub async fn chat(
    executor: &AgentExecutor,
    sessions: &SessionService,
    user_id: Option<&str>,
    request: ChatRequest,
) -> Result<ChatResponse, String> {
    let mut agent_request: AgentRequest = sessions
        .prepare_request(&request.message, user_id, request.session_id.as_deref())
        .await
        .map_err(|e| e.to_string())?;
    agent_request.context = request.context;

    let answer = executor
        .execute(&request.agent_name, &agent_request)
        .await
        .map_err(|e| e.to_string())?;

    Ok(ChatResponse {
        session_id: agent_request.session_id,
        answer,
    })
}

pub fn list_agents(registry: &AgentRegistry) -> Vec<AgentSummary> {
    registry
        .names()
        .into_iter()
        .filter_map(|name| registry.get_entry(&name))
        .map(|(instance, config)| AgentSummary {
            agent_name: config.agent_name.clone(),
            agent_type: config.agent_type.clone(),
            description: config.description.clone(),
            tools: instance.tool_names(),
            active_tasks: registry.counter().active_count(&config.agent_name),
        })
        .collect()
}

/// Config snapshot the live instance was built from
pub fn get_agent_config(registry: &AgentRegistry, agent_name: &str) -> Result<AgentConfig, String> {
    registry
        .get_config(agent_name)
        .map(|config| config.as_ref().clone())
        .ok_or_else(|| format!("Agent not found: {}", agent_name))
}

pub fn agent_task_counts(registry: &AgentRegistry) -> Vec<AgentTaskCount> {
    registry.task_counts()
}

pub async fn reload_agent(registry: &AgentRegistry, agent_name: &str) -> Result<ReloadOutcome, String> {
    match registry.reload(agent_name).await {
        Ok(Some(instance)) => Ok(ReloadOutcome {
            agent_name: agent_name.to_string(),
            success: true,
            message: format!("reloaded (generation {})", instance.generation()),
        }),
        Ok(None) => Ok(ReloadOutcome {
            agent_name: agent_name.to_string(),
            success: false,
            message: "not found or disabled".to_string(),
        }),
        Err(e) => Err(e.to_string()),
    }
}

pub async fn reload_all_agents(registry: &AgentRegistry) -> Vec<ReloadOutcome> {
    registry.reload_all().await
}

pub async fn unregister_agent(registry: &AgentRegistry, agent_name: &str) -> bool {
    registry.unregister(agent_name).await
}

pub async fn check_config_changes(poller: &ConfigChangePoller) -> Result<PollReport, String> {
    poller.check_changes().await.map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::startup::{start_with_stores, Stores};
    use crate::config::{HubConfig, ModelProvider};
    use crate::storage::InMemoryStore;
    use std::sync::Arc;

    async fn services() -> (Arc<InMemoryStore>, crate::startup::Services) {
        let store = Arc::new(InMemoryStore::new());
        store.upsert_config(AgentConfig::new("echoer", "plain").with_tools(&["current_date"]));
        let mut config = HubConfig::default();
        config.poller.enabled = false;
        config.model.provider = ModelProvider::Echo;
        let services = start_with_stores(config, Stores::in_memory(store.clone()), None)
            .await
            .unwrap();
        (store, services)
    }

    #[tokio::test]
    async fn test_chat_creates_session() {
        let (_store, services) = services().await;
        let response = chat(
            &services.executor,
            &services.sessions,
            Some("u1"),
            ChatRequest {
                agent_name: "echoer".into(),
                message: "hello".into(),
                session_id: None,
                context: HashMap::new(),
            },
        )
        .await
        .unwrap();
        assert_eq!(response.answer, "echo: hello");
        assert_eq!(services.sessions.list_sessions("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_and_reload() {
        let (_store, services) = services().await;
        let agents = list_agents(&services.registry);
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].tools, vec!["current_date"]);

        assert!(reload_agent(&services.registry, "echoer").await.unwrap().success);
        assert!(!reload_agent(&services.registry, "ghost").await.unwrap().success);
        assert!(get_agent_config(&services.registry, "ghost").is_err());
    }
}
