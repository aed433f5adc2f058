// Turns one agent configuration snapshot into a ready AgentInstance

use super::capability::{CapabilityProxy, CapabilitySource, RetryPolicy};
use super::instance::{AgentHandler, AgentInstance, GenericAgent, MemoryHandle};
use crate::error::{HubError, HubResult};
use crate::llm::ChatModel;
use crate::models::{AgentConfig, AgentKind};
use crate::storage::MemoryStore;
use crate::templates::{inject_standard_variables, PromptEngine, VariableMap};
use std::sync::Arc;

/// Inputs a handler factory gets for one build
pub struct HandlerInput {
    pub config: Arc<AgentConfig>,
    pub kind: AgentKind,
    /// Config variables merged with the injected standard ones
    pub variables: VariableMap,
    /// System prompt rendered at build time
    pub system_prompt: String,
    pub model: Arc<dyn ChatModel>,
}

/// Creates the handler for a built agent. Tools and memory are wired in
/// afterwards through the handler's capability-set interfaces.
pub trait HandlerFactory: Send + Sync {
    fn create(&self, input: HandlerInput) -> HubResult<Box<dyn AgentHandler>>;
}

/// Factory producing [`GenericAgent`] handlers
pub struct GenericAgentFactory;

impl HandlerFactory for GenericAgentFactory {
    fn create(&self, input: HandlerInput) -> HubResult<Box<dyn AgentHandler>> {
        Ok(Box::new(GenericAgent::new(
            input.config,
            input.kind,
            input.variables,
            input.system_prompt,
            input.model,
        )))
    }
}

pub struct AgentBuilder {
    model: Arc<dyn ChatModel>,
    capabilities: Arc<dyn CapabilitySource>,
    memory_store: Arc<dyn MemoryStore>,
    retry: RetryPolicy,
    factory: Arc<dyn HandlerFactory>,
}

impl AgentBuilder {
    pub fn new(
        model: Arc<dyn ChatModel>,
        capabilities: Arc<dyn CapabilitySource>,
        memory_store: Arc<dyn MemoryStore>,
    ) -> Self {
        Self {
            model,
            capabilities,
            memory_store,
            retry: RetryPolicy::default(),
            factory: Arc::new(GenericAgentFactory),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_factory(mut self, factory: Arc<dyn HandlerFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Build an instance for `config`. Any failure here is a construction
    /// failure scoped to this one agent.
    pub fn build(&self, config: AgentConfig) -> HubResult<Arc<AgentInstance>> {
        let name = config.agent_name.clone();
        if name.trim().is_empty() {
            return Err(HubError::construction(&name, "agent name is empty"));
        }

        let kind = AgentKind::parse(&config.agent_type).ok_or_else(|| {
            HubError::construction(
                &name,
                format!("unsupported agent type '{}'", config.agent_type),
            )
        })?;

        let mut variables: VariableMap = config
            .prompt_variables
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        inject_standard_variables(&mut variables, &name, kind.as_str());

        let system_prompt = PromptEngine::render_or_raw(&config.system_prompt, &variables)
            .map_err(|e| HubError::construction(&name, format!("system prompt: {}", e)))?;

        let config = Arc::new(config);
        let mut handler = self.factory.create(HandlerInput {
            config: config.clone(),
            kind,
            variables,
            system_prompt,
            model: self.model.clone(),
        })?;

        if config.has_tools() {
            match handler.as_tools_mut() {
                Some(target) => target.set_tools(self.resolve_tools(&config)),
                None => log::warn!(
                    "Agent [{}] declares tools but its handler does not accept them",
                    name
                ),
            }
        }

        if let Some(policy) = config.memory.as_ref().filter(|p| p.is_active()) {
            match handler.as_memory_mut() {
                Some(target) => {
                    target.set_memory(MemoryHandle::new(policy.clone(), self.memory_store.clone()))
                }
                None => log::warn!(
                    "Agent [{}] declares memory but its handler does not accept it",
                    name
                ),
            }
        }

        log::info!(
            "Built agent [{}] ({}, {} tool(s), memory: {})",
            name,
            kind.as_str(),
            handler.tool_names().len(),
            config.memory.as_ref().map_or(false, |p| p.is_active())
        );
        Ok(Arc::new(AgentInstance::new(config, handler)))
    }

    /// Lazy proxies for every declared tool the capability source knows
    fn resolve_tools(&self, config: &AgentConfig) -> Vec<CapabilityProxy> {
        let mut tools = Vec::with_capacity(config.tool_names.len());
        for tool in &config.tool_names {
            if !self.capabilities.exists(tool) {
                log::warn!(
                    "Agent [{}] - tool [{}] not found, skipping",
                    config.agent_name,
                    tool
                );
                continue;
            }
            tools.push(CapabilityProxy::from_source(
                tool,
                self.capabilities.clone(),
                self.retry,
            ));
        }
        tools
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::capability::CapabilityRegistry;
    use crate::llm::EchoModel;
    use crate::models::{AgentRequest, MemoryPolicy};
    use crate::storage::InMemoryStore;
    use async_trait::async_trait;

    fn builder() -> AgentBuilder {
        AgentBuilder::new(
            Arc::new(EchoModel),
            Arc::new(CapabilityRegistry::with_builtins()),
            Arc::new(InMemoryStore::new()),
        )
    }

    #[test]
    fn test_build_resolves_known_tools_only() {
        let config = AgentConfig::new("helper", "Help").with_tools(&["current_date", "missing"]);
        let instance = builder().build(config).unwrap();
        assert_eq!(instance.tool_names(), vec!["current_date"]);
    }

    #[test]
    fn test_invalid_agent_type_is_construction_failure() {
        let config = AgentConfig::new("odd", "x").with_agent_type("batch");
        let err = builder().build(config).unwrap_err();
        assert!(matches!(err, HubError::Construction { .. }));
    }

    #[test]
    fn test_template_syntax_error_is_construction_failure() {
        let config = AgentConfig::new("broken", "Hello {% if %}");
        assert!(matches!(
            builder().build(config).unwrap_err(),
            HubError::Construction { .. }
        ));
    }

    #[test]
    fn test_missing_variable_keeps_raw_template() {
        let config = AgentConfig::new("raw", "Hi {{ nobody }}");
        assert!(builder().build(config).is_ok());
    }

    struct Bare;

    #[async_trait]
    impl AgentHandler for Bare {
        async fn chat(&self, _request: &AgentRequest) -> HubResult<String> {
            Ok("bare".into())
        }

        async fn chat_stream(&self, _request: &AgentRequest) -> HubResult<crate::llm::ChunkStream> {
            Err(HubError::Model("unsupported".into()))
        }
    }

    struct BareFactory;

    impl HandlerFactory for BareFactory {
        fn create(&self, _input: HandlerInput) -> HubResult<Box<dyn AgentHandler>> {
            Ok(Box::new(Bare))
        }
    }

    #[tokio::test]
    async fn test_handler_without_capability_sets_is_built_bare() {
        let config = AgentConfig::new("bare", "x")
            .with_tools(&["current_date"])
            .with_memory(MemoryPolicy::message_window(5));
        let instance = builder()
            .with_factory(Arc::new(BareFactory))
            .build(config)
            .unwrap();
        assert!(instance.tool_names().is_empty());
        let answer = instance.chat(&AgentRequest::new("q", "u", "s")).await.unwrap();
        assert_eq!(answer, "bare");
    }
}
