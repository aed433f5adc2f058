//! Agent instances and the capability-set interfaces handlers opt into
//!
//! A handler declares what it can accept by returning `Some` from
//! [`AgentHandler::as_tools_mut`] / [`AgentHandler::as_memory_mut`]; the
//! builder only wires tools or memory into handlers that ask for them.

use super::capability::CapabilityProxy;
use crate::error::HubResult;
use crate::llm::{strip_think, ChatModel, ChunkStream, ModelRequest};
use crate::models::{
    AgentConfig, AgentKind, AgentRequest, ConversationKey, MemoryMessage, MemoryPolicy,
    MemoryRole,
};
use crate::storage::MemoryStore;
use crate::templates::{PromptEngine, VariableMap};
use crate::utils::lock_mutex;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{stream, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

/// Handler accepts tool proxies
pub trait WithTools {
    fn set_tools(&mut self, tools: Vec<CapabilityProxy>);
}

/// Handler accepts conversation memory
pub trait WithMemory {
    fn set_memory(&mut self, memory: MemoryHandle);
}

/// The request-serving half of an agent
#[async_trait]
pub trait AgentHandler: Send + Sync {
    async fn chat(&self, request: &AgentRequest) -> HubResult<String>;

    async fn chat_stream(&self, request: &AgentRequest) -> HubResult<ChunkStream>;

    /// Names of the tools wired into this handler
    fn tool_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn as_tools_mut(&mut self) -> Option<&mut dyn WithTools> {
        None
    }

    fn as_memory_mut(&mut self) -> Option<&mut dyn WithMemory> {
        None
    }
}

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// A built, ready-to-serve agent bound to one config snapshot
pub struct AgentInstance {
    config: Arc<AgentConfig>,
    handler: Box<dyn AgentHandler>,
    generation: u64,
    built_at: DateTime<Utc>,
}

impl AgentInstance {
    pub fn new(config: Arc<AgentConfig>, handler: Box<dyn AgentHandler>) -> Self {
        Self {
            config,
            handler,
            generation: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
            built_at: Utc::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.agent_name
    }

    pub fn config(&self) -> &Arc<AgentConfig> {
        &self.config
    }

    /// Process-unique build number; a reload always yields a larger one
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.handler.tool_names()
    }

    pub async fn chat(&self, request: &AgentRequest) -> HubResult<String> {
        self.handler.chat(request).await
    }

    pub async fn chat_stream(&self, request: &AgentRequest) -> HubResult<ChunkStream> {
        self.handler.chat_stream(request).await
    }
}

impl std::fmt::Debug for AgentInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentInstance")
            .field("name", &self.config.agent_name)
            .field("generation", &self.generation)
            .finish()
    }
}

// =============================================================================
// Conversation memory
// =============================================================================

/// Message window over a memory store
pub struct MessageWindow {
    store: Arc<dyn MemoryStore>,
    policy: MemoryPolicy,
}

impl MessageWindow {
    pub async fn load(&self, key: &ConversationKey) -> HubResult<Vec<MemoryMessage>> {
        let cutoff = self.policy.cutoff(Utc::now());
        self.store
            .recent(&key.to_string(), self.policy.max_messages, cutoff)
            .await
    }

    pub async fn record(&self, key: &ConversationKey, role: MemoryRole, content: &str) -> HubResult<()> {
        self.store
            .append(&MemoryMessage::new(&key.to_string(), role, content))
            .await
    }

    /// Attribute this conversation's unattributed turns to the agent
    pub async fn stamp(&self, key: &ConversationKey) -> HubResult<usize> {
        self.store
            .assign_agent(&key.to_string(), &key.agent_name, &key.session_id)
            .await
    }
}

/// Memory policy descriptor plus the window it materializes on first use
#[derive(Clone)]
pub struct MemoryHandle {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    policy: MemoryPolicy,
    store: Arc<dyn MemoryStore>,
    window: OnceLock<MessageWindow>,
}

impl MemoryHandle {
    pub fn new(policy: MemoryPolicy, store: Arc<dyn MemoryStore>) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                policy,
                store,
                window: OnceLock::new(),
            }),
        }
    }

    pub fn policy(&self) -> &MemoryPolicy {
        &self.inner.policy
    }

    pub fn is_materialized(&self) -> bool {
        self.inner.window.get().is_some()
    }

    pub fn window(&self) -> &MessageWindow {
        self.inner.window.get_or_init(|| {
            log::debug!(
                "[Memory] materializing message window (max {})",
                self.inner.policy.max_messages
            );
            MessageWindow {
                store: self.inner.store.clone(),
                policy: self.inner.policy.clone(),
            }
        })
    }
}

// =============================================================================
// Generic handler
// =============================================================================

/// Default handler: renders the system prompt, consults memory and
/// forwards to the model collaborator.
pub struct GenericAgent {
    config: Arc<AgentConfig>,
    kind: AgentKind,
    variables: VariableMap,
    system_prompt: String,
    model: Arc<dyn ChatModel>,
    tools: Vec<CapabilityProxy>,
    memory: Option<MemoryHandle>,
}

impl GenericAgent {
    pub fn new(
        config: Arc<AgentConfig>,
        kind: AgentKind,
        variables: VariableMap,
        system_prompt: String,
        model: Arc<dyn ChatModel>,
    ) -> Self {
        Self {
            config,
            kind,
            variables,
            system_prompt,
            model,
            tools: Vec::new(),
            memory: None,
        }
    }

    pub fn kind(&self) -> AgentKind {
        self.kind
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    fn warn_missing_variables(&self, request: &AgentRequest) {
        for (kind, key) in self.config.required_request_keys() {
            if !request.context.contains_key(key) {
                log::warn!(
                    "Agent [{}] - {} variable [{}] is required but not provided",
                    self.config.agent_name,
                    kind,
                    key
                );
            }
        }
    }

    /// Prompt for this request: re-rendered with the request context when it
    /// has one, otherwise the prompt rendered at build time.
    pub fn prompt_for(&self, request: &AgentRequest) -> String {
        if request.context.is_empty() {
            return self.system_prompt.clone();
        }

        let mut variables = self.variables.clone();
        for (key, value) in &request.context {
            variables.insert(key.clone(), value.clone());
        }
        match PromptEngine::render(&self.config.system_prompt, &variables) {
            Ok(prompt) => prompt,
            Err(e) => {
                log::debug!(
                    "Agent [{}] request-time render failed ({}), using build-time prompt",
                    self.config.agent_name,
                    e
                );
                self.system_prompt.clone()
            }
        }
    }

    async fn prepare(&self, request: &AgentRequest) -> HubResult<ModelRequest> {
        self.warn_missing_variables(request);
        let key = request.conversation_key(&self.config.agent_name);

        let history = match &self.memory {
            Some(memory) => {
                let window = memory.window();
                let history = window.load(&key).await?;
                window.record(&key, MemoryRole::User, &request.message).await?;
                history
            }
            None => Vec::new(),
        };

        Ok(ModelRequest {
            system_prompt: self.prompt_for(request),
            history,
            user_message: request.message.clone(),
            tools: self.tools.clone(),
        })
    }
}

async fn remember_answer(memory: &MemoryHandle, key: &ConversationKey, answer: &str) {
    let window = memory.window();
    if let Err(e) = window.record(key, MemoryRole::Assistant, answer).await {
        log::warn!("[Memory] failed to record answer for {}: {}", key, e);
        return;
    }
    match window.stamp(key).await {
        Ok(stamped) => log::debug!("[Memory] stamped {} turn(s) for {}", stamped, key),
        Err(e) => log::warn!("[Memory] failed to stamp {}: {}", key, e),
    }
}

#[async_trait]
impl AgentHandler for GenericAgent {
    async fn chat(&self, request: &AgentRequest) -> HubResult<String> {
        let model_request = self.prepare(request).await?;
        let answer = self.model.complete(model_request).await?;
        let answer = strip_think(&answer).to_string();

        if let Some(memory) = &self.memory {
            let key = request.conversation_key(&self.config.agent_name);
            remember_answer(memory, &key, &answer).await;
        }
        Ok(answer)
    }

    async fn chat_stream(&self, request: &AgentRequest) -> HubResult<ChunkStream> {
        let model_request = self.prepare(request).await?;
        let inner = self.model.stream(model_request).await?;

        let Some(memory) = self.memory.clone() else {
            return Ok(inner);
        };

        let key = request.conversation_key(&self.config.agent_name);
        let collected = Arc::new(Mutex::new(String::new()));
        let failed = Arc::new(AtomicBool::new(false));

        let sink = collected.clone();
        let failure = failed.clone();
        let body = inner.inspect(move |item| match item {
            Ok(chunk) => lock_mutex(&sink).push_str(chunk),
            Err(_) => failure.store(true, Ordering::SeqCst),
        });

        let finish = stream::once(async move {
            if !failed.load(Ordering::SeqCst) {
                let answer = lock_mutex(&collected).clone();
                remember_answer(&memory, &key, &answer).await;
            }
        })
        .filter_map(|_| async { None::<HubResult<String>> });

        Ok(Box::pin(body.chain(finish)))
    }

    fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    fn as_tools_mut(&mut self) -> Option<&mut dyn WithTools> {
        Some(self)
    }

    fn as_memory_mut(&mut self) -> Option<&mut dyn WithMemory> {
        Some(self)
    }
}

impl WithTools for GenericAgent {
    fn set_tools(&mut self, tools: Vec<CapabilityProxy>) {
        self.tools = tools;
    }
}

impl WithMemory for GenericAgent {
    fn set_memory(&mut self, memory: MemoryHandle) {
        self.memory = Some(memory);
    }
}
