//! Ordered process startup
//!
//! [`start`] builds every service once, in dependency order, and names the
//! stage that failed. The binary calls it exactly once.

use crate::agents::{
    AgentBuilder, AgentExecutor, AgentRegistry, CapabilityRegistry, ConfigChangePoller,
    PollerHandle, RetryPolicy, TaskCounter,
};
use crate::config::{HubConfig, ModelProvider, StorageBackend};
use crate::llm::{ChatModel, EchoModel, OpenAiChatModel};
use crate::session::SessionService;
use crate::shutdown::ShutdownReport;
use crate::storage::{
    ConfigStore, FileStore, InMemoryStore, MemoryStore, MessageStore, SessionStore,
    YamlConfigStore,
};
use crate::streaming::{ConnectionRegistry, DeliveryPipeline};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Persistence collaborators the services are built on
#[derive(Clone)]
pub struct Stores {
    pub configs: Arc<dyn ConfigStore>,
    pub messages: Arc<dyn MessageStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub memory: Arc<dyn MemoryStore>,
}

impl Stores {
    /// One in-process store behind every trait
    pub fn in_memory(store: Arc<InMemoryStore>) -> Self {
        Self {
            configs: store.clone(),
            messages: store.clone(),
            sessions: store.clone(),
            memory: store,
        }
    }

    /// Stores selected by the storage section. Agent definitions always come
    /// from the agents directory.
    pub fn open(config: &HubConfig) -> Result<Self> {
        let agents_dir = config.storage.resolved_agents_dir();
        let configs: Arc<dyn ConfigStore> = Arc::new(YamlConfigStore::new(&agents_dir));

        match config.storage.backend {
            StorageBackend::Memory => {
                log::info!("Using in-memory storage");
                let store = Arc::new(InMemoryStore::new());
                Ok(Self {
                    configs,
                    ..Self::in_memory(store)
                })
            }
            StorageBackend::File => {
                let data_dir = config.storage.resolved_data_dir();
                log::info!("Using file storage at {:?}", data_dir);
                let store = Arc::new(FileStore::open(&data_dir)?);
                Ok(Self {
                    configs,
                    messages: store.clone(),
                    sessions: store.clone(),
                    memory: store,
                })
            }
        }
    }
}

/// Everything a running hub needs
pub struct Services {
    pub config: HubConfig,
    pub capabilities: Arc<CapabilityRegistry>,
    pub registry: Arc<AgentRegistry>,
    pub executor: Arc<AgentExecutor>,
    pub connections: Arc<ConnectionRegistry>,
    pub pipeline: Arc<DeliveryPipeline>,
    pub sessions: Arc<SessionService>,
    pub poller: Arc<ConfigChangePoller>,
    poller_handle: Option<PollerHandle>,
    cleanup_task: Option<JoinHandle<()>>,
}

fn build_model(config: &HubConfig) -> Arc<dyn ChatModel> {
    match config.model.provider {
        ModelProvider::Echo => Arc::new(EchoModel),
        ModelProvider::Openai => {
            if config.model.api_key.is_none() {
                log::warn!("No model API key configured; requests will be sent unauthenticated");
            }
            Arc::new(
                OpenAiChatModel::new(
                    &config.model.base_url,
                    &config.model.model,
                    config.model.api_key.clone(),
                )
                .with_temperature(config.model.temperature),
            )
        }
    }
}

/// Open stores from `config` and start every service
pub async fn start(config: HubConfig, model: Option<Arc<dyn ChatModel>>) -> Result<Services> {
    let stores = Stores::open(&config).context("Failed to open storage")?;
    start_with_stores(config, stores, model).await
}

/// Start every service on the given stores
pub async fn start_with_stores(
    config: HubConfig,
    stores: Stores,
    model: Option<Arc<dyn ChatModel>>,
) -> Result<Services> {
    // 1. Capabilities
    let capabilities = Arc::new(CapabilityRegistry::with_builtins());
    log::info!("Capabilities ready: {}", capabilities.names().join(", "));

    // 2. Model collaborator
    let model = model.unwrap_or_else(|| build_model(&config));
    log::info!("Model: {}", model.name());

    // 3. Agent registry
    let retry = RetryPolicy::new(
        config.capabilities.resolve_attempts,
        Duration::from_millis(config.capabilities.initial_backoff_ms),
    );
    let builder =
        AgentBuilder::new(model, capabilities.clone(), stores.memory.clone()).with_retry(retry);
    let counter = Arc::new(TaskCounter::with_poll_interval(config.registry.drain_poll()));
    let registry = Arc::new(
        AgentRegistry::new(builder, stores.configs.clone(), counter)
            .with_drain_timeout(config.registry.drain_timeout()),
    );
    let loaded = registry
        .initialize()
        .await
        .context("Failed to load agent configurations")?;
    log::info!("Registered {} agent(s)", loaded);

    // 4. Delivery
    let connections = Arc::new(ConnectionRegistry::with_timeout(
        config.delivery.connection_timeout(),
    ));
    let pipeline = Arc::new(
        DeliveryPipeline::new(connections.clone(), stores.messages.clone())
            .with_retry_delay(config.delivery.retry_delay())
            .with_safety_timeout(config.delivery.safety_timeout()),
    );
    let executor = Arc::new(AgentExecutor::new(registry.clone(), pipeline.clone()));

    // 5. Sessions
    let sessions = Arc::new(
        SessionService::new(stores.sessions.clone(), stores.messages.clone())
            .with_expiry_days(config.sessions.expiry_days),
    );
    let cleanup_task = SessionService::start_cleanup_task(
        sessions.clone(),
        Duration::from_secs(config.sessions.cleanup_interval_secs.max(1)),
    );

    // 6. Change poller
    let poller = Arc::new(
        ConfigChangePoller::new(registry.clone(), stores.configs.clone())
            .with_detection(config.poller.change_detection)
            .with_interval(config.poller.interval()),
    );
    let poller_handle = if config.poller.enabled {
        Some(poller.clone().start())
    } else {
        log::info!("Config change poller disabled");
        None
    };

    Ok(Services {
        config,
        capabilities,
        registry,
        executor,
        connections,
        pipeline,
        sessions,
        poller,
        poller_handle,
        cleanup_task: Some(cleanup_task),
    })
}

impl Services {
    /// Stop background tasks, close connections and drain agents
    pub async fn shutdown(mut self) -> ShutdownReport {
        let mut report = ShutdownReport::default();

        if let Some(handle) = self.poller_handle.take() {
            handle.stop().await;
        }
        if let Some(task) = self.cleanup_task.take() {
            task.abort();
        }

        report.connections_closed = self.connections.close_all();

        let names = self.registry.names();
        report.busy_agents = self
            .registry
            .drain_all(self.config.registry.drain_timeout())
            .await;
        report.agents_drained = names.len().saturating_sub(report.busy_agents.len());
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AgentConfig, AgentRequest};

    fn test_config() -> HubConfig {
        let mut config = HubConfig::default();
        config.poller.enabled = false;
        config.model.provider = ModelProvider::Echo;
        config
    }

    #[tokio::test]
    async fn test_start_loads_agents_and_serves() {
        let store = Arc::new(InMemoryStore::new());
        store.upsert_config(AgentConfig::new("echoer", "plain"));

        let services = start_with_stores(test_config(), Stores::in_memory(store), None)
            .await
            .unwrap();
        assert_eq!(services.registry.names(), vec!["echoer"]);

        let answer = services
            .executor
            .execute("echoer", &AgentRequest::new("hi", "u", "s"))
            .await
            .unwrap();
        assert_eq!(answer, "echo: hi");

        let report = services.shutdown().await;
        assert_eq!(report.agents_drained, 1);
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn test_memory_backend_reads_agents_dir() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("writer.yaml"), "systemPrompt: Write\n").unwrap();

        let mut config = test_config();
        config.storage.backend = StorageBackend::Memory;
        config.storage.agents_dir = Some(temp_dir.path().to_path_buf());

        let services = start(config, None).await.unwrap();
        assert!(services.registry.contains("writer"));
        services.shutdown().await;
    }
}
