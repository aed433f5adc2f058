// Counted execution of agent calls

use super::registry::AgentRegistry;
use super::task_counter::TaskCounter;
use crate::error::{HubError, HubResult};
use crate::models::AgentRequest;
use crate::streaming::{DeliveryContext, DeliveryPipeline, DeliveryReport};
use std::sync::Arc;

/// Runs requests against registered agents. Every call is counted from
/// before the registry lookup until it returns, so a reload waits for it.
pub struct AgentExecutor {
    registry: Arc<AgentRegistry>,
    counter: Arc<TaskCounter>,
    pipeline: Arc<DeliveryPipeline>,
}

impl AgentExecutor {
    pub fn new(registry: Arc<AgentRegistry>, pipeline: Arc<DeliveryPipeline>) -> Self {
        Self {
            counter: registry.counter().clone(),
            registry,
            pipeline,
        }
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn pipeline(&self) -> &Arc<DeliveryPipeline> {
        &self.pipeline
    }

    /// Single completion
    pub async fn execute(&self, name: &str, request: &AgentRequest) -> HubResult<String> {
        let _guard = self.counter.guard(name);
        let instance = self
            .registry
            .get(name)
            .ok_or_else(|| HubError::agent_not_found(name))?;

        log::debug!(
            "[Executor] [{}] chat for user {} in session {}",
            name,
            request.user_id,
            request.session_id
        );
        instance.chat(request).await
    }

    /// Stream the answer into the request's connection. Returns once the
    /// delivery finished; the connection is closed by then.
    pub async fn execute_stream(
        &self,
        name: &str,
        request: &AgentRequest,
    ) -> HubResult<DeliveryReport> {
        let connection_id = request.connection_id.clone().ok_or_else(|| {
            HubError::InvalidConfig("streaming request has no connection id".to_string())
        })?;
        let ctx = DeliveryContext::new(&connection_id, &request.session_id, &request.user_id)
            .with_agent(name);

        let _guard = self.counter.guard(name);
        let Some(instance) = self.registry.get(name) else {
            let err = HubError::agent_not_found(name);
            self.pipeline.fail(&ctx, &err.to_string()).await;
            return Err(err);
        };

        self.pipeline
            .record_user_message(&ctx, &request.message)
            .await;

        let chunks = match instance.chat_stream(request).await {
            Ok(chunks) => chunks,
            Err(e) => {
                log::error!("[Executor] [{}] failed to start stream: {}", name, e);
                self.pipeline.fail(&ctx, &e.to_string()).await;
                return Err(e);
            }
        };

        Ok(self.pipeline.deliver(&ctx, chunks).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::builder::AgentBuilder;
    use crate::agents::capability::CapabilityRegistry;
    use crate::llm::EchoModel;
    use crate::models::{AgentConfig, MessageType};
    use crate::storage::{InMemoryStore, MessageStore};
    use crate::streaming::{ConnectionRegistry, DeliveryStatus, EventKind};

    fn executor(store: Arc<InMemoryStore>) -> AgentExecutor {
        let builder = AgentBuilder::new(
            Arc::new(EchoModel),
            Arc::new(CapabilityRegistry::with_builtins()),
            store.clone(),
        );
        let registry = Arc::new(AgentRegistry::new(
            builder,
            store.clone(),
            Arc::new(TaskCounter::new()),
        ));
        let pipeline = Arc::new(DeliveryPipeline::new(
            Arc::new(ConnectionRegistry::new()),
            store,
        ));
        AgentExecutor::new(registry, pipeline)
    }

    #[tokio::test]
    async fn test_execute_unknown_agent() {
        let executor = executor(Arc::new(InMemoryStore::new()));
        let err = executor
            .execute("ghost", &AgentRequest::new("hi", "u", "s"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Agent not found: ghost");
        assert_eq!(executor.registry().counter().active_count("ghost"), 0);
    }

    #[tokio::test]
    async fn test_execute_stream_records_user_turn_and_answer() {
        let store = Arc::new(InMemoryStore::new());
        store.upsert_config(AgentConfig::new("echoer", "plain"));
        let executor = executor(store.clone());
        executor.registry().initialize().await.unwrap();

        let mut handle = executor.pipeline().connections().open("c1", "s1");
        let request = AgentRequest::new("one two", "u1", "s1").with_connection("c1");
        let report = executor.execute_stream("echoer", &request).await.unwrap();
        assert_eq!(report.status, DeliveryStatus::Completed);

        let mut last = None;
        while let Some(event) = handle.recv().await {
            last = Some(event.event);
        }
        assert_eq!(last, Some(EventKind::Complete));

        let records = store.find_by_connection("c1").await.unwrap();
        assert_eq!(records[0].message_type, MessageType::User);
        assert!(records[1..].iter().all(|r| r.message_type == MessageType::Agent));
        assert!(records.iter().all(|r| r.agent_id.as_deref() == Some("echoer")));
    }

    #[tokio::test]
    async fn test_execute_stream_unknown_agent_sends_error() {
        let store = Arc::new(InMemoryStore::new());
        let executor = executor(store);
        let mut handle = executor.pipeline().connections().open("c1", "s1");
        let request = AgentRequest::new("hi", "u1", "s1").with_connection("c1");

        assert!(executor.execute_stream("ghost", &request).await.is_err());
        let mut kinds = Vec::new();
        while let Some(event) = handle.recv().await {
            kinds.push(event.event);
        }
        assert_eq!(kinds, vec![EventKind::Connected, EventKind::Error]);
    }
}
