// Integration tests for streamed delivery through the executor: ordering,
// persistence without a listener, failures and concurrent close.

#[cfg(test)]
mod delivery_tests {
    use agent_hub_lib::config::{HubConfig, ModelProvider};
    use agent_hub_lib::error::{HubError, HubResult};
    use agent_hub_lib::llm::{ChatModel, ChunkStream, ModelRequest};
    use agent_hub_lib::models::{AgentConfig, AgentRequest, MessageType};
    use agent_hub_lib::startup::{start_with_stores, Services, Stores};
    use agent_hub_lib::storage::{InMemoryStore, MessageStore};
    use agent_hub_lib::streaming::{ConnectionRegistry, DeliveryStatus, EventKind};
    use async_trait::async_trait;
    use futures_util::stream;
    use std::sync::Arc;
    use std::time::Duration;

    /// Streams a fixed script; an `Err` entry fails the stream at that point
    struct ScriptedModel {
        script: Vec<Result<&'static str, &'static str>>,
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, _request: ModelRequest) -> HubResult<String> {
            Ok(self
                .script
                .iter()
                .filter_map(|item| item.ok())
                .collect::<String>())
        }

        async fn stream(&self, _request: ModelRequest) -> HubResult<ChunkStream> {
            let items: Vec<HubResult<String>> = self
                .script
                .iter()
                .map(|item| match item {
                    Ok(text) => Ok(text.to_string()),
                    Err(reason) => Err(HubError::Model(reason.to_string())),
                })
                .collect();
            Ok(Box::pin(stream::iter(items)))
        }
    }

    async fn services(script: Vec<Result<&'static str, &'static str>>) -> (Arc<InMemoryStore>, Services) {
        let store = Arc::new(InMemoryStore::new());
        store.upsert_config(AgentConfig::new("writer", "Write"));
        let mut config = HubConfig::default();
        config.poller.enabled = false;
        config.model.provider = ModelProvider::Echo;
        config.delivery.retry_delay_ms = 1;
        let services = start_with_stores(
            config,
            Stores::in_memory(store.clone()),
            Some(Arc::new(ScriptedModel { script })),
        )
        .await
        .unwrap();
        (store, services)
    }

    #[tokio::test]
    async fn test_three_chunks_arrive_in_order_then_complete() {
        let (store, services) = services(vec![Ok("one "), Ok("two "), Ok("three")]).await;
        let mut handle = services.connections.open("c1", "s1");
        let request = AgentRequest::new("count", "u1", "s1").with_connection("c1");

        let report = services.executor.execute_stream("writer", &request).await.unwrap();
        assert_eq!(report.status, DeliveryStatus::Completed);
        assert_eq!(report.chunks, 3);
        assert_eq!(report.pushed, 3);

        let mut events = Vec::new();
        while let Some(event) = handle.recv().await {
            events.push(event);
        }
        let kinds: Vec<_> = events.iter().map(|e| e.event).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::Connected,
                EventKind::Message,
                EventKind::Message,
                EventKind::Message,
                EventKind::Complete
            ]
        );
        assert_eq!(events[1].payload["answer"], "one ");
        assert_eq!(events[3].payload["answer"], "three");

        // User turn first, then the chunks; the completion marker is not stored
        let records = store.find_by_connection("c1").await.unwrap();
        let types: Vec<_> = records.iter().map(|r| r.message_type).collect();
        assert_eq!(
            types,
            vec![
                MessageType::User,
                MessageType::Agent,
                MessageType::Agent,
                MessageType::Agent
            ]
        );
        assert!(records.windows(2).all(|w| w[0].sent_at <= w[1].sent_at));
        assert!(!services.connections.is_live("c1"));
    }

    #[tokio::test]
    async fn test_chunks_persist_after_client_disconnects() {
        let (store, services) = services(vec![Ok("a"), Ok("b")]).await;
        let handle = services.connections.open("c1", "s1");
        drop(handle);
        assert!(!services.connections.is_live("c1"));

        let request = AgentRequest::new("hello", "u1", "s1").with_connection("c1");
        let report = services.executor.execute_stream("writer", &request).await.unwrap();
        assert_eq!(report.pushed, 0);
        assert_eq!(report.persisted, 2);

        let answers: Vec<_> = store
            .find_by_session("s1")
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.message_type == MessageType::Agent)
            .map(|r| r.content["answer"].clone())
            .collect();
        assert_eq!(answers, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_mid_stream_failure_sends_and_stores_error() {
        let (store, services) = services(vec![Ok("partial"), Err("upstream reset")]).await;
        let mut handle = services.connections.open("c1", "s1");
        let request = AgentRequest::new("go", "u1", "s1").with_connection("c1");

        let report = services.executor.execute_stream("writer", &request).await.unwrap();
        assert_eq!(report.status, DeliveryStatus::Failed);

        let mut kinds = Vec::new();
        while let Some(event) = handle.recv().await {
            kinds.push(event.event);
        }
        assert!(kinds.contains(&EventKind::Error));
        assert!(!kinds.contains(&EventKind::Complete));

        let records = store.find_by_connection("c1").await.unwrap();
        assert_eq!(
            records.last().map(|r| r.message_type),
            Some(MessageType::Error)
        );
    }

    #[tokio::test]
    async fn test_unknown_agent_reports_error_on_connection() {
        let (_store, services) = services(vec![Ok("unused")]).await;
        let mut handle = services.connections.open("c1", "s1");
        let request = AgentRequest::new("hi", "u1", "s1").with_connection("c1");

        let err = services
            .executor
            .execute_stream("nobody", &request)
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let mut kinds = Vec::new();
        while let Some(event) = handle.recv().await {
            kinds.push(event.event);
        }
        assert_eq!(kinds, vec![EventKind::Connected, EventKind::Error]);
        assert_eq!(services.registry.counter().active_count("nobody"), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_close_runs_cleanup_once() {
        let registry = Arc::new(ConnectionRegistry::with_timeout(Duration::from_millis(200)));
        let _handle = registry.open("c1", "s1");

        let closers: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.close("c1") })
            })
            .collect();
        let mut closed = 0;
        for closer in closers {
            if closer.await.unwrap() {
                closed += 1;
            }
        }
        // Let the idle timeout fire against the already-closed connection
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(closed, 1);
        assert_eq!(registry.cleanup_count(), 1);
        assert_eq!(registry.live_count(), 0);
    }
}
