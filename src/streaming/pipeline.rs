//! Ordered push + persist of agent output

use super::connections::{CloseReason, ConnectionRegistry};
use super::events::StreamEvent;
use crate::llm::ChunkStream;
use crate::models::{MessageRecord, MessageType};
use crate::storage::MessageStore;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(50);
pub const DEFAULT_SAFETY_TIMEOUT: Duration = Duration::from_secs(300);

/// Who a delivery belongs to, passed explicitly through every step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryContext {
    pub connection_id: String,
    pub session_id: String,
    pub user_id: String,
    pub agent_name: Option<String>,
}

impl DeliveryContext {
    pub fn new(connection_id: &str, session_id: &str, user_id: &str) -> Self {
        Self {
            connection_id: connection_id.to_string(),
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            agent_name: None,
        }
    }

    pub fn with_agent(mut self, agent_name: &str) -> Self {
        self.agent_name = Some(agent_name.to_string());
        self
    }
}

/// How a delivery ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Completed,
    Failed,
    TimedOut,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReport {
    pub connection_id: String,
    pub status: DeliveryStatus,
    pub chunks: usize,
    pub pushed: usize,
    pub persisted: usize,
    pub stamped: usize,
}

impl DeliveryReport {
    fn new(connection_id: &str) -> Self {
        Self {
            connection_id: connection_id.to_string(),
            status: DeliveryStatus::Completed,
            chunks: 0,
            pushed: 0,
            persisted: 0,
            stamped: 0,
        }
    }
}

pub struct DeliveryPipeline {
    connections: Arc<ConnectionRegistry>,
    messages: Arc<dyn MessageStore>,
    retry_delay: Duration,
    safety_timeout: Duration,
}

impl DeliveryPipeline {
    pub fn new(connections: Arc<ConnectionRegistry>, messages: Arc<dyn MessageStore>) -> Self {
        Self {
            connections,
            messages,
            retry_delay: DEFAULT_RETRY_DELAY,
            safety_timeout: DEFAULT_SAFETY_TIMEOUT,
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_safety_timeout(mut self, timeout: Duration) -> Self {
        self.safety_timeout = timeout;
        self
    }

    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    /// Context for a connection known only by id. Without a session mapping
    /// the connection id stands in for the session.
    pub fn context_for(&self, connection_id: &str, user_id: &str) -> DeliveryContext {
        let session_id = self
            .connections
            .session_of(connection_id)
            .unwrap_or_else(|| connection_id.to_string());
        DeliveryContext::new(connection_id, &session_id, user_id)
    }

    /// Push with one delayed retry. Returns whether the event reached the client.
    async fn push(&self, connection_id: &str, event: &StreamEvent) -> bool {
        if !self.connections.is_live(connection_id) {
            return false;
        }
        if self.connections.push(connection_id, event.clone()).is_ok() {
            return true;
        }

        tokio::time::sleep(self.retry_delay).await;
        match self.connections.push(connection_id, event.clone()) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("[Delivery] Push failed after retry: {}", e);
                false
            }
        }
    }

    async fn persist(
        &self,
        ctx: &DeliveryContext,
        message_type: MessageType,
        content: Value,
        sent_at: DateTime<Utc>,
    ) -> bool {
        let mut record = MessageRecord::new(
            &ctx.user_id,
            &ctx.session_id,
            &ctx.connection_id,
            message_type,
            content,
        );
        record.sent_at = sent_at;
        if message_type != MessageType::User {
            record.agent_id = ctx.agent_name.clone();
        }
        match self.messages.save_message(&record).await {
            Ok(()) => true,
            Err(e) => {
                log::error!(
                    "[Delivery] Failed to persist {} message for {}: {}",
                    message_type.as_str(),
                    ctx.connection_id,
                    e
                );
                false
            }
        }
    }

    /// Push an event and persist it when it carries content. Persistence
    /// happens whether or not the push reached the client.
    pub async fn send_event(&self, ctx: &DeliveryContext, event: StreamEvent) -> bool {
        let pushed = self.push(&ctx.connection_id, &event).await;
        if let Some(message_type) = event.event.message_type() {
            self.persist(ctx, message_type, event.payload.clone(), Utc::now())
                .await;
        }
        pushed
    }

    /// Record the user's own turn
    pub async fn record_user_message(&self, ctx: &DeliveryContext, message: &str) -> bool {
        self.persist(ctx, MessageType::User, json!({ "message": message }), Utc::now())
            .await
    }

    /// Emit an error event and tear the connection down
    pub async fn fail(&self, ctx: &DeliveryContext, message: &str) {
        self.send_event(ctx, StreamEvent::error(message)).await;
        self.connections
            .close_with(&ctx.connection_id, CloseReason::Failed);
    }

    /// Deliver `chunks` in order, then emit the terminal marker, stamp the
    /// agent on this connection's unattributed records and close the connection.
    /// Bounded by the safety timeout.
    pub async fn deliver(&self, ctx: &DeliveryContext, chunks: ChunkStream) -> DeliveryReport {
        let mut report = DeliveryReport::new(&ctx.connection_id);

        let outcome =
            tokio::time::timeout(self.safety_timeout, self.drive(ctx, chunks, &mut report)).await;

        match outcome {
            Ok(Ok(())) => {
                if self
                    .push(&ctx.connection_id, &StreamEvent::complete(&ctx.connection_id))
                    .await
                {
                    report.pushed += 1;
                }
            }
            Ok(Err(message)) => {
                report.status = DeliveryStatus::Failed;
                log::warn!(
                    "[Delivery] Stream for {} failed: {}",
                    ctx.connection_id,
                    message
                );
                self.send_event(ctx, StreamEvent::error(&message)).await;
            }
            Err(_) => {
                report.status = DeliveryStatus::TimedOut;
                log::warn!(
                    "[Delivery] Stream for {} exceeded {:?}",
                    ctx.connection_id,
                    self.safety_timeout
                );
                self.send_event(ctx, StreamEvent::error("stream timed out")).await;
            }
        }

        if let Some(agent) = &ctx.agent_name {
            match self
                .messages
                .assign_agent(&ctx.session_id, &ctx.connection_id, agent)
                .await
            {
                Ok(stamped) => report.stamped = stamped,
                Err(e) => log::warn!(
                    "[Delivery] Failed to attribute messages to [{}]: {}",
                    agent,
                    e
                ),
            }
        }

        let reason = match report.status {
            DeliveryStatus::Completed => CloseReason::Completed,
            DeliveryStatus::Failed => CloseReason::Failed,
            DeliveryStatus::TimedOut => CloseReason::Timeout,
        };
        self.connections.close_with(&ctx.connection_id, reason);
        log::debug!(
            "[Delivery] {} finished: {:?}, {} chunk(s), {} persisted",
            ctx.connection_id,
            report.status,
            report.chunks,
            report.persisted
        );
        report
    }

    async fn drive(
        &self,
        ctx: &DeliveryContext,
        mut chunks: ChunkStream,
        report: &mut DeliveryReport,
    ) -> Result<(), String> {
        let mut last_sent: Option<DateTime<Utc>> = None;

        while let Some(item) = chunks.next().await {
            let text = item.map_err(|e| e.to_string())?;
            report.chunks += 1;

            // Arrival order must survive a clock step backwards
            let now = Utc::now();
            let sent_at = match last_sent {
                Some(prev) if prev > now => prev,
                _ => now,
            };
            last_sent = Some(sent_at);

            let event = StreamEvent::chunk(&text);
            if self.push(&ctx.connection_id, &event).await {
                report.pushed += 1;
            }
            if self
                .persist(ctx, MessageType::Agent, event.payload, sent_at)
                .await
            {
                report.persisted += 1;
            }
        }
        Ok(())
    }
}
