//! Model-call collaborator
//!
//! Agents hand a rendered prompt, history and tool proxies to a [`ChatModel`]
//! and get back either one completion or an ordered stream of chunks.

pub mod openai;

pub use openai::OpenAiChatModel;

use crate::agents::capability::CapabilityProxy;
use crate::error::HubResult;
use crate::models::MemoryMessage;
use async_trait::async_trait;
use futures_util::stream::{self, Stream};
use std::pin::Pin;

/// Ordered, possibly unbounded sequence of output chunks
pub type ChunkStream = Pin<Box<dyn Stream<Item = HubResult<String>> + Send>>;

/// Everything the model needs for one call
#[derive(Debug, Clone, Default)]
pub struct ModelRequest {
    pub system_prompt: String,
    /// Prior turns, oldest first
    pub history: Vec<MemoryMessage>,
    pub user_message: String,
    pub tools: Vec<CapabilityProxy>,
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: ModelRequest) -> HubResult<String>;

    async fn stream(&self, request: ModelRequest) -> HubResult<ChunkStream>;
}

/// Drop reasoning output: everything up to and including `</think>`
pub fn strip_think(content: &str) -> &str {
    const MARKER: &str = "</think>";
    match content.find(MARKER) {
        Some(idx) => content[idx + MARKER.len()..].trim_start(),
        None => content,
    }
}

/// Offline model that answers with the user's message
pub struct EchoModel;

impl EchoModel {
    fn reply(request: &ModelRequest) -> String {
        format!("echo: {}", request.user_message)
    }
}

#[async_trait]
impl ChatModel for EchoModel {
    fn name(&self) -> &str {
        "echo"
    }

    async fn complete(&self, request: ModelRequest) -> HubResult<String> {
        Ok(Self::reply(&request))
    }

    async fn stream(&self, request: ModelRequest) -> HubResult<ChunkStream> {
        let reply = Self::reply(&request);
        let chunks: Vec<HubResult<String>> = reply
            .split_inclusive(' ')
            .map(|word| Ok(word.to_string()))
            .collect();
        Ok(Box::pin(stream::iter(chunks)))
    }
}
