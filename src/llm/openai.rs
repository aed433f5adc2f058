// OpenAI-compatible chat completions client

use super::{strip_think, ChatModel, ChunkStream, ModelRequest};
use crate::agents::capability::CapabilityProxy;
use crate::error::{HubError, HubResult};
use crate::models::MemoryRole;
use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Upper bound on model/tool round trips for one request
const MAX_TOOL_ROUNDS: usize = 5;

pub struct OpenAiChatModel {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: Option<f32>,
}

impl OpenAiChatModel {
    pub fn new(base_url: &str, model: &str, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
            temperature: None,
        }
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn build_messages(request: &ModelRequest) -> Vec<Value> {
        let mut messages = Vec::with_capacity(request.history.len() + 2);
        if !request.system_prompt.is_empty() {
            messages.push(json!({ "role": "system", "content": request.system_prompt }));
        }
        for turn in &request.history {
            let role = match turn.role {
                MemoryRole::User => "user",
                MemoryRole::Assistant => "assistant",
            };
            messages.push(json!({ "role": role, "content": turn.content }));
        }
        messages.push(json!({ "role": "user", "content": request.user_message }));
        messages
    }

    async fn tool_specs(tools: &[CapabilityProxy]) -> HubResult<Vec<Value>> {
        let mut specs = Vec::with_capacity(tools.len());
        for tool in tools {
            let descriptor = tool.descriptor().await?;
            specs.push(json!({
                "type": "function",
                "function": {
                    "name": descriptor.name,
                    "description": descriptor.description,
                    "parameters": descriptor.parameters,
                }
            }));
        }
        Ok(specs)
    }

    async fn post(&self, body: &Value) -> HubResult<reqwest::Response> {
        let mut builder = self.client.post(self.endpoint()).json(body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| HubError::Model(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(HubError::Model(format!("API error {}: {}", status, text)));
        }
        Ok(response)
    }

    fn body(&self, messages: &[Value], tools: &[Value], stream: bool) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": stream,
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.to_vec());
        }
        if let Some(t) = self.temperature {
            body["temperature"] = json!(t);
        }
        body
    }

    /// Run the request to a final answer, executing tool calls on the way
    async fn run_with_tools(&self, request: &ModelRequest) -> HubResult<String> {
        let specs = Self::tool_specs(&request.tools).await?;
        let mut messages = Self::build_messages(request);

        for round in 0..MAX_TOOL_ROUNDS {
            let response = self.post(&self.body(&messages, &specs, false)).await?;
            let payload: Value = response
                .json()
                .await
                .map_err(|e| HubError::Model(format!("Invalid response body: {}", e)))?;

            let message = payload
                .pointer("/choices/0/message")
                .cloned()
                .ok_or_else(|| HubError::Model("Response has no choices".to_string()))?;

            let calls = message
                .get("tool_calls")
                .and_then(|c| c.as_array())
                .cloned()
                .unwrap_or_default();

            if calls.is_empty() {
                let content = message
                    .get("content")
                    .and_then(|c| c.as_str())
                    .unwrap_or_default();
                return Ok(content.to_string());
            }

            log::debug!("[Model] round {} requested {} tool call(s)", round + 1, calls.len());
            messages.push(message);
            for call in calls {
                let id = call.get("id").and_then(|v| v.as_str()).unwrap_or_default();
                let name = call
                    .pointer("/function/name")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                let args = call
                    .pointer("/function/arguments")
                    .and_then(|v| v.as_str())
                    .and_then(|s| serde_json::from_str::<Value>(s).ok())
                    .unwrap_or_else(|| json!({}));

                let output = match request.tools.iter().find(|t| t.name() == name) {
                    Some(tool) => match tool.invoke(args).await {
                        Ok(Value::String(s)) => s,
                        Ok(other) => other.to_string(),
                        Err(e) => format!("error: {}", e),
                    },
                    None => format!("error: unknown tool {}", name),
                };
                messages.push(json!({ "role": "tool", "tool_call_id": id, "content": output }));
            }
        }

        Err(HubError::Model(format!(
            "Exceeded {} tool call rounds",
            MAX_TOOL_ROUNDS
        )))
    }
}

/// One parsed line of an SSE completion stream
#[derive(Debug, PartialEq)]
enum SseLine {
    Delta(String),
    Done,
    Skip,
}

/// Splits raw body bytes into lines. Bytes are only decoded once a whole
/// line is in, so multibyte characters cut across network chunks survive.
#[derive(Default)]
struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }
}

fn parse_sse_line(line: &str) -> SseLine {
    let Some(data) = line.trim().strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return SseLine::Done;
    }
    match serde_json::from_str::<Value>(data) {
        Ok(json) => match json.pointer("/choices/0/delta/content").and_then(|c| c.as_str()) {
            Some(text) if !text.is_empty() => SseLine::Delta(text.to_string()),
            _ => SseLine::Skip,
        },
        Err(_) => SseLine::Skip,
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: ModelRequest) -> HubResult<String> {
        let answer = self.run_with_tools(&request).await?;
        Ok(strip_think(&answer).to_string())
    }

    async fn stream(&self, request: ModelRequest) -> HubResult<ChunkStream> {
        // Tool calls need whole responses, so tool-enabled streams emit the
        // final answer as a single chunk
        if !request.tools.is_empty() {
            let answer = self.complete(request).await?;
            return Ok(Box::pin(stream::once(async move { Ok(answer) })));
        }

        let messages = Self::build_messages(&request);
        let response = self.post(&self.body(&messages, &[], true)).await?;
        let mut bytes = response.bytes_stream();
        let (tx, rx) = mpsc::unbounded_channel::<HubResult<String>>();

        tokio::spawn(async move {
            let mut buffer = SseLineBuffer::default();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx.send(Err(HubError::Model(format!("Stream error: {}", e))));
                        return;
                    }
                };
                for line in buffer.push(&chunk) {
                    match parse_sse_line(&line) {
                        SseLine::Delta(text) => {
                            if tx.send(Ok(text)).is_err() {
                                return;
                            }
                        }
                        SseLine::Done => return,
                        SseLine::Skip => {}
                    }
                }
            }
        });

        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MemoryMessage;

    #[test]
    fn test_parse_sse_line() {
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"content":"Hi"}}]}"#),
            SseLine::Delta("Hi".into())
        );
        assert_eq!(parse_sse_line("data: [DONE]"), SseLine::Done);
        assert_eq!(parse_sse_line(": keep-alive"), SseLine::Skip);
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#),
            SseLine::Skip
        );
    }

    #[test]
    fn test_line_buffer_keeps_split_multibyte_chars() {
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"你好\"}}]}\n";
        let bytes = line.as_bytes();
        let cut = line.find('你').unwrap() + 1;

        let mut buffer = SseLineBuffer::default();
        assert!(buffer.push(&bytes[..cut]).is_empty());
        let lines = buffer.push(&bytes[cut..]);
        assert_eq!(lines.len(), 1);
        assert_eq!(parse_sse_line(&lines[0]), SseLine::Delta("你好".into()));
    }

    #[test]
    fn test_line_buffer_holds_partial_line() {
        let mut buffer = SseLineBuffer::default();
        let lines = buffer.push(b"data: [DONE]\ndata: {");
        assert_eq!(lines, vec!["data: [DONE]\n".to_string()]);
        assert_eq!(buffer.pending, b"data: {".to_vec());
    }

    #[test]
    fn test_build_messages_order() {
        let request = ModelRequest {
            system_prompt: "sys".into(),
            history: vec![
                MemoryMessage::new("c", MemoryRole::User, "q1"),
                MemoryMessage::new("c", MemoryRole::Assistant, "a1"),
            ],
            user_message: "q2".into(),
            tools: Vec::new(),
        };
        let messages = OpenAiChatModel::build_messages(&request);
        let roles: Vec<_> = messages.iter().map(|m| m["role"].as_str().unwrap()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        assert_eq!(messages[3]["content"], "q2");
    }

    #[test]
    fn test_body_includes_optional_fields() {
        let model = OpenAiChatModel::new("http://localhost:8000/v1/", "m", None)
            .with_temperature(Some(0.2));
        assert_eq!(model.endpoint(), "http://localhost:8000/v1/chat/completions");
        let body = model.body(&[], &[json!({ "type": "function" })], true);
        assert_eq!(body["stream"], true);
        assert!(body["tools"].is_array());
        assert!(body.get("temperature").is_some());
    }
}
