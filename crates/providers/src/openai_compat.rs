//! OpenAI-compatible provider implementation.
//!
//! Works with: OpenAI, OpenRouter, Ollama, vLLM, Together AI, Fireworks AI,
//! and any endpoint exposing a streaming `/chat/completions`.
//!
//! The SSE wire format is turned into [`StreamEvent`]s by [`SseDecoder`],
//! which is pure and tested on its own; the network task only moves bytes.

use appforge_config::AppConfig;
use appforge_core::error::ProviderError;
use appforge_core::message::{Message, MessageContent, Role};
use appforge_core::provider::*;
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        // No overall timeout: a build turn can stream for minutes.
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Create an OpenRouter provider (convenience constructor).
    pub fn openrouter(api_key: impl Into<String>) -> Self {
        Self::new("openrouter", "https://openrouter.ai/api/v1", api_key)
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    /// Create an Ollama provider (convenience constructor).
    pub fn ollama(base_url: Option<&str>) -> Self {
        Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            "", // Ollama doesn't need a key
        )
    }

    /// Create the provider described by `config`.
    ///
    /// Remote endpoints need an API key; local ones (Ollama, vLLM on
    /// localhost) do not.
    pub fn from_config(config: &AppConfig) -> std::result::Result<Self, ProviderError> {
        if !config.has_api_key() && !config.provider.is_local() {
            return Err(ProviderError::NotConfigured(format!(
                "no API key for {}",
                config.provider.base_url
            )));
        }
        Ok(Self::new(
            config.provider.name.clone(),
            config.provider.base_url.clone(),
            config.api_key.clone().unwrap_or_default(),
        ))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.is_empty() {
            builder
        } else {
            builder.header("Authorization", format!("Bearer {}", self.api_key))
        }
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| {
                let content = if m.content.is_empty() && !m.tool_calls.is_empty() {
                    None
                } else {
                    Some(m.content.clone())
                };
                ApiMessage {
                    role: match m.role {
                        Role::User => "user".into(),
                        Role::Assistant => "assistant".into(),
                        Role::System => "system".into(),
                        Role::Tool => "tool".into(),
                    },
                    content,
                    tool_calls: if m.tool_calls.is_empty() {
                        None
                    } else {
                        Some(
                            m.tool_calls
                                .iter()
                                .map(|tc| ApiToolCall {
                                    id: tc.id.clone(),
                                    r#type: "function".into(),
                                    function: ApiFunction {
                                        name: tc.name.clone(),
                                        arguments: tc.arguments_json(),
                                    },
                                })
                                .collect(),
                        )
                    },
                    tool_call_id: m.tool_call_id.clone(),
                }
            })
            .collect()
    }

    /// Convert tool definitions to OpenAI API format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn request_body(request: &ProviderRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": true,
        });

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
            body["tool_choice"] = serde_json::json!("auto");
        }

        body
    }
}

#[async_trait]
impl appforge_core::Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream(
        &self,
        request: ProviderRequest,
        cancel: CancellationToken,
    ) -> std::result::Result<mpsc::Receiver<StreamEvent>, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::request_body(&request);

        debug!(
            provider = %self.name,
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending streaming request"
        );

        let response = self
            .authorized(self.client.post(&url))
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status().as_u16();

        if status == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(5);
            return Err(ProviderError::RateLimited { retry_after_secs });
        }

        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Provider streaming error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let (tx, rx) = mpsc::channel(64);
        let provider_name = self.name.clone();

        // Read the SSE byte stream until [DONE], cancellation, or receiver drop.
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut decoder = SseDecoder::new();

            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => {
                        trace!(provider = %provider_name, "Stream cancelled");
                        return;
                    }
                    next = byte_stream.next() => next,
                };

                let events = match next {
                    Some(Ok(bytes)) => decoder.feed(&bytes),
                    Some(Err(e)) => {
                        warn!(provider = %provider_name, error = %e, "Response stream broke off");
                        let error = ProviderError::StreamInterrupted(e.to_string());
                        let _ = tx
                            .send(StreamEvent::Error {
                                message: error.to_string(),
                            })
                            .await;
                        return;
                    }
                    None => decoder.finish(),
                };

                for event in events {
                    if tx.send(event).await.is_err() {
                        return; // receiver dropped
                    }
                }

                if decoder.is_done() {
                    return;
                }
            }
        });

        Ok(rx)
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(request_error)?;

        Ok(response.status().is_success())
    }
}

fn request_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}

/// Incremental decoder from SSE bytes to [`StreamEvent`]s.
///
/// Tool calls are reported with `ToolCallStart` when a delta carries an
/// `id`, `ToolCallDelta` otherwise, and closed with `ToolCallEnd` on the
/// choice's `finish_reason` or at `[DONE]`, whichever comes first.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    open_calls: BTreeSet<usize>,
    done: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `Done` has been produced; later input is ignored.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed raw bytes; returns the events for every complete line.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();

        while let Some(line_end) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=line_end).collect();
            let line = String::from_utf8_lossy(&line);
            events.extend(self.decode_line(line.trim_end_matches(['\n', '\r'])));
        }

        events
    }

    /// The byte stream ended; flush what is left and close the turn.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest).into_owned();
            events.extend(self.decode_line(line.trim()));
        }
        if !self.done {
            events.extend(self.close_open_calls());
            events.push(StreamEvent::Done);
            self.done = true;
        }
        events
    }

    fn decode_line(&mut self, line: &str) -> Vec<StreamEvent> {
        // Skip empty lines, SSE comments, and non-data fields
        if self.done || line.is_empty() || line.starts_with(':') {
            return Vec::new();
        }
        match line.strip_prefix("data:") {
            Some(data) => self.decode_data(data.trim()),
            None => Vec::new(),
        }
    }

    /// Decode one `data:` payload.
    pub fn decode_data(&mut self, data: &str) -> Vec<StreamEvent> {
        if data == "[DONE]" {
            let mut events = self.close_open_calls();
            events.push(StreamEvent::Done);
            self.done = true;
            return events;
        }

        let chunk: StreamResponse = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                trace!(data = %data, error = %e, "Ignoring unparseable SSE chunk");
                return Vec::new();
            }
        };

        if let Some(error) = chunk.error {
            return vec![StreamEvent::Error {
                message: error.message,
            }];
        }

        let mut events = Vec::new();
        let Some(choice) = chunk.choices.into_iter().next() else {
            return events;
        };

        if let Some(text) = choice.delta.content.filter(|c| !c.is_empty()) {
            events.push(StreamEvent::TextDelta { text });
        }

        for tc in choice.delta.tool_calls.unwrap_or_default() {
            let (name, arguments) = match tc.function {
                Some(f) => (f.name, f.arguments.unwrap_or_default()),
                None => (None, String::new()),
            };

            match tc.id {
                Some(id) if !self.open_calls.contains(&tc.index) => {
                    self.open_calls.insert(tc.index);
                    events.push(StreamEvent::ToolCallStart {
                        index: tc.index,
                        id,
                        name: name.unwrap_or_default(),
                    });
                    if !arguments.is_empty() {
                        events.push(StreamEvent::ToolCallDelta {
                            index: tc.index,
                            name: None,
                            arguments,
                        });
                    }
                }
                _ => {
                    if name.is_some() || !arguments.is_empty() {
                        self.open_calls.insert(tc.index);
                        events.push(StreamEvent::ToolCallDelta {
                            index: tc.index,
                            name,
                            arguments,
                        });
                    }
                }
            }
        }

        if choice.finish_reason.is_some() {
            events.extend(self.close_open_calls());
        }

        events
    }

    fn close_open_calls(&mut self) -> Vec<StreamEvent> {
        std::mem::take(&mut self.open_calls)
            .into_iter()
            .map(|index| StreamEvent::ToolCallEnd { index })
            .collect()
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<MessageContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    /// OpenRouter reports upstream failures mid-stream this way
    #[serde(default)]
    error: Option<StreamErrorBody>,
}

#[derive(Debug, Deserialize)]
struct StreamErrorBody {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

/// A tool call delta — arrives incrementally across chunks.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}
