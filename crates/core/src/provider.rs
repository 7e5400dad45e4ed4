//! Provider trait — the abstraction over the LLM transport.
//!
//! A Provider knows how to send a conversation to an LLM and hand back the
//! response as an ordered stream of [`StreamEvent`]s. The orchestration loop
//! never sees the wire format (SSE, websockets, ...), only these events.
//!
//! Implementations: OpenAI-compatible endpoints (OpenRouter, OpenAI, Together,
//! Fireworks, Ollama, ...), and scripted mocks in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ProviderError;
use crate::message::Message;

/// What the loop needs to know about the active model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// The model to use (e.g., "anthropic/claude-sonnet-4", "qwen3:latest")
    pub model: String,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate per response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,

    /// Whether the model emits native tool-call deltas. When false the loop
    /// switches to the tagged-text fallback format.
    #[serde(default = "default_true")]
    pub supports_tool_use: bool,

    /// Whether image tool results may be sent back to the model.
    #[serde(default)]
    pub supports_vision: bool,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_true() -> bool {
    true
}

impl ModelConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: default_temperature(),
            max_output_tokens: None,
            supports_tool_use: true,
            supports_vision: false,
        }
    }
}

/// One streamed completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use
    pub model: String,

    /// The (already trimmed) conversation view, system prompt first
    pub messages: Vec<Message>,

    /// Temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Available tools the model can call natively. Empty on the fallback path.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
}

impl ProviderRequest {
    /// Build a request for `model` over `messages`.
    pub fn new(model: &ModelConfig, messages: Vec<Message>, tools: Vec<ToolDefinition>) -> Self {
        Self {
            model: model.model.clone(),
            messages,
            temperature: model.temperature,
            max_tokens: model.max_output_tokens,
            tools,
        }
    }
}

/// A tool definition sent to the LLM so it knows what tools it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// A single event of a streamed model turn.
///
/// Tool-call events are keyed by the call's `index` within the turn; the
/// transport guarantees a `ToolCallStart` precedes deltas for an index, but
/// consumers should tolerate a delta for an index they have not seen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Partial text from the model.
    TextDelta { text: String },

    /// A native tool call begins.
    ToolCallStart { index: usize, id: String, name: String },

    /// More of a tool call's name and/or argument text.
    ToolCallDelta {
        index: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default)]
        arguments: String,
    },

    /// The tool call at `index` is complete.
    ToolCallEnd { index: usize },

    /// The transport failed mid-stream.
    Error { message: String },

    /// The turn is complete.
    Done,
}

impl StreamEvent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::TextDelta { text: text.into() }
    }
}

/// The core Provider trait.
///
/// The orchestration loop calls `stream()` without knowing which backend is
/// being used. Returning `Err` means the stream could not be opened; failures
/// after that arrive as [`StreamEvent::Error`]. Implementations should stop
/// producing events once `cancel` fires.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openrouter", "ollama").
    fn name(&self) -> &str;

    /// Send a request and get a stream of response events.
    async fn stream(
        &self,
        request: ProviderRequest,
        cancel: CancellationToken,
    ) -> std::result::Result<mpsc::Receiver<StreamEvent>, ProviderError>;

    /// Health check — can we reach the provider?
    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        Ok(true)
    }
}
