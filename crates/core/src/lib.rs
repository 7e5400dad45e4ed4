//! # AppForge Core
//!
//! Domain types, traits, and error definitions for the AppForge agent runtime.
//! This crate has **no framework dependencies** beyond tokio's sync
//! primitives. It defines the domain model that every other crate
//! implements against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator of the orchestration loop is a trait here:
//! the LLM transport ([`Provider`]) and the tool gateway ([`Tool`]).
//! Implementations live in their own crates. This enables:
//! - Swapping transports and tool sets via configuration
//! - Easy testing with scripted mock implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod agent;
pub mod diagnostics;
pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use agent::{Mode, Phase};
pub use diagnostics::{BridgeMessage, ErrorAggregator, ErrorSource};
pub use error::{Error, ProviderError, Result, ToolError};
pub use event::{AgentEvent, EventBus, NoticeLevel, ToolCallStatus};
pub use message::{ContentPart, Conversation, ConversationId, Message, MessageContent, MessageToolCall, Role};
pub use provider::{ModelConfig, Provider, ProviderRequest, StreamEvent, ToolDefinition};
pub use tool::{Tool, ToolOutput, ToolRegistry};
