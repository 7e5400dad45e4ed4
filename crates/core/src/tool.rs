//! Tool trait — the abstraction over the tool gateway.
//!
//! Tools are what give the agent the ability to act on a project:
//! write and read files, run commands, check errors, signal completion.
//! The orchestration loop only ever talks to the [`ToolRegistry`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use jsonschema::Validator;
use tracing::{debug, warn};

use crate::error::ToolError;
use crate::message::MessageToolCall;
use crate::provider::ToolDefinition;

/// Names of the tools the orchestration loop reacts to.
pub mod names {
    /// A successful call ends the phase after its turn.
    pub const TASK_COMPLETE: &str = "task_complete";
    /// A successful call counts as written output for nudges.
    pub const WRITE_FILE: &str = "write_file";
    /// Feeds the search-loop guard.
    pub const SEARCH_FILES: &str = "search_files";
    /// Feeds the search-loop guard, but only alongside a search.
    pub const LIST_FILES: &str = "list_files";
}

/// The result of a successful tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolOutput {
    /// Plain text, fed back to the model as-is (after truncation).
    Text { text: String },

    /// An image (e.g. a screenshot) as a data URL.
    Image { data_url: String },
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// A short human-readable summary for status displays.
    pub fn summary(&self, max_chars: usize) -> String {
        match self {
            Self::Text { text } => text.chars().take(max_chars).collect(),
            Self::Image { .. } => "[Screenshot]".into(),
        }
    }
}

/// The core Tool trait.
///
/// Each tool (write_file, read_file, run_command, task_complete, ...)
/// implements this trait and is registered in the [`ToolRegistry`].
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "write_file").
    fn name(&self) -> &str;

    /// A one-line description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute the tool with already validated arguments.
    async fn execute(&self, arguments: Value) -> std::result::Result<ToolOutput, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of available tools, keyed by name.
///
/// The agent loop uses this to:
/// 1. Get tool definitions to send to the LLM (sorted by name)
/// 2. Validate arguments against each tool's schema and dispatch calls
///
/// Each schema is compiled once, when the tool is registered.
pub struct ToolRegistry {
    tools: BTreeMap<String, Registered>,
}

struct Registered {
    tool: Box<dyn Tool>,
    schema: Result<Validator, String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    ///
    /// A schema that fails to compile is kept as an error; calls to that
    /// tool are then rejected as invalid instead of dispatched unchecked.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        let schema = jsonschema::validator_for(&tool.parameters_schema()).map_err(|e| {
            warn!(tool = %name, error = %e, "Tool schema failed to compile");
            e.to_string()
        });
        self.tools.insert(name, Registered { tool, schema });
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|r| r.tool.as_ref())
    }

    /// Get all tool definitions (for sending to the LLM).
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|r| r.tool.to_definition()).collect()
    }

    /// Validate and execute a tool call.
    pub async fn execute(
        &self,
        call: &MessageToolCall,
    ) -> std::result::Result<ToolOutput, ToolError> {
        let registered = self
            .tools
            .get(&call.name)
            .ok_or_else(|| ToolError::NotFound(call.name.clone()))?;
        let arguments = without_nulls(&call.arguments);
        let validator = registered.schema.as_ref().map_err(|e| {
            ToolError::InvalidArguments(format!("schema for '{}' is invalid: {e}", call.name))
        })?;
        let violations: Vec<String> = validator
            .iter_errors(&arguments)
            .map(|e| e.to_string())
            .collect();
        if !violations.is_empty() {
            debug!(tool = %call.name, count = violations.len(), "Rejected tool arguments");
            return Err(ToolError::InvalidArguments(violations.join("; ")));
        }
        registered.tool.execute(arguments).await
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Models often send `null` for optional arguments they mean to omit.
fn without_nulls(arguments: &Value) -> Value {
    match arguments {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ),
        other => other.clone(),
    }
}
