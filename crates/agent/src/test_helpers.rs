//! Shared test helpers: a scripted transport and mock tools.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use appforge_core::error::{ProviderError, ToolError};
use appforge_core::provider::{Provider, ProviderRequest, StreamEvent};
use appforge_core::tool::{Tool, ToolOutput, ToolRegistry};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

static NEXT_CALL_ID: AtomicUsize = AtomicUsize::new(1);

/// What the provider does for one `stream` call.
pub enum Script {
    /// Deliver these events, then close the stream.
    Events(Vec<StreamEvent>),
    /// Refuse to open the stream.
    Fail(ProviderError),
    /// Deliver these events, then keep the stream open until cancelled.
    Stall(Vec<StreamEvent>),
}

/// A turn that streams `text` and finishes.
pub fn text_turn(text: &str) -> Script {
    Script::Events(vec![StreamEvent::text(text), StreamEvent::Done])
}

/// A turn that requests the given native tool calls.
pub fn tool_turn(calls: &[(&str, Value)]) -> Script {
    let mut events = Vec::new();
    for (index, (name, arguments)) in calls.iter().enumerate() {
        let id = format!("call_{}", NEXT_CALL_ID.fetch_add(1, Ordering::Relaxed));
        events.push(StreamEvent::ToolCallStart {
            index,
            id,
            name: (*name).to_string(),
        });
        events.push(StreamEvent::ToolCallDelta {
            index,
            name: None,
            arguments: arguments.to_string(),
        });
        events.push(StreamEvent::ToolCallEnd { index });
    }
    events.push(StreamEvent::Done);
    Script::Events(events)
}

/// A mock provider that plays back scripted turns and records requests.
///
/// Panics if more calls are made than scripts provided.
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Text of the last message of request `n`.
    pub fn last_message_of(&self, n: usize) -> String {
        let requests = self.requests.lock().unwrap();
        requests[n].messages.last().unwrap().text()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream(
        &self,
        request: ProviderRequest,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<StreamEvent>, ProviderError> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len()
        };
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("ScriptedProvider: no script for call #{call}"));

        match script {
            Script::Fail(error) => Err(error),
            Script::Events(events) => {
                let (tx, rx) = mpsc::channel(events.len().max(1));
                for event in events {
                    tx.try_send(event).unwrap();
                }
                Ok(rx)
            }
            Script::Stall(events) => {
                let (tx, rx) = mpsc::channel(events.len() + 1);
                for event in events {
                    tx.try_send(event).unwrap();
                }
                tokio::spawn(async move {
                    cancel.cancelled().await;
                    drop(tx);
                });
                Ok(rx)
            }
        }
    }
}

enum Behavior {
    Text(String),
    Fail(String),
    Image(String),
}

/// A tool that records its calls and answers with a fixed result.
pub struct MockTool {
    name: String,
    behavior: Behavior,
    calls: Arc<Mutex<Vec<Value>>>,
}

impl MockTool {
    pub fn text(name: &str, output: &str) -> Self {
        Self::with(name, Behavior::Text(output.to_string()))
    }

    pub fn failing(name: &str, reason: &str) -> Self {
        Self::with(name, Behavior::Fail(reason.to_string()))
    }

    pub fn image(name: &str) -> Self {
        Self::with(name, Behavior::Image("data:image/png;base64,iVBORw0KGgo=".into()))
    }

    fn with(name: &str, behavior: Behavior) -> Self {
        Self {
            name: name.to_string(),
            behavior,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Shared log of the arguments this tool was called with.
    pub fn calls(&self) -> Arc<Mutex<Vec<Value>>> {
        self.calls.clone()
    }
}

#[async_trait::async_trait]
impl Tool for MockTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Mock tool for testing"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, arguments: Value) -> Result<ToolOutput, ToolError> {
        self.calls.lock().unwrap().push(arguments);
        match &self.behavior {
            Behavior::Text(text) => Ok(ToolOutput::text(text.clone())),
            Behavior::Image(data_url) => Ok(ToolOutput::Image {
                data_url: data_url.clone(),
            }),
            Behavior::Fail(reason) => Err(ToolError::ExecutionFailed {
                tool_name: self.name.clone(),
                reason: reason.clone(),
            }),
        }
    }
}

/// The orchestrator-relevant tool set, all mocked.
pub fn mock_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(MockTool::text("write_file", "Wrote file")));
    registry.register(Box::new(MockTool::text("read_file", "file contents")));
    registry.register(Box::new(MockTool::text("list_files", "src/App.tsx")));
    registry.register(Box::new(MockTool::text("search_files", "src/App.tsx:1: match")));
    registry.register(Box::new(MockTool::text("check_errors", "No errors detected. App is running clean.")));
    registry.register(Box::new(MockTool::text("task_complete", "Task completed successfully.")));
    registry
}
