//! Completion tool — the model's terminal "I'm done" signal.
//!
//! The tool itself does nothing; the orchestrator watches for calls to it
//! by name and ends the loop after the turn that contains one.

use async_trait::async_trait;
use appforge_core::error::ToolError;
use appforge_core::tool::names::TASK_COMPLETE;
use appforge_core::tool::{Tool, ToolOutput};

pub struct TaskCompleteTool;

#[async_trait]
impl Tool for TaskCompleteTool {
    fn name(&self) -> &str {
        TASK_COMPLETE
    }

    fn description(&self) -> &str {
        "Call this when you have FULLY finished building the application. Only call this after all files are written, \
errors are fixed, and the app is working. Include a brief summary of what was built."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "summary": {
                    "type": "string",
                    "description": "Brief summary of what was built and key features"
                }
            },
            "required": ["summary"]
        })
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        Ok(ToolOutput::text("Task completed successfully."))
    }
}
