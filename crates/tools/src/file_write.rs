//! File write tool — create or overwrite a project file.

use async_trait::async_trait;
use appforge_core::error::ToolError;
use appforge_core::tool::names::WRITE_FILE;
use appforge_core::tool::{Tool, ToolOutput};
use tracing::debug;

use crate::workspace::Workspace;

pub struct FileWriteTool {
    workspace: Workspace,
}

impl FileWriteTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for FileWriteTool {
    fn name(&self) -> &str {
        WRITE_FILE
    }

    fn description(&self) -> &str {
        "Create or overwrite a file. Always write COMPLETE file contents. Never use placeholders or \"// rest of code\"."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path relative to project root, e.g. src/pages/Home.tsx"
                },
                "content": {
                    "type": "string",
                    "description": "Complete file content"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let path = arguments["path"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'path' argument".into()))?;

        let content = arguments["content"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'content' argument".into()))?;

        let target = self
            .workspace
            .resolve_entry(path)
            .map_err(|e| e.into_tool_error(self.name()))?;

        let failed = |e: std::io::Error| ToolError::ExecutionFailed {
            tool_name: WRITE_FILE.into(),
            reason: format!("{path}: {e}"),
        };

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(failed)?;
        }
        tokio::fs::write(&target, content).await.map_err(failed)?;

        let lines = content.split('\n').count();
        debug!(path = %path, lines, "Wrote file");
        Ok(ToolOutput::text(format!("Wrote {path} ({lines} lines)")))
    }
}
