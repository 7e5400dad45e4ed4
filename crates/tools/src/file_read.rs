//! File read tool — read a project file.

use async_trait::async_trait;
use appforge_core::error::ToolError;
use appforge_core::tool::{Tool, ToolOutput};

use crate::workspace::Workspace;

pub struct FileReadTool {
    workspace: Workspace,
}

impl FileReadTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file. Use this to check existing code before modifying it."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path to read"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let path = arguments["path"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'path' argument".into()))?;

        let target = self
            .workspace
            .resolve_entry(path)
            .map_err(|e| e.into_tool_error(self.name()))?;

        tokio::fs::read_to_string(&target)
            .await
            .map(ToolOutput::text)
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "read_file".into(),
                reason: format!("{path}: {e}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/App.tsx"), "Hello from test!").unwrap();

        let tool = FileReadTool::new(Workspace::new(dir.path()).unwrap());
        let result = tool
            .execute(serde_json::json!({"path": "src/App.tsx"}))
            .await
            .unwrap();
        assert_eq!(result, ToolOutput::text("Hello from test!"));
    }

    #[tokio::test]
    async fn read_nonexistent_file() {
        let dir = tempfile::tempdir().unwrap();
        let tool = FileReadTool::new(Workspace::new(dir.path()).unwrap());
        let err = tool
            .execute(serde_json::json!({"path": "missing.txt"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing.txt"));
    }
}
