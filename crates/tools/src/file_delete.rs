//! Delete tool — remove a project file or directory tree.

use async_trait::async_trait;
use appforge_core::error::ToolError;
use appforge_core::tool::{Tool, ToolOutput};

use crate::workspace::Workspace;

pub struct FileDeleteTool {
    workspace: Workspace,
}

impl FileDeleteTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for FileDeleteTool {
    fn name(&self) -> &str {
        "delete_file"
    }

    fn description(&self) -> &str {
        "Delete a file or directory."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to delete"
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

        let result = if target.is_dir() {
            tokio::fs::remove_dir_all(&target).await
        } else {
            tokio::fs::remove_file(&target).await
        };

        result.map_err(|e| ToolError::ExecutionFailed {
            tool_name: "delete_file".into(),
            reason: format!("{path}: {e}"),
        })?;
        Ok(ToolOutput::text(format!("Deleted {path}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deletes_files_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("old/nested")).unwrap();
        std::fs::write(dir.path().join("old/nested/a.ts"), "").unwrap();
        std::fs::write(dir.path().join("b.ts"), "").unwrap();

        let tool = FileDeleteTool::new(Workspace::new(dir.path()).unwrap());
        let out = tool.execute(serde_json::json!({"path": "old"})).await.unwrap();
        assert_eq!(out, ToolOutput::text("Deleted old"));
        tool.execute(serde_json::json!({"path": "b.ts"})).await.unwrap();

        assert!(!dir.path().join("old").exists());
        assert!(!dir.path().join("b.ts").exists());
    }

    #[tokio::test]
    async fn refuses_to_delete_project_root() {
        let dir = tempfile::tempdir().unwrap();
        let tool = FileDeleteTool::new(Workspace::new(dir.path()).unwrap());
        let result = tool.execute(serde_json::json!({"path": "."})).await;
        assert!(matches!(result, Err(ToolError::PermissionDenied { .. })));
        assert!(dir.path().exists());
    }
}
