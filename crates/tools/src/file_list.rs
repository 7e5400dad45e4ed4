//! List files tool — show the project structure.

use async_trait::async_trait;
use appforge_core::error::ToolError;
use appforge_core::tool::names::LIST_FILES;
use appforge_core::tool::{Tool, ToolOutput};

use crate::workspace::Workspace;

pub struct FileListTool {
    workspace: Workspace,
}

impl FileListTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for FileListTool {
    fn name(&self) -> &str {
        LIST_FILES
    }

    fn description(&self) -> &str {
        "List files and directories. Use to understand project structure."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory path (default: '.')"
                },
                "recursive": {
                    "type": "boolean",
                    "description": "List recursively (default: true)"
                }
            }
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let path = arguments["path"].as_str().unwrap_or(".");
        let recursive = arguments["recursive"].as_bool().unwrap_or(true);

        let dir = self
            .workspace
            .resolve(path)
            .map_err(|e| e.into_tool_error(self.name()))?;

        let workspace = self.workspace.clone();
        let entries = tokio::task::spawn_blocking(move || workspace.list(&dir, recursive))
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: LIST_FILES.into(),
                reason: e.to_string(),
            })?
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: LIST_FILES.into(),
                reason: e.to_string(),
            })?;

        if entries.is_empty() {
            return Ok(ToolOutput::text(format!("{path} is empty")));
        }
        Ok(ToolOutput::text(entries.join("\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lists_project_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("index.html"), "").unwrap();
        std::fs::write(dir.path().join("src/main.tsx"), "").unwrap();

        let tool = FileListTool::new(Workspace::new(dir.path()).unwrap());
        let all = tool.execute(serde_json::json!({})).await.unwrap();
        assert_eq!(all, ToolOutput::text("index.html\nsrc/main.tsx"));

        let src = tool
            .execute(serde_json::json!({"path": "src", "recursive": false}))
            .await
            .unwrap();
        assert_eq!(src, ToolOutput::text("src/main.tsx"));
    }

    #[tokio::test]
    async fn empty_project() {
        let dir = tempfile::tempdir().unwrap();
        let tool = FileListTool::new(Workspace::new(dir.path()).unwrap());
        let result = tool.execute(serde_json::json!({"path": "."})).await.unwrap();
        assert_eq!(result, ToolOutput::text(". is empty"));
    }
}
