//! Search tool — grep-like substring search across project files.

use async_trait::async_trait;
use appforge_core::error::ToolError;
use appforge_core::tool::names::SEARCH_FILES;
use appforge_core::tool::{Tool, ToolOutput};

use crate::workspace::Workspace;

/// Matching lines reported at most.
const MAX_MATCHES: usize = 500;

pub struct SearchFilesTool {
    workspace: Workspace,
}

impl SearchFilesTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for SearchFilesTool {
    fn name(&self) -> &str {
        SEARCH_FILES
    }

    fn description(&self) -> &str {
        "Search for a text pattern across all project files. Like grep. WARNING: Do not call this more than 2 times in a row. \
If you already searched and found the file, READ it with read_file and FIX it with write_file instead of searching again."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Text to search for"
                },
                "filePattern": {
                    "type": "string",
                    "description": "Glob pattern for files to search, e.g. '*.tsx' (default: all files)"
                }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let pattern = arguments["pattern"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'pattern' argument".into()))?
            .to_string();
        if pattern.is_empty() {
            return Err(ToolError::InvalidArguments("'pattern' must not be empty".into()));
        }

        let file_filter = match arguments["filePattern"].as_str() {
            Some(glob) => Some(glob::Pattern::new(glob).map_err(|e| {
                ToolError::InvalidArguments(format!("invalid filePattern '{glob}': {e}"))
            })?),
            None => None,
        };

        let workspace = self.workspace.clone();
        let needle = pattern.clone();
        let matches = tokio::task::spawn_blocking(move || {
            search(&workspace, &needle, file_filter.as_ref())
        })
        .await
        .map_err(|e| ToolError::ExecutionFailed {
            tool_name: SEARCH_FILES.into(),
            reason: e.to_string(),
        })?
        .map_err(|e| ToolError::ExecutionFailed {
            tool_name: SEARCH_FILES.into(),
            reason: e.to_string(),
        })?;

        if matches.is_empty() {
            return Ok(ToolOutput::text(format!("No matches found for \"{pattern}\"")));
        }
        Ok(ToolOutput::text(matches.join("\n")))
    }
}

fn search(
    workspace: &Workspace,
    needle: &str,
    file_filter: Option<&glob::Pattern>,
) -> std::io::Result<Vec<String>> {
    let mut matches = Vec::new();

    for rel in workspace.list(workspace.root(), true)? {
        if let Some(filter) = file_filter {
            let file_name = rel.rsplit('/').next().unwrap_or(&rel);
            if !filter.matches(&rel) && !filter.matches(file_name) {
                continue;
            }
        }

        // Binary and unreadable files are skipped.
        let Ok(content) = std::fs::read_to_string(workspace.root().join(&rel)) else {
            continue;
        };

        for (idx, line) in content.lines().enumerate() {
            if line.contains(needle) {
                matches.push(format!("{rel}:{}: {}", idx + 1, line.trim()));
                if matches.len() >= MAX_MATCHES {
                    return Ok(matches);
                }
            }
        }
    }

    Ok(matches)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project() -> (tempfile::TempDir, SearchFilesTool) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(
            dir.path().join("src/App.tsx"),
            "import { useState } from 'react';\n  const [todos, setTodos] = useState([]);\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("src/todo.css"), ".todos { color: red }\n").unwrap();
        let tool = SearchFilesTool::new(Workspace::new(dir.path()).unwrap());
        (dir, tool)
    }

    #[tokio::test]
    async fn reports_path_line_and_text() {
        let (_dir, tool) = project();
        let out = tool
            .execute(serde_json::json!({"pattern": "useState("}))
            .await
            .unwrap();
        assert_eq!(
            out,
            ToolOutput::text("src/App.tsx:2: const [todos, setTodos] = useState([]);")
        );
    }

    #[tokio::test]
    async fn file_pattern_filters_by_extension() {
        let (_dir, tool) = project();
        let out = tool
            .execute(serde_json::json!({"pattern": "todos", "filePattern": "*.css"}))
            .await
            .unwrap();
        assert_eq!(out, ToolOutput::text("src/todo.css:1: .todos { color: red }"));
    }

    #[tokio::test]
    async fn no_matches_message() {
        let (_dir, tool) = project();
        let out = tool
            .execute(serde_json::json!({"pattern": "useReducer"}))
            .await
            .unwrap();
        assert_eq!(out, ToolOutput::text("No matches found for \"useReducer\""));
    }
}
