//! Command tool — run a shell command in the project directory.
//!
//! Long-running dev-server commands are refused (the dev process is managed
//! outside the agent), every command has a timeout, and stderr is fed to the
//! project's error aggregator.

use async_trait::async_trait;
use appforge_core::diagnostics::ErrorAggregator;
use appforge_core::error::ToolError;
use appforge_core::tool::{Tool, ToolOutput};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::workspace::Workspace;

/// What `run_command` is allowed to do.
#[derive(Debug, Clone)]
pub struct CommandPolicy {
    /// Command prefixes that are refused, matched case-insensitively after
    /// collapsing whitespace.
    pub blocked_commands: Vec<String>,
    pub timeout: Duration,
}

impl CommandPolicy {
    pub fn new(blocked_commands: Vec<String>, timeout: Duration) -> Self {
        let blocked_commands = blocked_commands.iter().map(|c| normalize(c)).collect();
        Self {
            blocked_commands,
            timeout,
        }
    }

    fn is_blocked(&self, command: &str) -> bool {
        let normalized = normalize(command);
        self.blocked_commands
            .iter()
            .any(|prefix| !prefix.is_empty() && normalized.starts_with(prefix.as_str()))
    }
}

impl Default for CommandPolicy {
    fn default() -> Self {
        Self::new(Vec::new(), Duration::from_secs(60))
    }
}

fn normalize(command: &str) -> String {
    command
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

pub struct RunCommandTool {
    workspace: Workspace,
    policy: CommandPolicy,
    errors: Arc<ErrorAggregator>,
}

impl RunCommandTool {
    pub fn new(workspace: Workspace, policy: CommandPolicy, errors: Arc<ErrorAggregator>) -> Self {
        Self {
            workspace,
            policy,
            errors,
        }
    }
}

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &str {
        "run_command"
    }

    fn description(&self) -> &str {
        "Run a shell command in the project directory. Use for: npm install, npm run build, npx commands, etc. Returns stdout + stderr."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Shell command to run"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let command = arguments["command"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'command' argument".into()))?
            .trim();

        if command.is_empty() {
            return Err(ToolError::InvalidArguments("'command' must not be empty".into()));
        }

        if self.policy.is_blocked(command) {
            return Err(ToolError::PermissionDenied {
                tool_name: "run_command".into(),
                reason: "the dev server is already running (started automatically). Do not start it yourself. \
Use check_errors() to verify the app."
                    .into(),
            });
        }

        debug!(command = %command, "Executing command");

        let mut cmd = if cfg!(target_os = "windows") {
            let mut cmd = Command::new("cmd");
            cmd.args(["/C", command]);
            cmd
        } else {
            let mut cmd = Command::new("sh");
            cmd.args(["-c", command]);
            cmd
        };
        cmd.current_dir(self.workspace.root()).kill_on_drop(true);

        let output = match tokio::time::timeout(self.policy.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ToolError::ExecutionFailed {
                    tool_name: "run_command".into(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                warn!(command = %command, "Command timed out");
                return Err(ToolError::Timeout {
                    tool_name: "run_command".into(),
                    timeout_secs: self.policy.timeout.as_secs(),
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        for line in stderr.lines() {
            self.errors.record_terminal_line(line);
        }

        let code = output.status.code().unwrap_or(-1);
        if !output.status.success() {
            warn!(command = %command, exit_code = code, "Command failed");
        }

        let combined = match (stdout.trim(), stderr.trim()) {
            (out, "") => out.to_string(),
            ("", err) => err.to_string(),
            (out, err) => format!("{out}\n{err}"),
        };
        Ok(ToolOutput::text(format!("Exit code: {code}\n\n{combined}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(policy: CommandPolicy) -> (tempfile::TempDir, RunCommandTool, Arc<ErrorAggregator>) {
        let dir = tempfile::tempdir().unwrap();
        let errors = Arc::new(ErrorAggregator::new());
        let tool = RunCommandTool::new(Workspace::new(dir.path()).unwrap(), policy, errors.clone());
        (dir, tool, errors)
    }

    #[test]
    fn blocklist_matches_normalized_prefix() {
        let policy = CommandPolicy::new(vec!["npm run dev".into(), "vite".into()], Duration::from_secs(1));
        assert!(policy.is_blocked("npm   run  dev -- --port 3000"));
        assert!(policy.is_blocked("NPM RUN DEV"));
        assert!(policy.is_blocked("vite build"));
        assert!(!policy.is_blocked("npm run build"));
        assert!(!policy.is_blocked("npx tsc --noEmit"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runs_in_project_root() {
        let (dir, tool, _errors) = tool(CommandPolicy::default());
        std::fs::write(dir.path().join("marker.txt"), "").unwrap();
        let out = tool
            .execute(serde_json::json!({"command": "ls"}))
            .await
            .unwrap();
        assert_eq!(out, ToolOutput::text("Exit code: 0\n\nmarker.txt"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_and_stderr_reach_aggregator() {
        let (_dir, tool, errors) = tool(CommandPolicy::default());
        let out = tool
            .execute(serde_json::json!({"command": "echo 'SyntaxError: Unexpected token' >&2; exit 2"}))
            .await
            .unwrap();
        assert_eq!(out, ToolOutput::text("Exit code: 2\n\nSyntaxError: Unexpected token"));
        assert!(errors.has_errors());
    }

    #[tokio::test]
    async fn blocked_command_is_refused() {
        let (_dir, tool, _errors) = tool(CommandPolicy::new(
            vec!["npm run dev".into()],
            Duration::from_secs(5),
        ));
        let result = tool.execute(serde_json::json!({"command": "npm run dev"})).await;
        assert!(matches!(result, Err(ToolError::PermissionDenied { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_command_times_out() {
        let (_dir, tool, _errors) = tool(CommandPolicy::new(Vec::new(), Duration::from_millis(100)));
        let result = tool.execute(serde_json::json!({"command": "sleep 5"})).await;
        assert!(matches!(result, Err(ToolError::Timeout { .. })));
    }
}
