//! Built-in tool gateway for AppForge.
//!
//! Tools give the agent the ability to work on one project directory:
//! read/write/list/delete files, search them, run commands, check the
//! aggregated runtime errors, and signal completion.
//!
//! Every tool is scoped to a [`Workspace`]; paths outside the project root
//! are refused.

pub mod check_errors;
pub mod file_delete;
pub mod file_list;
pub mod file_read;
pub mod file_write;
pub mod run_command;
pub mod search;
pub mod task_complete;
pub mod workspace;

use appforge_core::diagnostics::ErrorAggregator;
use appforge_core::tool::ToolRegistry;
use std::sync::Arc;

pub use run_command::CommandPolicy;
pub use workspace::{PathError, Workspace};

/// Create the default tool registry for one project.
///
/// `errors` is the same aggregator the orchestrator reads for nudges;
/// `run_command` feeds stderr into it and `check_errors` reports from it.
pub fn default_registry(
    workspace: Workspace,
    errors: Arc<ErrorAggregator>,
    policy: CommandPolicy,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(file_write::FileWriteTool::new(workspace.clone())));
    registry.register(Box::new(file_read::FileReadTool::new(workspace.clone())));
    registry.register(Box::new(file_list::FileListTool::new(workspace.clone())));
    registry.register(Box::new(file_delete::FileDeleteTool::new(workspace.clone())));
    registry.register(Box::new(search::SearchFilesTool::new(workspace.clone())));
    registry.register(Box::new(run_command::RunCommandTool::new(
        workspace,
        policy,
        errors.clone(),
    )));
    registry.register(Box::new(check_errors::CheckErrorsTool::new(errors)));
    registry.register(Box::new(task_complete::TaskCompleteTool));
    registry
}
