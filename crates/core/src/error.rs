//! Error enums shared across the workspace.
//!
//! Transport and tool failures never reach the caller of a loop
//! invocation: the loop retries the former and reports the latter back to
//! the model. [`Error`] is what the session API itself can refuse.

use thiserror::Error;

use crate::agent::Phase;

/// A session action that cannot be taken right now.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// An approval (or skip) arrived while the session was elsewhere.
    #[error("cannot {action} while the session is {phase}")]
    InvalidState { action: &'static str, phase: Phase },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Transport-level failures. Every variant is treated as transient by the
/// orchestration loop and retried with backoff up to its error cap.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The response started but its byte stream broke off.
    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    /// No key for a remote endpoint. Raised before any request is made.
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Tool-level failures. These never abort a turn: the loop reports them back
/// to the model as the failing call's result.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Permission denied: {tool_name}: {reason}")]
    PermissionDenied { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_state_names_the_action_and_phase() {
        let err = Error::InvalidState {
            action: "approve a plan",
            phase: Phase::Building,
        };
        assert_eq!(err.to_string(), "cannot approve a plan while the session is building");
    }

    #[test]
    fn tool_errors_read_as_results() {
        let err = ToolError::PermissionDenied {
            tool_name: "run_command".into(),
            reason: "dev server already running".into(),
        };
        assert_eq!(
            err.to_string(),
            "Permission denied: run_command: dev server already running"
        );
    }
}
