//! Agent phase and mode types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Where a session currently stands in the plan → build → test lifecycle.
///
/// Phase is derived state: the orchestrator moves it in response to the
/// active [`Mode`] and explicit user actions, nothing else writes it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Planning,
    AwaitingApproval,
    Building,
    Testing,
    AwaitingTestApproval,
    Done,
    Error,
}

impl Phase {
    /// Phases in which a loop is actively driving the model.
    pub fn is_working(self) -> bool {
        matches!(self, Self::Planning | Self::Building | Self::Testing)
    }

    /// Phases that wait on an explicit user decision.
    pub fn is_awaiting_user(self) -> bool {
        matches!(self, Self::AwaitingApproval | Self::AwaitingTestApproval)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Planning => "planning",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Building => "building",
            Self::Testing => "testing",
            Self::AwaitingTestApproval => "awaiting_test_approval",
            Self::Done => "done",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// How the next loop invocation should behave.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Produce a plan, then wait for approval.
    Plan,
    /// Go straight to building.
    #[default]
    Build,
    /// QA an existing project.
    Test,
    /// Plan, self-approve, build, then test or pause for test approval.
    Auto,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Plan => "plan",
            Self::Build => "build",
            Self::Test => "test",
            Self::Auto => "auto",
        };
        f.write_str(s)
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "plan" => Ok(Self::Plan),
            "build" => Ok(Self::Build),
            "test" => Ok(Self::Test),
            "auto" => Ok(Self::Auto),
            other => Err(format!(
                "unknown mode '{other}' (expected plan, build, test or auto)"
            )),
        }
    }
}
