//! The AppForge orchestration loop.
//!
//! The loop drives a language model through a tool-use cycle for one
//! project session:
//!
//! 1. **Trim** the conversation to the context budget and prepend the
//!    system prompt for the current phase
//! 2. **Stream** a turn from the provider, decoding native tool calls (or
//!    tagged `<tool>` blocks when the model has no native tool use)
//! 3. **Execute** requested tools serially and append their results
//! 4. **Correct** text-only turns with nudges, malformed calls with a retry
//!    request, and search loops with a stop message
//!
//! It stops on `task_complete`, an exhausted nudge or iteration budget,
//! repeated failures, or when a newer invocation supersedes it.

pub mod context;
pub mod loop_runner;
pub mod parser;
pub mod prompts;
pub mod session;

#[cfg(test)]
mod test_helpers;

pub use loop_runner::{AgentLoop, LoopSettings, RunOutcome};
pub use parser::{NativeToolCalls, TaggedParse, parse_tagged_tool_calls};
pub use session::{RunHandle, Session, SessionSnapshot, SessionState};
