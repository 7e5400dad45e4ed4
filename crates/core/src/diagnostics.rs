//! Error aggregation — the runtime error signal the agent self-corrects from.
//!
//! Three bounded ring buffers collect errors from the project's dev process
//! (terminal), from the preview's console, and from its hot-reload overlay.
//! [`ErrorAggregator::report`] renders them as one text block for the model.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

/// Entries kept per source; the oldest entry is dropped first.
pub const BUFFER_CAPACITY: usize = 50;

/// Returned by [`ErrorAggregator::report`] when nothing is buffered.
pub const CLEAN_REPORT: &str = "No errors detected. App is running clean.";

const ACTION_LINE: &str = "ACTION: Read the file mentioned in the error, find the exact line, \
fix the root cause, and write the corrected file. Then check_errors() again.";

/// Substrings that always mark a terminal line as a real error.
const ALWAYS_ERROR: &[&str] = &[
    "[plugin:",
    "syntaxerror",
    "unexpected token",
    "could not fast refresh",
    "failed to reload",
    "export is incompatible",
    "does not provide an export",
    "is not exported from",
    "pre-transform error",
    "transform failed",
];

/// Substrings of package-manager and runtime chatter.
const NOISE: &[&str] = &[
    "deprecationwarning",
    "experimentalwarning",
    "punycode",
    "npm warn",
    "npm notice",
];

/// Where an error was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSource {
    Terminal,
    Console,
    Overlay,
}

impl ErrorSource {
    fn header(self) -> &'static str {
        match self {
            Self::Terminal => "TERMINAL/COMPILE ERRORS:",
            Self::Console => "BROWSER CONSOLE ERRORS:",
            Self::Overlay => "VITE HMR/OVERLAY ERRORS:",
        }
    }
}

/// A message posted by the sandboxed preview.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BridgeMessage {
    #[serde(rename = "error")]
    Error { message: String },
    #[serde(rename = "hmr-error")]
    HmrError { message: String },
}

#[derive(Debug, Default)]
struct Buffers {
    terminal: VecDeque<String>,
    console: VecDeque<String>,
    overlay: VecDeque<String>,
}

impl Buffers {
    fn get_mut(&mut self, source: ErrorSource) -> &mut VecDeque<String> {
        match source {
            ErrorSource::Terminal => &mut self.terminal,
            ErrorSource::Console => &mut self.console,
            ErrorSource::Overlay => &mut self.overlay,
        }
    }

    fn get(&self, source: ErrorSource) -> &VecDeque<String> {
        match source {
            ErrorSource::Terminal => &self.terminal,
            ErrorSource::Console => &self.console,
            ErrorSource::Overlay => &self.overlay,
        }
    }

    fn is_empty(&self) -> bool {
        self.terminal.is_empty() && self.console.is_empty() && self.overlay.is_empty()
    }
}

/// Collects errors for one project. Shared between the tool gateway (which
/// feeds it) and the orchestrator (which reads it for nudges).
#[derive(Debug)]
pub struct ErrorAggregator {
    capacity: usize,
    buffers: Mutex<Buffers>,
}

impl ErrorAggregator {
    pub fn new() -> Self {
        Self::with_capacity(BUFFER_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            buffers: Mutex::new(Buffers::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Buffers> {
        self.buffers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a line of dev-process output. Returns whether it was kept.
    pub fn record_terminal_line(&self, line: &str) -> bool {
        if is_noise(line) {
            return false;
        }
        self.push(ErrorSource::Terminal, line.trim().to_string());
        true
    }

    /// Record a raw JSON payload from the preview bridge. Unknown message
    /// types are ignored. Returns whether anything was kept.
    pub fn record_bridge_payload(&self, payload: &serde_json::Value) -> bool {
        match serde_json::from_value::<BridgeMessage>(payload.clone()) {
            Ok(message) => self.record_bridge_message(message),
            Err(e) => {
                trace!(error = %e, "Ignoring bridge payload");
                false
            }
        }
    }

    pub fn record_bridge_message(&self, message: BridgeMessage) -> bool {
        let (source, text) = match message {
            BridgeMessage::Error { message } => (ErrorSource::Console, message),
            BridgeMessage::HmrError { message } => (ErrorSource::Overlay, message),
        };
        let text = text.trim();
        if text.is_empty() {
            return false;
        }
        self.push(source, text.to_string());
        true
    }

    fn push(&self, source: ErrorSource, entry: String) {
        let mut buffers = self.lock();
        let buffer = buffers.get_mut(source);
        if buffer.len() == self.capacity {
            buffer.pop_front();
            debug!(?source, capacity = self.capacity, "Error buffer full, dropped oldest entry");
        }
        buffer.push_back(entry);
    }

    pub fn has_errors(&self) -> bool {
        !self.lock().is_empty()
    }

    /// Entries currently buffered for `source`, oldest first.
    pub fn entries(&self, source: ErrorSource) -> Vec<String> {
        self.lock().get(source).iter().cloned().collect()
    }

    /// Render all buffered errors, or [`CLEAN_REPORT`] when there are none.
    pub fn report(&self) -> String {
        let buffers = self.lock();
        if buffers.is_empty() {
            return CLEAN_REPORT.to_string();
        }

        let mut sections = Vec::new();
        for source in [ErrorSource::Terminal, ErrorSource::Console, ErrorSource::Overlay] {
            let buffer = buffers.get(source);
            if buffer.is_empty() {
                continue;
            }
            let lines: Vec<&str> = buffer.iter().map(String::as_str).collect();
            sections.push(format!("{}\n{}", source.header(), lines.join("\n")));
        }
        sections.push(ACTION_LINE.to_string());
        sections.join("\n\n")
    }

    /// Empty every buffer.
    pub fn clear(&self) {
        *self.lock() = Buffers::default();
    }
}

impl Default for ErrorAggregator {
    fn default() -> Self {
        Self::new()
    }
}

/// Two-tier classification: the error allowlist beats the noise denylist.
fn is_noise(line: &str) -> bool {
    let lower = line.trim().to_lowercase();
    if lower.is_empty() {
        return true;
    }
    if ALWAYS_ERROR.iter().any(|marker| lower.contains(marker)) {
        return false;
    }
    if NOISE.iter().any(|marker| lower.contains(marker)) {
        return true;
    }
    lower.contains("warning") && !lower.contains("error")
}
