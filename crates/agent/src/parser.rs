//! Tool-call extraction from model output.
//!
//! Two independent paths produce the same [`MessageToolCall`] shape:
//!
//! - [`NativeToolCalls`] accumulates the transport's streamed tool-call
//!   deltas, keyed by call index, and decodes each call when it closes.
//! - [`parse_tagged_tool_calls`] scans a finished text turn for
//!   `<tool name="...">{json}</tool>` blocks, for models that cannot emit
//!   native tool calls. [`render_tool_instructions`] produces the matching
//!   system-prompt section.
//!
//! A call only leaves either path once its arguments decoded to a JSON
//! object. Anything else is dropped; the native path counts it as malformed
//! so the loop can ask the model to retry.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use appforge_core::message::MessageToolCall;
use appforge_core::provider::ToolDefinition;
use regex_lite::Regex;
use serde_json::Value;
use tracing::{debug, warn};

/// Characters of a rejected payload included in the diagnostic log.
const PREVIEW_CHARS: usize = 100;

static TOOL_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<tool\s+name="([^"]+)">\s*(.*?)\s*</tool>"#)
        .expect("tool block pattern is valid")
});

fn generate_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

fn preview(text: &str) -> String {
    text.chars().take(PREVIEW_CHARS).collect()
}

#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

/// Accumulator for natively streamed tool calls within one turn.
#[derive(Debug, Default)]
pub struct NativeToolCalls {
    open: BTreeMap<usize, PartialCall>,
    finished: Vec<MessageToolCall>,
    malformed: usize,
}

impl NativeToolCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// A call begins at `index`.
    pub fn start(&mut self, index: usize, id: String, name: String) {
        let call = self.open.entry(index).or_default();
        call.id = id;
        if !name.is_empty() {
            call.name = name;
        }
    }

    /// Append name and argument text to the call at `index`. A delta for an
    /// index that never started opens it.
    pub fn delta(&mut self, index: usize, name: Option<&str>, arguments: &str) {
        let call = self.open.entry(index).or_default();
        if let Some(name) = name {
            call.name.push_str(name);
        }
        call.arguments.push_str(arguments);
    }

    /// The call at `index` is complete.
    pub fn end(&mut self, index: usize) {
        if let Some(call) = self.open.remove(&index) {
            self.finalize(call);
        }
    }

    /// Close every call still open (turn completion) and hand back the
    /// decoded calls in completion order.
    pub fn finish(&mut self) -> Vec<MessageToolCall> {
        let open = std::mem::take(&mut self.open);
        for call in open.into_values() {
            self.finalize(call);
        }
        std::mem::take(&mut self.finished)
    }

    /// Whether any call of this turn failed to decode.
    pub fn is_malformed(&self) -> bool {
        self.malformed > 0
    }

    pub fn malformed_count(&self) -> usize {
        self.malformed
    }

    fn finalize(&mut self, call: PartialCall) {
        if call.name.is_empty() {
            warn!(arguments = %preview(&call.arguments), "Dropping tool call without a name");
            self.malformed += 1;
            return;
        }

        let raw = call.arguments.trim();
        let decoded = if raw.is_empty() {
            Ok(Value::Object(serde_json::Map::new()))
        } else {
            serde_json::from_str::<Value>(raw)
        };

        match decoded {
            Ok(arguments @ Value::Object(_)) => {
                let id = if call.id.is_empty() {
                    generate_call_id()
                } else {
                    call.id
                };
                debug!(tool = %call.name, id = %id, "Tool call decoded");
                self.finished
                    .push(MessageToolCall::new(id, call.name, arguments));
            }
            Ok(_) => {
                warn!(tool = %call.name, arguments = %preview(raw), "Tool call arguments are not an object");
                self.malformed += 1;
            }
            Err(e) => {
                warn!(tool = %call.name, error = %e, arguments = %preview(raw), "Malformed tool call arguments");
                self.malformed += 1;
            }
        }
    }
}

/// Result of scanning a text turn for tagged tool calls.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedParse {
    /// The text with every recognized block removed.
    pub text: String,
    pub calls: Vec<MessageToolCall>,
}

/// Extract `<tool name="X">{json}</tool>` blocks in document order.
///
/// Each payload gets one repair attempt (raw control characters inside
/// string literals escaped) before the block is skipped.
pub fn parse_tagged_tool_calls(text: &str) -> TaggedParse {
    let mut calls = Vec::new();

    for caps in TOOL_BLOCK.captures_iter(text) {
        let (Some(name), Some(payload)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let name = name.as_str();
        let payload = payload.as_str().trim();

        match decode_lenient(payload) {
            Some(arguments) => {
                calls.push(MessageToolCall::new(generate_call_id(), name, arguments));
            }
            None => {
                warn!(tool = %name, arguments = %preview(payload), "Failed to parse tagged tool call arguments");
            }
        }
    }

    let remaining = TOOL_BLOCK.replace_all(text, "");
    TaggedParse {
        text: remaining.trim().to_string(),
        calls,
    }
}

fn decode_lenient(payload: &str) -> Option<Value> {
    let decoded = serde_json::from_str::<Value>(payload)
        .or_else(|_| serde_json::from_str::<Value>(&escape_control_chars(payload)))
        .ok()?;
    decoded.is_object().then_some(decoded)
}

/// Escape control characters that appear raw inside JSON string literals.
fn escape_control_chars(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_string = false;
    let mut escaped = false;

    for c in raw.chars() {
        if !in_string {
            if c == '"' {
                in_string = true;
            }
            out.push(c);
            continue;
        }

        if escaped {
            escaped = false;
            out.push(c);
            continue;
        }

        match c {
            '\\' => {
                escaped = true;
                out.push(c);
            }
            '"' => {
                in_string = false;
                out.push(c);
            }
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }

    out
}

/// System-prompt section describing the tagged tool-call format.
pub fn render_tool_instructions(tools: &[ToolDefinition]) -> String {
    let docs = tools
        .iter()
        .map(|t| format!("- {}: {}\n  Parameters: {}", t.name, t.description, t.parameters))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "\n\nIMPORTANT: You must use XML tags to call tools. Format:\n\n\
<tool name=\"tool_name\">\n{{\"param1\": \"value1\", \"param2\": \"value2\"}}\n</tool>\n\n\
You can call multiple tools in one response. Always use valid JSON inside the tags.\n\n\
Available tools:\n{docs}\n"
    )
}
