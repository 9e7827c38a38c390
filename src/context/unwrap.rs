//! Detection of re-entrant guardrail invocations.
//!
//! Some frameworks run this guardrail itself as a shell subprocess with the
//! convention `<guardrail-binary> <innerToolName> '<json-context>'`. When
//! the outer evaluation also checks the raw shell command, it would judge
//! "run the guardrail binary" instead of the inner action the invocation is
//! actually gating. Detection is conservative: anything that does not match
//! the single fixed grammar is evaluated as the outer command, as written.

use serde_json::Value;
use tracing::debug;

/// Marker identifying the guardrail binary inside a command string
pub const GUARDRAIL_MARKER: &str = "passgate-guardrail";

/// A detected inner invocation: the tool actually being gated and its
/// JSON context
#[derive(Debug, Clone, PartialEq)]
pub struct GuardrailInvocation {
    pub inner_tool: String,
    pub inner_context: Value,
}

/// Parse `<guardrail-binary> <tool> '<json>'` out of a shell command.
///
/// Returns `None` (evaluate the outer command) when the marker is absent,
/// the command does not tokenize, trailing tokens follow the payload, or
/// the payload is not valid JSON. A missing payload means an empty context.
/// Exactly one grammar is recognized; nested quoting and chained
/// invocations are out of scope.
pub fn parse_guardrail_invocation(command: &str) -> Option<GuardrailInvocation> {
    if !command.contains(GUARDRAIL_MARKER) {
        return None;
    }

    let tokens = shell_words::split(command).ok()?;
    let marker_idx = tokens.iter().position(|t| t.contains(GUARDRAIL_MARKER))?;

    let inner_tool = tokens.get(marker_idx + 1)?.clone();
    if inner_tool.starts_with('-') {
        return None;
    }

    // Grammar is exactly <binary> <tool> ['<json>']; anything further is
    // not an invocation we understand
    if tokens.len() > marker_idx + 3 {
        return None;
    }

    let inner_context = match tokens.get(marker_idx + 2) {
        Some(payload) if !payload.trim().is_empty() => {
            serde_json::from_str(payload.trim()).ok()?
        }
        _ => Value::Object(serde_json::Map::new()),
    };
    if !inner_context.is_object() {
        return None;
    }

    debug!("Unwrapped guardrail invocation for inner tool {inner_tool}");
    Some(GuardrailInvocation {
        inner_tool,
        inner_context,
    })
}
