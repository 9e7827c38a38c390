//! Exec-context normalization.
//!
//! Host frameworks place "the command" at different nesting levels and
//! under different names. Extraction is an ordered table of candidate
//! fields plus one declared fallback heuristic, and it never fails: an
//! unrecognized shape degrades to an empty command, which the caller
//! treats as a no-op probe rather than a denial.

use serde_json::{Map, Value};

/// Ordered dotted-path candidates checked before the bare-string `input`
const EARLY_COMMAND_FIELDS: &[&str] =
    &["command", "cmd", "arguments.command", "input.command"];

/// Ordered dotted-path candidates checked after the bare-string `input`
const LATE_COMMAND_FIELDS: &[&str] =
    &["args.command", "invocation.command", "payload.command"];

fn lookup_path<'a>(src: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut current: Option<&Value> = None;
    for (i, segment) in path.split('.').enumerate() {
        current = if i == 0 {
            src.get(segment)
        } else {
            current?.get(segment)
        };
    }
    current
}

fn collect_strings<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::String(s) => out.push(s),
        Value::Array(items) => {
            for item in items {
                collect_strings(item, out);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect_strings(item, out);
            }
        }
        _ => {}
    }
}

fn join_args_array(args: &[Value]) -> Option<String> {
    if args.is_empty() {
        return None;
    }
    let parts: Vec<String> = args
        .iter()
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect();
    Some(parts.join(" "))
}

fn extract_command(src: &Map<String, Value>) -> Option<String> {
    for field in EARLY_COMMAND_FIELDS {
        if let Some(Value::String(s)) = lookup_path(src, field) {
            return Some(s.clone());
        }
    }
    if let Some(Value::String(s)) = src.get("input") {
        if !s.trim().is_empty() {
            return Some(s.clone());
        }
    }
    for field in LATE_COMMAND_FIELDS {
        if let Some(Value::String(s)) = lookup_path(src, field) {
            return Some(s.clone());
        }
    }
    if let Some(Value::Array(args)) = src.get("args") {
        if let Some(joined) = join_args_array(args) {
            return Some(joined);
        }
    }
    None
}

/// Fallback heuristic: among every string anywhere in the merged object,
/// prefer the first containing a space (more likely a full command), else
/// the first non-trivial one.
fn heuristic_command(src: &Map<String, Value>) -> Option<String> {
    let mut strings = Vec::new();
    for value in src.values() {
        collect_strings(value, &mut strings);
    }
    let like_command = |s: &&&str| s.len() > 2 && !s.trim().is_empty();
    strings
        .iter()
        .filter(like_command)
        .find(|s| s.contains(' '))
        .or_else(|| strings.iter().find(like_command))
        .map(|s| s.trim().to_string())
}

/// Normalize a command-execution invocation into a policy-checkable context.
///
/// The event and params are merged (params fields win) for extraction, but
/// the returned context is the params object plus the resolved `command`
/// and `full_command` (always set, possibly empty) and a `cwd` aliased
/// from `workdir` when absent.
pub fn normalize_exec_context(params: &Value, event: Option<&Value>) -> Value {
    let mut merged = Map::new();
    if let Some(Value::Object(event_map)) = event {
        merged.extend(event_map.clone());
    }
    if let Some(params_map) = params.as_object() {
        merged.extend(params_map.clone());
    }

    let command = extract_command(&merged)
        .or_else(|| heuristic_command(&merged))
        .unwrap_or_default();

    let mut out = params.as_object().cloned().unwrap_or_default();
    out.insert("command".to_string(), Value::String(command.clone()));
    out.insert("full_command".to_string(), Value::String(command));
    if !out.contains_key("cwd") {
        if let Some(workdir) = out.get("workdir").cloned() {
            out.insert("cwd".to_string(), workdir);
        }
    }
    Value::Object(out)
}
