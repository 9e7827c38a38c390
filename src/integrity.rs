//! Tamper-evidence for persisted decisions.
//!
//! Decisions written by the local guardrail script carry a `content_hash`
//! over a canonical serialization of the rest of the object, and may chain
//! to the previous decision via `prev_decision_id`/`prev_content_hash`.
//! Verification here is advisory: it runs after the allow/deny result has
//! already been returned and only produces a warning signal, so a corrupted
//! audit record can never block or delay a tool call.

use serde_json::Value;
use sha2::{Digest, Sha256};

const CONTENT_HASH_FIELD: &str = "content_hash";

/// Deterministic JSON serialization: object keys sorted lexicographically at
/// every nesting level, arrays in order, primitives as standard JSON
/// literals.
///
/// This must byte-match the convention of whatever produced the original
/// hash, or verification will spuriously fail.
pub fn canonicalize(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let parts: Vec<String> = keys
                .iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        Value::String((*k).clone()),
                        canonicalize(&map[*k])
                    )
                })
                .collect();
            format!("{{{}}}", parts.join(","))
        }
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(canonicalize).collect();
            format!("[{}]", parts.join(","))
        }
        // Null, bool, number, string all serialize as compact JSON literals
        other => other.to_string(),
    }
}

/// SHA-256 over the canonical form, in the `sha256:<hex>` digest format
pub fn content_hash(value: &Value) -> String {
    let canonical = canonicalize(value);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// Check a persisted decision against its own `content_hash`.
///
/// A decision without a `content_hash` is legacy/unsigned and passes - a
/// compatibility shim, not a security guarantee. Any mismatch (wrong hash,
/// or any field altered after hashing) fails.
pub fn verify_integrity(decision: &Value) -> bool {
    let Some(stored) = decision.get(CONTENT_HASH_FIELD).and_then(Value::as_str) else {
        return true;
    };

    let mut rest = decision.clone();
    if let Some(map) = rest.as_object_mut() {
        map.remove(CONTENT_HASH_FIELD);
    }
    content_hash(&rest) == stored
}

/// Compute and insert `content_hash` over the rest of the object.
///
/// No-op for non-object values.
pub fn seal(decision: &mut Value) {
    let Some(map) = decision.as_object_mut() else {
        return;
    };
    map.remove(CONTENT_HASH_FIELD);
    let hash = content_hash(decision);
    if let Some(map) = decision.as_object_mut() {
        map.insert(CONTENT_HASH_FIELD.to_string(), Value::String(hash));
    }
}

/// True when `next` chains to `prev` in the append-only audit sequence:
/// its `prev_decision_id`/`prev_content_hash` match `prev`'s own
/// `decision_id`/`content_hash`. Advisory, like [`verify_integrity`].
pub fn chain_links(prev: &Value, next: &Value) -> bool {
    let id_links = match (
        next.get("prev_decision_id").and_then(Value::as_str),
        prev.get("decision_id").and_then(Value::as_str),
    ) {
        (Some(claimed), Some(actual)) => claimed == actual,
        (None, _) => true,
        (Some(_), None) => false,
    };
    let hash_links = match (
        next.get("prev_content_hash").and_then(Value::as_str),
        prev.get(CONTENT_HASH_FIELD).and_then(Value::as_str),
    ) {
        (Some(claimed), Some(actual)) => claimed == actual,
        (None, _) => true,
        (Some(_), None) => false,
    };
    id_links && hash_links
}
