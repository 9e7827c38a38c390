//! Decision types - the allow/deny verdict returned for every tool call.
//!
//! A [`Decision`] is produced fresh for each call and never cached: the
//! governing passport or policy limits may change between calls. Unknown
//! fields from a backend are preserved via the flattened `extra` map so
//! integrity hashing sees the full object the backend wrote.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reason codes used for gate-internal failures (OAP convention).
///
/// Backend-native codes (e.g. `oap.command_not_allowed`) are passed through
/// verbatim and never reinterpreted.
pub mod codes {
    /// No reachable evaluation backend and fail-open not requested.
    pub const MISCONFIGURED: &str = "oap.misconfigured";
    /// Local backend ran but failed or timed out.
    pub const EVALUATOR_ERROR: &str = "oap.evaluator_error";
    /// Remote backend unreachable, non-2xx, or malformed response.
    pub const API_ERROR: &str = "oap.api_error";
}

/// A single structured reason attached to a decision
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Reason {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Reason {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: Some(message.into()),
        }
    }

    /// Reason with a message only (backend-native reasons often omit codes)
    pub fn message_only(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: Some(message.into()),
        }
    }
}

/// The outcome of evaluating a policy against a passport and a context
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Decision {
    #[serde(default)]
    pub allow: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasons: Option<Vec<Reason>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_id: Option<String>,

    /// Tamper-evidence digest (`sha256:<hex>`) over the canonicalized
    /// remainder of the decision object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,

    /// Chain link to the previously persisted decision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_decision_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_content_hash: Option<String>,

    /// Backend-specific fields preserved for audit and integrity hashing
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Decision {
    /// Unconditional allow with no reasons
    pub fn allowed() -> Self {
        Self {
            allow: true,
            ..Default::default()
        }
    }

    /// Deny with a single coded reason
    pub fn deny(code: &str, message: impl Into<String>) -> Self {
        Self {
            allow: false,
            reasons: Some(vec![Reason::new(code, message)]),
            ..Default::default()
        }
    }

    /// The fixed deny returned when no evaluation backend is reachable.
    ///
    /// Carries `oap.misconfigured` so callers can distinguish "denied by
    /// policy" from "could not evaluate policy".
    pub fn misconfigured_deny() -> Self {
        Self::deny(
            codes::MISCONFIGURED,
            "Passport or guardrail script not found; deny by default. \
             Set fail_open_when_missing_config in config or \
             PASSGATE_FAIL_OPEN_WHEN_MISSING_CONFIG=1 for legacy allow.",
        )
    }

    pub fn evaluator_error(message: impl Into<String>) -> Self {
        Self::deny(codes::EVALUATOR_ERROR, message)
    }

    pub fn api_error(message: impl Into<String>) -> Self {
        Self::deny(codes::API_ERROR, message)
    }

    /// First reason message, if any
    pub fn primary_message(&self) -> Option<&str> {
        self.reasons
            .as_ref()
            .and_then(|rs| rs.first())
            .and_then(|r| r.message.as_deref())
    }

    /// True when the denial is a gate-internal failure (misconfiguration,
    /// evaluator error, API error) rather than a backend policy verdict
    pub fn is_error_class(&self) -> bool {
        let error_codes = [
            codes::MISCONFIGURED,
            codes::EVALUATOR_ERROR,
            codes::API_ERROR,
        ];
        self.reasons
            .as_ref()
            .and_then(|rs| rs.first())
            .and_then(|r| r.code.as_deref())
            .is_some_and(|c| error_codes.contains(&c))
    }

    /// Render a multi-line, human-readable denial for the host framework.
    ///
    /// `remediation` names where the operator can change limits (hosted
    /// passport id or local passport path).
    pub fn render_block_reason(&self, policy_id: &str, remediation: &str) -> String {
        let reason_lines = self
            .reasons
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|r| {
                format!(
                    "  - {}: {}",
                    r.code.as_deref().unwrap_or("oap.unknown"),
                    r.message.as_deref().unwrap_or("")
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let reason_block = if reason_lines.is_empty() {
            format!(
                "  - {}",
                self.primary_message().unwrap_or("Policy denied")
            )
        } else {
            reason_lines
        };

        format!(
            "passgate: policy denied\n\nPolicy: {policy_id}\n\nReasons (OAP codes):\n{reason_block}\n\nTo allow this action, {remediation}"
        )
    }
}
