//! Passport loading - the identity/capability document for a calling agent.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::config::paths::expand_user;

/// Inline agent-id shorthand: `ap_` followed by 32 hex chars
static AGENT_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^ap_[a-f0-9]{32}$").expect("agent id pattern is valid"));

/// Identity document describing what an agent may do and under what limits
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Passport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passport_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,

    /// Policy key -> ruleset limits, evaluated by the policy backend
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub limits: serde_json::Map<String, Value>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Passport {
    /// Treat `passport_id` as the identity key when `agent_id` is absent
    fn derive_agent_id(mut self) -> Self {
        if self.agent_id.is_none() {
            self.agent_id = self.passport_id.clone();
        }
        self
    }
}

/// Outcome of a structural passport check
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// Load a passport from a file path, or accept an inline agent id.
///
/// An input matching the agent-id shape becomes `Passport { agent_id }`
/// without touching the filesystem. An unreadable or malformed file
/// degrades to an empty passport - resolution failures surface later as
/// "backend not resolved", never as a parse crash here.
pub fn load_passport(path_or_agent_id: &str) -> Passport {
    let trimmed = path_or_agent_id.trim();
    if AGENT_ID.is_match(trimmed) {
        return Passport {
            agent_id: Some(trimmed.to_string()),
            ..Default::default()
        };
    }

    let resolved = expand_user(trimmed);
    if !resolved.is_file() {
        return Passport::default();
    }
    match std::fs::read_to_string(&resolved)
        .map_err(|e| e.to_string())
        .and_then(|raw| serde_json::from_str::<Passport>(&raw).map_err(|e| e.to_string()))
    {
        Ok(passport) => passport.derive_agent_id(),
        Err(e) => {
            warn!("Unreadable passport at {:?}: {e}", resolved);
            Passport::default()
        }
    }
}

/// Minimal structural check; full schema validation belongs to the backend
pub fn validate_passport(passport: &Passport) -> ValidationResult {
    if passport.agent_id.is_none() && passport.passport_id.is_none() {
        return ValidationResult {
            valid: false,
            errors: vec!["passport has neither agent_id nor passport_id".to_string()],
        };
    }
    ValidationResult {
        valid: true,
        errors: Vec::new(),
    }
}
