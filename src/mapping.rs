//! Tool-to-policy mapping - framework tool name to canonical policy id.
//!
//! The mapping is a literal ordered table checked top-to-bottom, first match
//! wins. Narrow rules (exact names) must precede broad ones (prefixes,
//! substrings): a later `git.` prefix rule must not shadow an earlier exact
//! match. The table is data, not control flow, so deployments can override
//! it with a versioned side file loaded once at startup.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::error::{PassgateError, Result};

/// Policy governing shell-command execution; commands mapped here go
/// through context normalization and guardrail-invocation unwrapping.
pub const POLICY_COMMAND_EXECUTE: &str = "system.command.execute.v1";

/// Mapping table schema version accepted by [`PolicyMap::load`]
const SUPPORTED_VERSION: u32 = 1;

/// One ordered rule: any matcher kind hit yields `policy`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MappingRule {
    /// Exact tool names (already lowercase)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exact: Vec<String>,

    /// Tool-name prefixes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prefixes: Vec<String>,

    /// Substrings anywhere in the tool name
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub substrings: Vec<String>,

    /// Canonical policy id this rule maps to
    pub policy: String,
}

impl MappingRule {
    fn matches(&self, tool: &str) -> bool {
        self.exact.iter().any(|e| e == tool)
            || self.prefixes.iter().any(|p| tool.starts_with(p.as_str()))
            || self.substrings.iter().any(|s| tool.contains(s.as_str()))
    }

    fn has_matcher(&self) -> bool {
        !(self.exact.is_empty() && self.prefixes.is_empty() && self.substrings.is_empty())
    }
}

/// Ordered tool-to-policy rule table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyMap {
    #[serde(default = "default_version")]
    pub version: u32,

    pub rules: Vec<MappingRule>,

    /// Fallback policy for unmapped tools; `None` leaves the call to the
    /// caller's unmapped-tool policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

fn default_version() -> u32 {
    SUPPORTED_VERSION
}

fn rule(
    exact: &[&str],
    prefixes: &[&str],
    substrings: &[&str],
    policy: &str,
) -> MappingRule {
    MappingRule {
        exact: exact.iter().map(|s| s.to_string()).collect(),
        prefixes: prefixes.iter().map(|s| s.to_string()).collect(),
        substrings: substrings.iter().map(|s| s.to_string()).collect(),
        policy: policy.to_string(),
    }
}

static BUILT_IN: Lazy<PolicyMap> = Lazy::new(|| PolicyMap {
    version: SUPPORTED_VERSION,
    rules: vec![
        // Git / repository operations: exact PR/merge variants before the
        // broad git. prefix
        rule(
            &["git.create_pr", "git.merge", "git.push", "git.commit"],
            &[],
            &[],
            "code.repository.merge.v1",
        ),
        rule(&[], &["git."], &[], "code.repository.merge.v1"),
        // Shell / system command execution
        rule(
            &["exec", "bash", "shell", "command"],
            &["exec.", "system.command."],
            &[],
            POLICY_COMMAND_EXECUTE,
        ),
        // Messaging
        rule(
            &[],
            &["message.", "messaging."],
            &["sms", "whatsapp", "slack", "email"],
            "messaging.message.send.v1",
        ),
        // MCP tools
        rule(&[], &["mcp."], &[], "mcp.tool.execute.v1"),
        // Agent sessions
        rule(
            &[],
            &["session."],
            &["agent.session", "session.create"],
            "agent.session.create.v1",
        ),
        // Tool registration
        rule(
            &[],
            &[],
            &["agent.tool", "tool.register"],
            "agent.tool.register.v1",
        ),
        // Financial operations: refund before charge before the broad
        // finance. prefix
        rule(
            &[],
            &[],
            &["payment.refund", "refund"],
            "finance.payment.refund.v1",
        ),
        rule(
            &[],
            &[],
            &["payment.charge", "charge"],
            "finance.payment.charge.v1",
        ),
        rule(&[], &["finance."], &[], "finance.payment.refund.v1"),
        // Data operations
        rule(
            &[],
            &[],
            &[
                "database.write",
                "database.insert",
                "database.update",
                "database.delete",
                "data.export",
                "export",
            ],
            "data.export.create.v1",
        ),
    ],
    default: None,
});

impl PolicyMap {
    /// The built-in rule table
    pub fn built_in() -> &'static PolicyMap {
        &BUILT_IN
    }

    /// Load a mapping table from a YAML or JSON side file.
    ///
    /// Validated eagerly so a malformed table fails at load time, not
    /// per-request.
    pub fn load(path: impl AsRef<Path>) -> Result<PolicyMap> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let map: PolicyMap = if path.extension().is_some_and(|e| e == "json") {
            serde_json::from_str(&raw)?
        } else {
            serde_yaml_ng::from_str(&raw)?
        };
        map.validate()?;
        debug!(
            "Loaded tool-policy mapping from {:?} ({} rules)",
            path,
            map.rules.len()
        );
        Ok(map)
    }

    fn validate(&self) -> Result<()> {
        if self.version != SUPPORTED_VERSION {
            return Err(PassgateError::Mapping(format!(
                "unsupported mapping table version {} (expected {})",
                self.version, SUPPORTED_VERSION
            )));
        }
        for (i, rule) in self.rules.iter().enumerate() {
            if rule.policy.trim().is_empty() {
                return Err(PassgateError::Mapping(format!(
                    "rule {i} has an empty policy id"
                )));
            }
            if !rule.has_matcher() {
                return Err(PassgateError::Mapping(format!(
                    "rule {i} ({}) has no exact/prefix/substring matchers",
                    rule.policy
                )));
            }
        }
        Ok(())
    }

    /// Map a framework tool name to a canonical policy id.
    ///
    /// Case-insensitive; pure; safe to call concurrently. Returns `None`
    /// when no rule matches and the table declares no default.
    pub fn map(&self, tool_name: &str) -> Option<&str> {
        let tool = tool_name.trim().to_lowercase();
        for rule in &self.rules {
            if rule.matches(&tool) {
                return Some(rule.policy.as_str());
            }
        }
        self.default.as_deref()
    }
}

static VERSION_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\.v\d+$").expect("version suffix pattern is valid")
});

/// Strip the `.vN` major-version suffix from a policy id.
///
/// The local guardrail script is addressed by the short name.
pub fn strip_policy_version(policy_id: &str) -> &str {
    match VERSION_SUFFIX.find(policy_id) {
        Some(m) => &policy_id[..m.start()],
        None => policy_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_map_is_case_insensitive() {
        let map = PolicyMap::built_in();
        assert_eq!(map.map("EXEC.RUN"), map.map("exec.run"));
        assert_eq!(map.map("Bash"), Some(POLICY_COMMAND_EXECUTE));
    }

    #[test]
    fn test_unmapped_returns_none_and_is_idempotent() {
        let map = PolicyMap::built_in();
        assert_eq!(map.map("browser.open"), None);
        assert_eq!(map.map("browser.open"), None);
    }

    #[test]
    fn test_narrow_rules_win_over_broad() {
        let map = PolicyMap::built_in();
        // Both hit code.repository.merge.v1 today, but via different rules;
        // the exact rule must match first so a future split stays correct.
        assert_eq!(map.map("git.create_pr"), Some("code.repository.merge.v1"));
        assert_eq!(map.map("git.clone"), Some("code.repository.merge.v1"));
    }

    #[test]
    fn test_domain_coverage() {
        let map = PolicyMap::built_in();
        assert_eq!(map.map("exec"), Some(POLICY_COMMAND_EXECUTE));
        assert_eq!(map.map("system.command.run"), Some(POLICY_COMMAND_EXECUTE));
        assert_eq!(
            map.map("messaging.message.send"),
            Some("messaging.message.send.v1")
        );
        assert_eq!(map.map("send_slack_update"), Some("messaging.message.send.v1"));
        assert_eq!(map.map("mcp.github.search"), Some("mcp.tool.execute.v1"));
        assert_eq!(map.map("session.create"), Some("agent.session.create.v1"));
        assert_eq!(map.map("tool.register"), Some("agent.tool.register.v1"));
        assert_eq!(map.map("payment.refund"), Some("finance.payment.refund.v1"));
        assert_eq!(map.map("stripe_charge"), Some("finance.payment.charge.v1"));
        assert_eq!(map.map("data.export"), Some("data.export.create.v1"));
    }

    #[test]
    fn test_strip_policy_version() {
        assert_eq!(
            strip_policy_version("system.command.execute.v1"),
            "system.command.execute"
        );
        assert_eq!(
            strip_policy_version("system.command.execute"),
            "system.command.execute"
        );
        assert_eq!(strip_policy_version("x.v12"), "x");
    }

    #[test]
    fn test_side_file_round_trip_and_validation() {
        let table = r#"
version: 1
rules:
  - exact: ["deploy"]
    policy: infra.deploy.apply.v1
default: system.command.execute.v1
"#;
        let map: PolicyMap = serde_yaml_ng::from_str(table).unwrap();
        map.validate().unwrap();
        assert_eq!(map.map("deploy"), Some("infra.deploy.apply.v1"));
        assert_eq!(map.map("unknown"), Some(POLICY_COMMAND_EXECUTE));

        let bad: PolicyMap = serde_yaml_ng::from_str(
            "version: 2\nrules:\n  - exact: [x]\n    policy: p.v1\n",
        )
        .unwrap();
        assert!(bad.validate().is_err());

        let no_matcher: PolicyMap =
            serde_yaml_ng::from_str("version: 1\nrules:\n  - policy: p.v1\n").unwrap();
        assert!(no_matcher.validate().is_err());
    }
}
