//! The gate - full pre-tool-call pipeline.
//!
//! Wires the mapper, normalizer, unwrapper and evaluator into the single
//! check a host framework runs before every tool execution:
//!
//! tool event -> policy id -> normalized context -> (unwrap re-entrant
//! guardrail invocations) -> evaluator -> allow, or deny with a rendered
//! explanation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::context::{normalize_exec_context, parse_guardrail_invocation};
use crate::decision::Reason;
use crate::evaluator::{Evaluator, PolicyRef};
use crate::mapping::{PolicyMap, POLICY_COMMAND_EXECUTE};
use crate::passport::Passport;

/// A tool invocation as reported by the host framework
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolEvent {
    pub tool_name: String,

    /// Tool parameters; may nest arbitrarily, any field may be absent
    #[serde(default)]
    pub params: Value,

    /// Raw framework event fields beyond the params payload
    #[serde(default)]
    pub extras: Value,
}

impl ToolEvent {
    pub fn new(tool_name: impl Into<String>, params: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            params,
            extras: Value::Null,
        }
    }
}

/// Host-facing gate behavior switches
#[derive(Debug, Clone)]
pub struct GateOptions {
    /// Allow tools with no policy mapping (custom skills etc.); false
    /// blocks them (strict mode)
    pub allow_unmapped_tools: bool,

    /// Escape hatch: allow the call when evaluation itself fails
    /// (misconfiguration, backend error). A backend's explicit policy
    /// denial is always honored regardless of this flag.
    pub fail_open_on_error: bool,

    /// Map the bare `exec` tool to the command-execution policy
    pub map_exec_to_policy: bool,
}

impl Default for GateOptions {
    fn default() -> Self {
        Self {
            allow_unmapped_tools: true,
            fail_open_on_error: false,
            map_exec_to_policy: true,
        }
    }
}

/// Outcome handed back to the host framework
#[derive(Debug, Clone)]
pub enum GateOutcome {
    Allow {
        reasons: Vec<Reason>,
    },
    Block {
        /// Rendered multi-line explanation for the user
        reason_text: String,
        reasons: Vec<Reason>,
    },
}

impl GateOutcome {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GateOutcome::Allow { .. })
    }

    pub fn block_reason(&self) -> Option<&str> {
        match self {
            GateOutcome::Block { reason_text, .. } => Some(reason_text),
            GateOutcome::Allow { .. } => None,
        }
    }
}

/// Long-lived pre-action authorization gate.
///
/// Construct one per host integration and reuse it across calls; the
/// evaluator inside owns the config cache.
pub struct Gate {
    evaluator: Evaluator,
    mapping: PolicyMap,
    passport: Passport,
    options: GateOptions,
}

impl Gate {
    pub fn new(evaluator: Evaluator, options: GateOptions) -> Self {
        Self {
            evaluator,
            mapping: PolicyMap::built_in().clone(),
            passport: Passport::default(),
            options,
        }
    }

    /// Use a passport loaded by the host instead of an empty one
    pub fn with_passport(mut self, passport: Passport) -> Self {
        self.passport = passport;
        self
    }

    /// Override the built-in tool-to-policy table
    pub fn with_mapping(mut self, mapping: PolicyMap) -> Self {
        self.mapping = mapping;
        self
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    /// Check one tool call; never fails, never panics across the boundary.
    pub async fn check(&self, event: &ToolEvent) -> GateOutcome {
        let tool_name = event.tool_name.as_str();

        let policy_id = if tool_name.eq_ignore_ascii_case("exec")
            && !self.options.map_exec_to_policy
        {
            None
        } else {
            self.mapping.map(tool_name).map(str::to_string)
        };

        let Some(policy_id) = policy_id else {
            if self.options.allow_unmapped_tools {
                debug!("ALLOW {tool_name}: unmapped, no policy");
                return GateOutcome::Allow { reasons: vec![] };
            }
            let reason_text = format!(
                "Tool \"{tool_name}\" has no policy mapping; unmapped tools are \
                 blocked. Set allow_unmapped_tools to permit custom tools."
            );
            warn!("BLOCK {tool_name}: no policy mapping");
            return GateOutcome::Block {
                reasons: vec![Reason::message_only(&reason_text)],
                reason_text,
            };
        };

        debug!("Checking tool {tool_name} -> policy {policy_id}");

        let mut effective_policy = policy_id;
        let mut effective_tool = tool_name.to_string();
        let mut context = if effective_policy == POLICY_COMMAND_EXECUTE {
            normalize_exec_context(&event.params, Some(&event.extras))
        } else {
            event.params.clone()
        };

        // A shell command that is itself a guardrail invocation gates an
        // inner tool; evaluate that tool instead of "run the guardrail
        // binary". One unwrap only.
        if effective_policy == POLICY_COMMAND_EXECUTE {
            let command = context
                .get("command")
                .and_then(Value::as_str)
                .map(str::to_string);
            if let Some(command) = command {
                if let Some(invocation) = parse_guardrail_invocation(&command) {
                    if let Some(inner_policy) = self.mapping.map(&invocation.inner_tool) {
                        let inner_policy = inner_policy.to_string();
                        debug!(
                            "exec delegates to inner tool {} -> policy {}",
                            invocation.inner_tool, inner_policy
                        );
                        context = if inner_policy == POLICY_COMMAND_EXECUTE {
                            normalize_exec_context(&invocation.inner_context, None)
                        } else {
                            invocation.inner_context
                        };
                        effective_tool = invocation.inner_tool;
                        effective_policy = inner_policy;
                    }
                }
            }
        }

        // Empty command after normalization is a harmless probe, not a
        // denial: skip evaluation entirely
        if effective_policy == POLICY_COMMAND_EXECUTE {
            let command = context.get("command").and_then(Value::as_str).unwrap_or("");
            if command.trim().is_empty() {
                debug!("ALLOW {effective_tool}: empty command, skip evaluation");
                return GateOutcome::Allow { reasons: vec![] };
            }
        }

        if let Some(map) = context.as_object_mut() {
            map.entry("tool")
                .or_insert_with(|| Value::String(effective_tool.clone()));
        }

        let decision = self
            .evaluator
            .verify(
                &self.passport,
                &PolicyRef::Id(effective_policy.clone()),
                &context,
            )
            .await;

        if decision.allow {
            debug!("ALLOW {effective_tool}");
            return GateOutcome::Allow {
                reasons: decision.reasons.unwrap_or_default(),
            };
        }

        if self.options.fail_open_on_error && decision.is_error_class() {
            warn!(
                "passgate fail-open-on-error: allowing {effective_tool} despite \
                 evaluation failure: {}",
                decision.primary_message().unwrap_or("unknown error")
            );
            return GateOutcome::Allow {
                reasons: decision.reasons.unwrap_or_default(),
            };
        }

        warn!(
            "BLOCK {effective_tool}: {}",
            decision.primary_message().unwrap_or("Policy denied")
        );
        let reason_text =
            decision.render_block_reason(&effective_policy, &self.remediation_hint());
        GateOutcome::Block {
            reason_text,
            reasons: decision.reasons.unwrap_or_default(),
        }
    }

    /// Blocking variant of [`check`](Self::check) for hosts whose
    /// extension point cannot suspend
    pub fn check_sync(&self, event: &ToolEvent) -> GateOutcome {
        std::thread::scope(|scope| {
            let worker = scope.spawn(|| {
                match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime.block_on(self.check(event)),
                    Err(e) => {
                        let reason_text = format!("Failed to start gate runtime: {e}");
                        GateOutcome::Block {
                            reasons: vec![Reason::message_only(&reason_text)],
                            reason_text,
                        }
                    }
                }
            });
            worker.join().unwrap_or_else(|_| {
                let reason_text = "Gate worker panicked".to_string();
                GateOutcome::Block {
                    reasons: vec![Reason::message_only(&reason_text)],
                    reason_text,
                }
            })
        })
    }

    fn remediation_hint(&self) -> String {
        if let Some(agent_id) = self.evaluator.configured_agent_id() {
            return format!(
                "update limits at the policy registry (hosted passport: {agent_id})"
            );
        }
        match self.evaluator.resolved_passport_path() {
            Some(path) => format!("update limits in your passport: {}", path.display()),
            None => "configure a passport for this agent".to_string(),
        }
    }
}
