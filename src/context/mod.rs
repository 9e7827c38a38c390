//! Invocation-context handling for command-execution policies.
//!
//! [`normalize`] flattens heterogeneous framework event shapes into a
//! policy-checkable context; [`unwrap`] detects re-entrant invocations of
//! the guardrail itself inside a shell command.

pub mod normalize;
pub mod unwrap;

pub use normalize::normalize_exec_context;
pub use unwrap::{parse_guardrail_invocation, GuardrailInvocation, GUARDRAIL_MARKER};
