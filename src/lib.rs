//! Passgate - pre-action authorization gate for agentic AI frameworks.
//!
//! Before a tool call executes, the gate maps the framework tool name to a
//! canonical policy id, normalizes the invocation into a policy-checkable
//! context, and produces an allow/deny [`Decision`] from a local guardrail
//! script or a remote policy API, grounded in a passport describing the
//! calling agent's permissions. Default posture is fail-closed.

pub mod config;
pub mod context;
pub mod decision;
pub mod error;
pub mod evaluator;
pub mod gate;
pub mod integrity;
pub mod mapping;
pub mod passport;

pub use decision::{Decision, Reason};
pub use error::{PassgateError, Result};
pub use evaluator::{Evaluator, PolicyRef};
pub use gate::{Gate, GateOptions, GateOutcome, ToolEvent};
pub use passport::{load_passport, Passport};
