//! Local guardrail-script backend.
//!
//! Invokes the operator-installed guardrail script as a subprocess and
//! reads the decision it writes. Every invocation gets its own decision
//! file so concurrent tool calls never race on the same output - a hard
//! invariant, not an optimization. The subprocess wait is bounded by a
//! timeout; a misbehaving script becomes a denial, never a hang.

use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::env::PASSPORT_FILE;
use crate::decision::{Decision, Reason};
use crate::integrity;

/// Decision-output path handed to the script
pub const DECISION_FILE_ENV: &str = "PASSGATE_DECISION_FILE";
/// Append-only audit log path handed to the script
pub const AUDIT_LOG_ENV: &str = "PASSGATE_AUDIT_LOG";

const GUARDRAIL_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-process counter so two invocations in the same millisecond still
/// get distinct decision files
static INVOCATION_SEQ: AtomicU64 = AtomicU64::new(0);

fn unique_decision_path(decisions_dir: &Path) -> PathBuf {
    let seq = INVOCATION_SEQ.fetch_add(1, Ordering::Relaxed);
    let millis = chrono::Utc::now().timestamp_millis();
    let pid = std::process::id();
    decisions_dir.join(format!("decision-{pid}-{millis}-{seq}.json"))
}

fn remove_decision_file(path: &Path) {
    // Best-effort cleanup; failure to delete is not itself an error
    let _ = std::fs::remove_file(path);
}

/// Tamper check runs off the critical path: the decision has already been
/// returned to the caller by the time this fires, so a corrupted audit
/// record only produces a warning signal, never a block or a delay.
fn schedule_integrity_check(raw: Value) {
    std::thread::spawn(move || {
        if !integrity::verify_integrity(&raw) {
            let decision_id = raw
                .get("decision_id")
                .and_then(Value::as_str)
                .unwrap_or("<unknown>");
            warn!(
                "Decision {decision_id} failed integrity verification; \
                 the persisted record may have been tampered with"
            );
        }
    });
}

/// Run the guardrail script for one tool call and return its decision.
pub(crate) async fn run_guardrail(
    script: &Path,
    passport_path: &Path,
    policy_short_name: &str,
    context: &Value,
) -> Decision {
    run_guardrail_with_timeout(script, passport_path, policy_short_name, context, GUARDRAIL_TIMEOUT)
        .await
}

async fn run_guardrail_with_timeout(
    script: &Path,
    passport_path: &Path,
    policy_short_name: &str,
    context: &Value,
    timeout: Duration,
) -> Decision {
    let data_dir = passport_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();

    let decisions_dir = data_dir.join("decisions");
    let decisions_dir = match tokio::fs::create_dir_all(&decisions_dir).await {
        Ok(()) => decisions_dir,
        // Fall back to the passport directory itself when the subdirectory
        // cannot be created
        Err(e) => {
            warn!("Cannot create {:?}: {e}; using passport directory", decisions_dir);
            data_dir.clone()
        }
    };
    let decision_path = unique_decision_path(&decisions_dir);

    let context_json = match serde_json::to_string(context) {
        Ok(json) => json,
        Err(e) => return Decision::evaluator_error(format!("Unserializable context: {e}")),
    };

    debug!(
        "Running guardrail {:?} for policy {policy_short_name} (decision file {:?})",
        script, decision_path
    );

    let spawned = Command::new(script)
        .arg(policy_short_name)
        .arg(&context_json)
        .env(PASSPORT_FILE, passport_path)
        .env(DECISION_FILE_ENV, &decision_path)
        .env(AUDIT_LOG_ENV, data_dir.join("audit.log"))
        .current_dir(&data_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();

    let child = match spawned {
        Ok(child) => child,
        Err(e) => {
            return Decision::evaluator_error(format!("Failed to run guardrail script: {e}"))
        }
    };

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Err(_) => {
            remove_decision_file(&decision_path);
            return Decision::evaluator_error(format!(
                "Guardrail script timed out after {}s",
                timeout.as_secs()
            ));
        }
        Ok(Err(e)) => {
            remove_decision_file(&decision_path);
            return Decision::evaluator_error(format!(
                "Failed to wait for guardrail script: {e}"
            ));
        }
        Ok(Ok(output)) => output,
    };

    let raw: Option<Value> = std::fs::read_to_string(&decision_path)
        .ok()
        .and_then(|data| serde_json::from_str(&data).ok())
        .filter(Value::is_object);
    remove_decision_file(&decision_path);

    if let Some(raw) = raw {
        if let Ok(mut decision) = serde_json::from_value::<Decision>(raw.clone()) {
            schedule_integrity_check(raw);
            if !decision.allow && decision.reasons.is_none() {
                decision.reasons =
                    Some(vec![Reason::message_only("Policy evaluation failed")]);
            }
            return decision;
        }
        // Malformed decision: fall through to the exit-code fallback
    }

    if output.status.success() {
        return Decision::allowed();
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let detail = if stderr.trim().is_empty() {
        match output.status.code() {
            Some(code) => format!("Guardrail script exit {code}"),
            None => "Guardrail script terminated by signal".to_string(),
        }
    } else {
        stderr.trim().to_string()
    };
    Decision::evaluator_error(detail)
}
