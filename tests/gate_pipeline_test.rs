//! End-to-end gate pipeline tests: mapping, normalization, guardrail
//! unwrapping, evaluation, and block-reason rendering against a real
//! guardrail script.
#![cfg(unix)]

use passgate::config::{env, Config};
use passgate::{Evaluator, Gate, GateOptions, ToolEvent};
use pretty_assertions::assert_eq;
use serde_json::json;
use serial_test::serial;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

fn clear_passgate_env() {
    for var in [
        env::API_URL,
        env::API_KEY,
        env::FAIL_OPEN_WHEN_MISSING_CONFIG,
        env::PASSPORT_FILE,
        env::GUARDRAIL_SCRIPT,
    ] {
        std::env::remove_var(var);
    }
}

fn write_script(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("guardrail.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Gate over a scratch passport and a script that reports the policy short
/// name it was invoked with
fn echo_gate(dir: &Path) -> (Gate, PathBuf) {
    let script = write_script(
        dir,
        r#"printf '{"allow": true, "reasons": [{"message": "%s"}]}' "$1" > "$PASSGATE_DECISION_FILE""#,
    );
    let passport = dir.join("passport.json");
    std::fs::write(
        &passport,
        "{\"agent_id\": \"ap_0123456789abcdef0123456789abcdef\"}",
    )
    .unwrap();
    let config = Config {
        passport_path: Some(passport.to_string_lossy().into_owned()),
        guardrail_script: Some(script.to_string_lossy().into_owned()),
        ..Default::default()
    };
    (
        Gate::new(Evaluator::with_config(config), GateOptions::default()),
        passport,
    )
}

#[tokio::test]
#[serial]
async fn exec_flows_through_normalizer_and_local_backend() {
    clear_passgate_env();
    let dir = tempfile::tempdir().unwrap();
    let (gate, _) = echo_gate(dir.path());

    // Command nested the way a framework that uses `arguments` reports it
    let outcome = gate
        .check(&ToolEvent::new(
            "exec.run",
            json!({"arguments": {"command": "ls -la"}}),
        ))
        .await;

    match outcome {
        passgate::GateOutcome::Allow { reasons } => {
            assert_eq!(
                reasons[0].message.as_deref(),
                Some("system.command.execute")
            );
        }
        other => panic!("expected allow, got {other:?}"),
    }
}

#[tokio::test]
#[serial]
async fn guardrail_invocation_is_unwrapped_to_inner_tool() {
    clear_passgate_env();
    let dir = tempfile::tempdir().unwrap();
    let (gate, _) = echo_gate(dir.path());

    let outcome = gate
        .check(&ToolEvent::new(
            "exec",
            json!({
                "command": r#"/home/agent/.passgate/skills/passgate-guardrail.sh messaging.message.send '{"to":"x"}'"#
            }),
        ))
        .await;

    match outcome {
        passgate::GateOutcome::Allow { reasons } => {
            // The inner tool's policy was evaluated, not the outer exec
            assert_eq!(
                reasons[0].message.as_deref(),
                Some("messaging.message.send")
            );
        }
        other => panic!("expected allow, got {other:?}"),
    }
}

#[tokio::test]
#[serial]
async fn unparseable_guardrail_payload_evaluates_outer_command() {
    clear_passgate_env();
    let dir = tempfile::tempdir().unwrap();
    let (gate, _) = echo_gate(dir.path());

    let outcome = gate
        .check(&ToolEvent::new(
            "exec",
            json!({"command": "passgate-guardrail messaging.message.send '{\"to\":'"}),
        ))
        .await;

    match outcome {
        passgate::GateOutcome::Allow { reasons } => {
            assert_eq!(
                reasons[0].message.as_deref(),
                Some("system.command.execute")
            );
        }
        other => panic!("expected allow, got {other:?}"),
    }
}

#[tokio::test]
#[serial]
async fn denial_renders_policy_and_remediation() {
    clear_passgate_env();
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        r#"printf '{"allow": false, "reasons": [{"code": "oap.limit_exceeded", "message": "daily cap reached"}]}' > "$PASSGATE_DECISION_FILE""#,
    );
    let passport = dir.path().join("passport.json");
    std::fs::write(&passport, "{\"agent_id\": \"ap_0123456789abcdef0123456789abcdef\"}")
        .unwrap();
    let config = Config {
        passport_path: Some(passport.to_string_lossy().into_owned()),
        guardrail_script: Some(script.to_string_lossy().into_owned()),
        ..Default::default()
    };
    let gate = Gate::new(Evaluator::with_config(config), GateOptions::default());

    let outcome = gate
        .check(&ToolEvent::new("exec", json!({"command": "rm -rf /"})))
        .await;

    let reason_text = outcome.block_reason().expect("expected block");
    assert!(reason_text.contains("system.command.execute.v1"));
    assert!(reason_text.contains("oap.limit_exceeded: daily cap reached"));
    assert!(reason_text.contains(&passport.to_string_lossy().into_owned()));
}

#[tokio::test]
#[serial]
async fn misconfigured_backend_blocks_unless_fail_open_on_error() {
    clear_passgate_env();
    let config = Config {
        passport_path: Some("/nonexistent/passport.json".to_string()),
        guardrail_script: Some("/nonexistent/guardrail.sh".to_string()),
        ..Default::default()
    };

    let gate = Gate::new(
        Evaluator::with_config(config.clone()),
        GateOptions::default(),
    );
    let outcome = gate
        .check(&ToolEvent::new("exec", json!({"command": "ls"})))
        .await;
    assert!(outcome
        .block_reason()
        .expect("expected block")
        .contains("oap.misconfigured"));

    let lenient = Gate::new(
        Evaluator::with_config(config),
        GateOptions {
            fail_open_on_error: true,
            ..Default::default()
        },
    );
    let outcome = lenient
        .check(&ToolEvent::new("exec", json!({"command": "ls"})))
        .await;
    assert!(outcome.is_allowed());
}

#[tokio::test]
#[serial]
async fn backend_policy_denial_is_never_downgraded_by_fail_open() {
    clear_passgate_env();
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        r#"printf '{"allow": false, "reasons": [{"code": "oap.command_not_allowed", "message": "blocked"}]}' > "$PASSGATE_DECISION_FILE""#,
    );
    let passport = dir.path().join("passport.json");
    std::fs::write(&passport, "{}").unwrap();
    let config = Config {
        passport_path: Some(passport.to_string_lossy().into_owned()),
        guardrail_script: Some(script.to_string_lossy().into_owned()),
        ..Default::default()
    };
    let gate = Gate::new(
        Evaluator::with_config(config),
        GateOptions {
            fail_open_on_error: true,
            ..Default::default()
        },
    );

    let outcome = gate
        .check(&ToolEvent::new("exec", json!({"command": "rm"})))
        .await;
    assert!(!outcome.is_allowed());
}

#[test]
#[serial]
fn check_sync_runs_the_same_pipeline() {
    clear_passgate_env();
    let dir = tempfile::tempdir().unwrap();
    let (gate, _) = echo_gate(dir.path());

    let outcome = gate.check_sync(&ToolEvent::new("exec", json!({"command": "ls"})));
    assert!(outcome.is_allowed());

    let outcome = gate.check_sync(&ToolEvent::new("exec", json!({"command": "  "})));
    assert!(outcome.is_allowed());
}
