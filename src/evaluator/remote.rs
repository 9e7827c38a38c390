//! Remote policy API backend.
//!
//! Posts the normalized request to the policy service and translates the
//! response into the canonical [`Decision`] shape. Failures at this
//! boundary - connection errors, non-2xx statuses, malformed JSON - are
//! converted into `oap.api_error` denials and never thrown past it.

use serde_json::{json, Map, Value};
use tracing::debug;

use crate::decision::{Decision, Reason};
use crate::passport::Passport;

use super::PolicyRef;

/// Path sentinel used when the policy is sent inline in the request body
/// instead of being resolved from the registry
pub const IN_BODY_POLICY_ID: &str = "IN_BODY";

const API_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(15);
const ERROR_BODY_PREVIEW: usize = 200;

fn to_base36(mut n: u128) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize] as char);
        n /= 36;
    }
    out.iter().rev().collect()
}

/// Add an idempotency key when the context has none, so the remote side can
/// deduplicate retried calls. Compact alphanumeric token, bounded at 64
/// chars.
fn ensure_idempotency_key(context: &mut Map<String, Value>) {
    if context.contains_key("idempotency_key") {
        return;
    }
    let millis = chrono::Utc::now().timestamp_millis().max(0) as u128;
    let entropy = uuid::Uuid::new_v4().simple().to_string();
    let mut key = format!("idem_{}_{}", to_base36(millis), &entropy[..8]);
    key.truncate(64);
    context.insert("idempotency_key".to_string(), Value::String(key));
}

/// HTTP client for the policy verification API
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> anyhow::Result<Self> {
        use anyhow::Context;
        let client = reqwest::Client::builder()
            .timeout(API_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// Verify a policy against the remote service.
    ///
    /// Exactly one of `agent_id` (registry-hosted passport) or `passport`
    /// (inline body) must be supplied; the agent id wins when both are
    /// given. Absence of both is an `oap.api_error` denial, not a silent
    /// deny.
    pub async fn verify_policy(
        &self,
        policy: &PolicyRef,
        context: &Value,
        agent_id: Option<&str>,
        passport: Option<&Passport>,
    ) -> Decision {
        if agent_id.is_none() && passport.is_none() {
            return Decision::api_error("Either agent_id or passport required");
        }

        let inline_policy = policy.inline_full();
        let path_id = if inline_policy.is_some() {
            IN_BODY_POLICY_ID
        } else {
            policy.id()
        };

        let mut ctx = context.as_object().cloned().unwrap_or_default();
        ensure_idempotency_key(&mut ctx);
        if let Some(agent_id) = agent_id {
            ctx.insert("agent_id".to_string(), json!(agent_id));
        }
        ctx.insert("policy_id".to_string(), json!(policy.id()));

        let mut body = Map::new();
        body.insert("context".to_string(), Value::Object(ctx));
        if agent_id.is_none() {
            if let Some(passport) = passport {
                match serde_json::to_value(passport) {
                    Ok(value) => {
                        body.insert("passport".to_string(), value);
                    }
                    Err(e) => {
                        return Decision::api_error(format!("Unserializable passport: {e}"))
                    }
                }
            }
        }
        if let Some(pack) = inline_policy {
            body.insert("policy".to_string(), pack.clone());
        }

        let url = format!("{}/api/verify/policy/{}", self.base_url, path_id);
        debug!("Verifying policy {} via {}", policy.id(), url);

        let mut request = self.client.post(&url).json(&Value::Object(body));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return Decision::api_error(format!("API request failed: {e}")),
        };

        let status = response.status();
        let raw = response.text().await.unwrap_or_default();
        if !status.is_success() {
            let preview: String = raw.chars().take(ERROR_BODY_PREVIEW).collect();
            let detail = if preview.is_empty() {
                format!("API {status}")
            } else {
                format!("API {status}: {preview}")
            };
            return Decision::api_error(detail);
        }

        let data: Value = match serde_json::from_str(&raw) {
            Ok(data) => data,
            Err(_) => return Decision::api_error("Invalid JSON response from API"),
        };

        // The service may wrap the decision or return it directly
        let decision_value = match data.get("decision") {
            Some(wrapped) if wrapped.is_object() => wrapped.clone(),
            _ => data,
        };
        let mut decision: Decision = match serde_json::from_value(decision_value) {
            Ok(decision) => decision,
            Err(e) => return Decision::api_error(format!("Malformed decision from API: {e}")),
        };
        if decision.reasons.is_none() {
            decision.reasons = Some(vec![Reason::message_only("API response")]);
        }
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_idempotency_key_shape() {
        let mut ctx = Map::new();
        ensure_idempotency_key(&mut ctx);
        let key = ctx["idempotency_key"].as_str().unwrap();
        assert!(key.starts_with("idem_"));
        assert!(key.len() <= 64);
        assert!(key
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'));
    }

    #[test]
    fn test_existing_idempotency_key_preserved() {
        let mut ctx = Map::new();
        ctx.insert("idempotency_key".to_string(), json!("idem_fixed"));
        ensure_idempotency_key(&mut ctx);
        assert_eq!(ctx["idempotency_key"], "idem_fixed");
    }

    #[test]
    fn test_base36() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }

    #[tokio::test]
    async fn test_missing_identity_is_api_error() {
        let client = ApiClient::new("https://policy.invalid", None).unwrap();
        let decision = client
            .verify_policy(
                &PolicyRef::Id("system.command.execute.v1".to_string()),
                &json!({"command": "ls"}),
                None,
                None,
            )
            .await;
        assert!(!decision.allow);
        assert_eq!(
            decision.reasons.unwrap()[0].code.as_deref(),
            Some(crate::decision::codes::API_ERROR)
        );
    }

    #[tokio::test]
    async fn test_unreachable_host_is_api_error_not_panic() {
        let client = ApiClient::new("http://127.0.0.1:1", None).unwrap();
        let passport = Passport {
            agent_id: Some("ap_00000000000000000000000000000000".to_string()),
            ..Default::default()
        };
        let decision = client
            .verify_policy(
                &PolicyRef::Id("mcp.tool.execute.v1".to_string()),
                &json!({}),
                None,
                Some(&passport),
            )
            .await;
        assert!(!decision.allow);
        assert!(decision.is_error_class());
    }
}
