//! The evaluator - stateful orchestrator over the two decision backends.
//!
//! An [`Evaluator`] is an explicit long-lived handle the host constructs
//! once and passes into every call site; there is no process-wide
//! singleton. It loads its configuration once on first use and caches it
//! for its own lifetime - a fresh instance re-resolves configuration.
//!
//! Default posture is fail-closed: when no evaluation backend can be
//! resolved, the call is denied with `oap.misconfigured` unless the
//! operator explicitly opted into legacy fail-open behavior.

pub mod local;
pub mod remote;

use once_cell::sync::OnceCell;
use serde_json::Value;
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::config::{
    self, find_config_path, resolve_guardrail_script, resolve_passport_path, Config,
    EvaluationMode,
};
use crate::decision::Decision;
use crate::mapping::strip_policy_version;
use crate::passport::{load_passport, Passport};

/// A policy reference: a registry-known identifier, or a full inline
/// policy object sent to the API in the request body
#[derive(Debug, Clone)]
pub enum PolicyRef {
    Id(String),
    Inline(Value),
}

impl PolicyRef {
    pub fn id(&self) -> &str {
        match self {
            PolicyRef::Id(id) => id,
            PolicyRef::Inline(pack) => pack.get("id").and_then(Value::as_str).unwrap_or(""),
        }
    }

    /// The inline policy body, when it is a complete pack (has an id and
    /// declares required capabilities); partial objects are treated as
    /// identifiers only
    pub fn inline_full(&self) -> Option<&Value> {
        match self {
            PolicyRef::Inline(pack)
                if !self.id().is_empty() && pack.get("requires_capabilities").is_some() =>
            {
                Some(pack)
            }
            _ => None,
        }
    }
}

/// Orchestrates backend choice and the fail-open/fail-closed contract
pub struct Evaluator {
    config_path: Option<PathBuf>,
    framework: String,
    cached_config: OnceCell<Config>,
}

impl Evaluator {
    /// Create an evaluator that discovers its config on first use
    pub fn new(config_path: Option<PathBuf>, framework: impl Into<String>) -> Self {
        Self {
            config_path,
            framework: framework.into(),
            cached_config: OnceCell::new(),
        }
    }

    /// Create an evaluator with a pre-built configuration (skips discovery)
    pub fn with_config(config: Config) -> Self {
        let cached_config = OnceCell::new();
        let _ = cached_config.set(config);
        Self {
            config_path: None,
            framework: String::new(),
            cached_config,
        }
    }

    /// The cached configuration, loaded once per instance
    pub fn config(&self) -> &Config {
        self.cached_config.get_or_init(|| {
            if let Some(path) = &self.config_path {
                if path.is_file() {
                    return Config::load(path);
                }
            }
            match find_config_path(&self.framework) {
                Some(found) => Config::load(found),
                None => Config::default(),
            }
        })
    }

    /// Passport file the local backend (or API body) would use
    pub fn resolved_passport_path(&self) -> Option<PathBuf> {
        resolve_passport_path(self.config())
    }

    /// Hosted agent id from configuration, if any
    pub fn configured_agent_id(&self) -> Option<String> {
        self.config().agent_id.clone()
    }

    fn load_passport_body(&self, config: &Config) -> Option<Passport> {
        let path = resolve_passport_path(config)?;
        if !path.is_file() {
            return None;
        }
        let passport = load_passport(&path.to_string_lossy());
        // A passport without an identity key cannot be submitted to the API
        if passport.agent_id.is_none() && passport.passport_id.is_none() {
            return None;
        }
        Some(passport)
    }

    /// Evaluate one tool call. Produces a fresh decision every time - never
    /// cached or reused, because the governing passport or policy limits may
    /// have changed between calls.
    pub async fn verify(
        &self,
        passport: &Passport,
        policy: &PolicyRef,
        context: &Value,
    ) -> Decision {
        let config = self.config();

        if config.mode == EvaluationMode::Api {
            // agent_id (config override, else passport) wins over an inline
            // passport body; a hosted identity means the registry resolves
            // the passport
            let agent_id = config
                .agent_id
                .clone()
                .or_else(|| passport.agent_id.clone());
            let passport_body = if agent_id.is_some() {
                None
            } else {
                self.load_passport_body(config)
            };

            if agent_id.is_some() || passport_body.is_some() {
                let client = match remote::ApiClient::new(&config.api_url(), config.api_key()) {
                    Ok(client) => client,
                    Err(e) => return Decision::api_error(format!("{e:#}")),
                };
                return client
                    .verify_policy(policy, context, agent_id.as_deref(), passport_body.as_ref())
                    .await;
            }
            debug!("API mode without agent_id or passport body; trying local backend");
        }

        let passport_path = resolve_passport_path(config);
        let script = resolve_guardrail_script(config);
        let (Some(passport_path), Some(script)) = (passport_path, script) else {
            if config.fail_open_when_missing_config() {
                warn!(
                    "passgate fail-open: no evaluation backend resolved; allowing by \
                     explicit legacy opt-in ({} / config key fail_open_when_missing_config)",
                    config::env::FAIL_OPEN_WHEN_MISSING_CONFIG
                );
                return Decision::allowed();
            }
            return Decision::misconfigured_deny();
        };

        let short_name = match strip_policy_version(policy.id()) {
            "" => "unknown",
            name => name,
        };
        local::run_guardrail(&script, &passport_path, short_name, context).await
    }

    /// Blocking variant of [`verify`](Self::verify) for host integration
    /// points that cannot suspend.
    ///
    /// Runs the identical decision tree on a dedicated worker thread with
    /// its own single-threaded runtime and blocks the caller on its
    /// completion.
    pub fn verify_sync(
        &self,
        passport: &Passport,
        policy: &PolicyRef,
        context: &Value,
    ) -> Decision {
        std::thread::scope(|scope| {
            let worker = scope.spawn(|| {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        return Decision::evaluator_error(format!(
                            "Failed to start verification runtime: {e}"
                        ))
                    }
                };
                runtime.block_on(self.verify(passport, policy, context))
            });
            worker
                .join()
                .unwrap_or_else(|_| Decision::evaluator_error("Verification worker panicked"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_policy_ref_id() {
        let by_id = PolicyRef::Id("system.command.execute.v1".to_string());
        assert_eq!(by_id.id(), "system.command.execute.v1");
        assert!(by_id.inline_full().is_none());

        let partial = PolicyRef::Inline(json!({"id": "x.y.z.v1"}));
        assert_eq!(partial.id(), "x.y.z.v1");
        assert!(partial.inline_full().is_none());

        let full = PolicyRef::Inline(json!({
            "id": "x.y.z.v1",
            "requires_capabilities": ["x.y"]
        }));
        assert!(full.inline_full().is_some());
    }

    #[test]
    fn test_config_cached_per_instance() {
        let mut file = tempfile::Builder::new()
            .suffix(".yaml")
            .tempfile()
            .unwrap();
        writeln!(file, "agent_id: ap_first").unwrap();

        let evaluator = Evaluator::new(Some(file.path().to_path_buf()), "langchain");
        assert_eq!(evaluator.config().agent_id.as_deref(), Some("ap_first"));

        // Rewriting the file does not change this instance's cache
        std::fs::write(file.path(), "agent_id: ap_second\n").unwrap();
        assert_eq!(evaluator.config().agent_id.as_deref(), Some("ap_first"));

        // A fresh instance re-resolves
        let fresh = Evaluator::new(Some(file.path().to_path_buf()), "langchain");
        assert_eq!(fresh.config().agent_id.as_deref(), Some("ap_second"));
    }

    #[test]
    fn test_with_config_skips_discovery() {
        let evaluator = Evaluator::with_config(Config {
            agent_id: Some("ap_inline".to_string()),
            ..Default::default()
        });
        assert_eq!(evaluator.configured_agent_id().as_deref(), Some("ap_inline"));
    }
}
