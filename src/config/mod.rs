//! Configuration loading and backend-resource resolution.
//!
//! A config is a small key/value document (YAML or JSON) found at an
//! explicit path or discovered along a fixed search order. Loading is
//! side-effect-free and degrades to an empty config on unreadable or
//! malformed input: a broken config file must surface as "backend not
//! resolved" (and the fail-open/fail-closed contract), never as a crash.
//! Environment variables are fallbacks; explicit config values win.

pub mod paths;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use paths::{
    default_passport_path, expand_user, first_existing_default_passport, resolve_symlinks,
    DEFAULT_GUARDRAIL_SCRIPT,
};

/// Environment fallbacks (config file values take precedence)
pub mod env {
    pub const API_URL: &str = "PASSGATE_API_URL";
    pub const API_KEY: &str = "PASSGATE_API_KEY";
    pub const FAIL_OPEN_WHEN_MISSING_CONFIG: &str = "PASSGATE_FAIL_OPEN_WHEN_MISSING_CONFIG";
    pub const PASSPORT_FILE: &str = "PASSGATE_PASSPORT_FILE";
    pub const GUARDRAIL_SCRIPT: &str = "PASSGATE_GUARDRAIL_SCRIPT";
}

/// Default policy API base URL
pub const DEFAULT_API_URL: &str = "https://api.passgate.dev";

/// Which backend evaluates decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationMode {
    #[default]
    Local,
    Api,
}

/// Evaluator configuration, loaded once per [`crate::Evaluator`] instance
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub mode: EvaluationMode,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passport_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guardrail_script: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,

    /// When true, a missing passport/guardrail script returns allow
    /// (legacy). Default false = fail-closed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_open_when_missing_config: Option<bool>,

    /// Unknown keys preserved so round-tripping a config never loses data
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Config {
    /// Load a config file; unreadable or malformed input yields an empty
    /// config
    pub fn load(path: impl AsRef<Path>) -> Config {
        let resolved = expand_user(&path.as_ref().to_string_lossy());
        if !resolved.is_file() {
            return Config::default();
        }
        let raw = match std::fs::read_to_string(&resolved) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Unreadable config file {:?}: {e}", resolved);
                return Config::default();
            }
        };
        let parsed = if resolved.extension().is_some_and(|e| e == "json") {
            serde_json::from_str(&raw).map_err(|e| e.to_string())
        } else {
            serde_yaml_ng::from_str(&raw).map_err(|e| e.to_string())
        };
        match parsed {
            Ok(config) => {
                debug!("Loaded config from {:?}", resolved);
                config
            }
            Err(e) => {
                warn!("Malformed config file {:?}: {e}", resolved);
                Config::default()
            }
        }
    }

    /// API base URL: config, env, then the hosted default
    pub fn api_url(&self) -> String {
        self.api_url
            .clone()
            .or_else(|| std::env::var(env::API_URL).ok())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
    }

    /// API key: config, then env; `None` sends no Authorization header
    pub fn api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(env::API_KEY).ok())
    }

    /// True when the operator explicitly opted into legacy fail-open
    /// behavior for a missing backend (config key, else env override)
    pub fn fail_open_when_missing_config(&self) -> bool {
        match self.fail_open_when_missing_config {
            Some(flag) => flag,
            None => std::env::var(env::FAIL_OPEN_WHEN_MISSING_CONFIG)
                .map(|v| v == "1" || v == "true")
                .unwrap_or(false),
        }
    }
}

/// First existing config file: `./.passgate/config.yaml`,
/// `./.passgate/config.yml`, `~/.passgate/<framework>/config.yaml`,
/// `~/.passgate/config.yaml`
pub fn find_config_path(framework: &str) -> Option<PathBuf> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let candidates = [
        cwd.join(".passgate/config.yaml"),
        cwd.join(".passgate/config.yml"),
        expand_user(&format!("~/.passgate/{framework}/config.yaml")),
        expand_user("~/.passgate/config.yaml"),
    ];
    candidates.into_iter().find(|c| c.is_file())
}

/// Resolve the passport file location.
///
/// An explicit path (config, else env) is returned even when the file does
/// not exist yet - the local script owns that error. Framework and generic
/// defaults must exist to be chosen.
pub fn resolve_passport_path(config: &Config) -> Option<PathBuf> {
    let explicit = config
        .passport_path
        .clone()
        .or_else(|| std::env::var(env::PASSPORT_FILE).ok());
    if let Some(p) = explicit {
        return Some(expand_user(&p));
    }

    if let Some(framework) = config.framework.as_deref() {
        if let Some(candidate) = default_passport_path(framework) {
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    first_existing_default_passport()
}

/// Resolve the local guardrail script.
///
/// An explicit path (config, else env) must exist; otherwise the installed
/// default is tried. The result has symlinks resolved so we execute the
/// actual file, not a swapped symlink.
pub fn resolve_guardrail_script(config: &Config) -> Option<PathBuf> {
    let explicit = config
        .guardrail_script
        .clone()
        .or_else(|| std::env::var(env::GUARDRAIL_SCRIPT).ok());

    let resolved = match explicit {
        Some(script) => {
            let path = expand_user(&script);
            if path.is_file() {
                Some(path)
            } else {
                None
            }
        }
        None => None,
    };

    let resolved = resolved.or_else(|| {
        let default = expand_user(DEFAULT_GUARDRAIL_SCRIPT);
        if default.is_file() {
            Some(default)
        } else {
            None
        }
    })?;

    Some(resolve_symlinks(&resolved))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_load_yaml_config() {
        let mut file = tempfile::Builder::new()
            .suffix(".yaml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            "mode: api\napi_url: https://policy.example.com\nfail_open_when_missing_config: true\ncustom_key: 7"
        )
        .unwrap();

        let config = Config::load(file.path());
        assert_eq!(config.mode, EvaluationMode::Api);
        assert_eq!(config.api_url(), "https://policy.example.com");
        assert!(config.fail_open_when_missing_config());
        assert_eq!(config.extra["custom_key"], 7);
    }

    #[test]
    fn test_load_json_config() {
        let mut file = tempfile::Builder::new()
            .suffix(".json")
            .tempfile()
            .unwrap();
        write!(file, "{{\"mode\": \"local\", \"agent_id\": \"ap_1\"}}").unwrap();

        let config = Config::load(file.path());
        assert_eq!(config.mode, EvaluationMode::Local);
        assert_eq!(config.agent_id.as_deref(), Some("ap_1"));
    }

    #[test]
    fn test_malformed_config_degrades_to_empty() {
        let mut file = tempfile::Builder::new()
            .suffix(".yaml")
            .tempfile()
            .unwrap();
        writeln!(file, "mode: [not, a, mode").unwrap();

        let config = Config::load(file.path());
        assert_eq!(config.mode, EvaluationMode::Local);
        assert!(config.passport_path.is_none());
    }

    #[test]
    fn test_missing_config_is_empty() {
        let config = Config::load("/nonexistent/passgate/config.yaml");
        assert_eq!(config.mode, EvaluationMode::Local);
    }

    #[test]
    fn test_explicit_passport_path_wins_even_if_missing() {
        let config = Config {
            passport_path: Some("/nonexistent/passport.json".to_string()),
            ..Default::default()
        };
        assert_eq!(
            resolve_passport_path(&config),
            Some(PathBuf::from("/nonexistent/passport.json"))
        );
    }

    #[test]
    fn test_explicit_script_must_exist() {
        let config = Config {
            guardrail_script: Some("/nonexistent/guardrail.sh".to_string()),
            ..Default::default()
        };
        // Explicit path missing and no installed default in test homes
        assert_eq!(resolve_guardrail_script(&config), None);
    }

    #[test]
    fn test_existing_script_resolves() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("guardrail.sh");
        std::fs::write(&script, "#!/bin/sh\nexit 0\n").unwrap();

        let config = Config {
            guardrail_script: Some(script.to_string_lossy().into_owned()),
            ..Default::default()
        };
        let resolved = resolve_guardrail_script(&config).unwrap();
        assert!(resolved.is_file());
    }
}
