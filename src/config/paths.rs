//! Path helpers shared by config, passport, and evaluator resolution.

use std::path::{Path, PathBuf};

/// Default passport locations, per host framework plus a generic fallback.
/// Resolution checks the configured framework's entry first, then every
/// entry in order.
pub const DEFAULT_PASSPORT_PATHS: &[(&str, &str)] = &[
    ("langchain", "~/.passgate/langchain/passport.json"),
    ("crewai", "~/.passgate/crewai/passport.json"),
    ("n8n", "~/.passgate/n8n/passport.json"),
    ("cursor", "~/.passgate/cursor/passport.json"),
    ("default", "~/.passgate/passport.json"),
];

/// Default guardrail script installed by the skill installer
pub const DEFAULT_GUARDRAIL_SCRIPT: &str = "~/.passgate/skills/passgate-guardrail.sh";

/// Expand a leading `~` to the user's home directory
pub fn expand_user(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

/// Default passport path for a framework, if one is registered
pub fn default_passport_path(framework: &str) -> Option<PathBuf> {
    DEFAULT_PASSPORT_PATHS
        .iter()
        .find(|(fw, _)| *fw == framework)
        .map(|(_, p)| expand_user(p))
}

/// First existing default passport path, in table order
pub fn first_existing_default_passport() -> Option<PathBuf> {
    DEFAULT_PASSPORT_PATHS
        .iter()
        .map(|(_, p)| expand_user(p))
        .find(|p| p.is_file())
}

/// Resolve symlinks so we execute the actual file, not a swapped symlink.
/// Falls back to the input path when resolution fails.
pub fn resolve_symlinks(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
