//! Policy path discovery.
//!
//! Resolution order: CLI argument → environment variables → XDG paths → /etc → defaults.

use serde::Serialize;
use std::path::{Path, PathBuf};

/// Discovered policy file path and where it came from.
#[derive(Debug, Clone, Default)]
pub struct PolicyPath {
    /// Path to policy.json (or None when the built-in defaults apply).
    pub path: Option<PathBuf>,

    /// Source of the policy (for diagnostics).
    pub source: ConfigSource,
}

/// Where a configuration file was found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSource {
    /// Explicitly provided via CLI argument.
    CliArgument,

    /// Set via environment variable.
    Environment,

    /// Found in XDG config directory.
    XdgConfig,

    /// Found in /etc/session-triage/.
    SystemConfig,

    /// Using built-in defaults.
    #[default]
    BuiltinDefault,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::CliArgument => write!(f, "CLI argument"),
            ConfigSource::Environment => write!(f, "environment variable"),
            ConfigSource::XdgConfig => write!(f, "XDG config"),
            ConfigSource::SystemConfig => write!(f, "system config"),
            ConfigSource::BuiltinDefault => write!(f, "builtin default"),
        }
    }
}

/// Environment variable names.
pub const ENV_POLICY_PATH: &str = "SESSION_TRIAGE_POLICY";
pub const ENV_CONFIG_DIR: &str = "SESSION_TRIAGE_CONFIG_DIR";

/// Standard policy file name.
pub const POLICY_FILENAME: &str = "policy.json";

/// Application name for XDG directories.
const APP_NAME: &str = "session-triage";

/// Resolve the policy path using the standard resolution order.
///
/// 1. Explicit CLI path
/// 2. SESSION_TRIAGE_POLICY
/// 3. SESSION_TRIAGE_CONFIG_DIR + policy.json
/// 4. XDG config directory (~/.config/session-triage/)
/// 5. System config (/etc/session-triage/)
/// 6. Built-in defaults (None)
///
/// An explicit CLI path is returned even when it does not exist, so the
/// loader can report it instead of silently falling back to defaults.
pub fn resolve_policy_path(cli_policy: Option<&Path>) -> PolicyPath {
    if let Some(path) = cli_policy {
        return PolicyPath {
            path: Some(path.to_path_buf()),
            source: ConfigSource::CliArgument,
        };
    }

    if let Ok(env_path) = std::env::var(ENV_POLICY_PATH) {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return found(path, ConfigSource::Environment);
        }
    }

    if let Ok(config_dir) = std::env::var(ENV_CONFIG_DIR) {
        let path = PathBuf::from(config_dir).join(POLICY_FILENAME);
        if path.exists() {
            return found(path, ConfigSource::Environment);
        }
    }

    if let Some(dir) = xdg_config_dir() {
        let path = dir.join(POLICY_FILENAME);
        if path.exists() {
            return found(path, ConfigSource::XdgConfig);
        }
    }

    let system_path = system_config_dir().join(POLICY_FILENAME);
    if system_path.exists() {
        return found(system_path, ConfigSource::SystemConfig);
    }

    PolicyPath::default()
}

fn found(path: PathBuf, source: ConfigSource) -> PolicyPath {
    PolicyPath {
        path: Some(path),
        source,
    }
}

/// Get the XDG config directory for session-triage.
pub fn xdg_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

/// Get the system config directory.
pub fn system_config_dir() -> PathBuf {
    PathBuf::from("/etc").join(APP_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_source_display() {
        assert_eq!(format!("{}", ConfigSource::CliArgument), "CLI argument");
        assert_eq!(
            format!("{}", ConfigSource::Environment),
            "environment variable"
        );
        assert_eq!(
            format!("{}", ConfigSource::BuiltinDefault),
            "builtin default"
        );
    }

    #[test]
    fn test_cli_path_wins_even_if_missing() {
        let resolved = resolve_policy_path(Some(Path::new("/nonexistent/policy.json")));
        assert_eq!(resolved.source, ConfigSource::CliArgument);
        assert_eq!(
            resolved.path.as_deref(),
            Some(Path::new("/nonexistent/policy.json"))
        );
    }

    #[test]
    fn test_system_config_dir() {
        assert_eq!(system_config_dir(), PathBuf::from("/etc/session-triage"));
    }
}
