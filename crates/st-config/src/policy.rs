//! Policy configuration types.
//!
//! Every section has built-in defaults so a partial policy.json only needs to
//! name the fields it overrides.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::validate::ValidationError;

/// Complete policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub schema_version: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub safety: SafetyRules,

    #[serde(default)]
    pub executor: ExecutorSettings,

    #[serde(default)]
    pub verification: VerificationSettings,

    #[serde(default)]
    pub source: SourceSettings,

    #[serde(default)]
    pub notes: Option<String>,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            schema_version: crate::CONFIG_SCHEMA_VERSION.to_string(),
            description: None,
            safety: SafetyRules::default(),
            executor: ExecutorSettings::default(),
            verification: VerificationSettings::default(),
            source: SourceSettings::default(),
            notes: None,
        }
    }
}

impl Policy {
    /// Load policy from a JSON file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ValidationError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ValidationError::IoError(format!("Failed to read {}: {}", path.display(), e))
        })?;

        Self::parse_json(&content)
    }

    /// Parse policy from a JSON string.
    pub fn parse_json(json: &str) -> Result<Self, ValidationError> {
        serde_json::from_str(json)
            .map_err(|e| ValidationError::ParseError(format!("Invalid JSON: {}", e)))
    }
}

/// Lists that drive the safety classifier.
///
/// Names are compared case-insensitively except `system_addresses`, which
/// must match the client address exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyRules {
    /// Administrative database accounts.
    pub system_users: Vec<String>,

    /// Loopback and appliance-internal client addresses. Loopback entries
    /// only count together with a protected database.
    pub system_addresses: Vec<String>,

    /// Databases that are protected when accessed from a system context.
    pub protected_databases: Vec<String>,

    /// Substrings identifying vendor utilities in the application name.
    pub privileged_applications: Vec<String>,

    /// OS accounts whose processes must not be disturbed.
    pub privileged_os_users: Vec<String>,

    /// OS command names of appliance control processes.
    pub critical_process_names: Vec<String>,
}

impl Default for SafetyRules {
    fn default() -> Self {
        Self {
            system_users: strings(&["ADMIN", "SYSTEM", "NZ"]),
            system_addresses: strings(&["127.0.0.1", "::1", "localhost"]),
            protected_databases: strings(&["SYSTEM"]),
            privileged_applications: strings(&[
                "nzsession",
                "nzadmin",
                "nzbackup",
                "nzrestore",
                "nzload",
                "nzstats",
            ]),
            privileged_os_users: strings(&["root", "nz"]),
            critical_process_names: strings(&[
                "nzstart",
                "nzstop",
                "startupsvr",
                "sysmgr",
                "postmaster",
                "dbos",
                "clientmgr",
                "eventmgr",
                "loadmgr",
                "sessionmgr",
                "statsmgr",
            ]),
        }
    }
}

/// Termination executor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSettings {
    /// Candidate locations of the privileged session utility, probed in order.
    pub utility_paths: Vec<PathBuf>,

    /// Target host passed to the utility (`-host`); omitted when unset.
    pub host: Option<String>,

    /// Try `DROP SESSION` through the SQL client when the utility fails.
    pub sql_fallback: bool,

    /// Wall-clock limit for one abort invocation.
    pub timeout_secs: u64,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            utility_paths: paths(&[
                "/nz/kit/bin/nzsession",
                "/nz/support/bin/nzsession",
                "/usr/local/nz/bin/nzsession",
            ]),
            host: None,
            sql_fallback: false,
            timeout_secs: 30,
        }
    }
}

/// Post-termination verification settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationSettings {
    /// Fixed wait before re-querying session state.
    pub settling_delay_secs: u64,

    /// Whether the single retry pass is offered at all.
    pub offer_retry: bool,
}

impl Default for VerificationSettings {
    fn default() -> Self {
        Self {
            settling_delay_secs: 3,
            offer_retry: true,
        }
    }
}

/// Session metadata source settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    /// Candidate locations of the SQL client, probed in order.
    pub sql_client_paths: Vec<PathBuf>,

    /// Appliance host; the client default applies when unset.
    pub host: Option<String>,

    /// Database to connect to for session metadata.
    pub database: String,

    /// Connecting user; the client default applies when unset.
    pub user: Option<String>,

    /// Wall-clock limit for one metadata query.
    pub timeout_secs: u64,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            sql_client_paths: paths(&[
                "/nz/kit/bin/nzsql",
                "/usr/local/nz/bin/nzsql",
                "/usr/bin/nzsql",
            ]),
            host: None,
            database: "SYSTEM".to_string(),
            user: None,
            timeout_secs: 30,
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn paths(items: &[&str]) -> Vec<PathBuf> {
    items.iter().map(PathBuf::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_policy_keeps_defaults_for_missing_sections() {
        let policy = Policy::parse_json(
            r#"{"schema_version":"1.0.0","verification":{"settling_delay_secs":0}}"#,
        )
        .unwrap();
        assert_eq!(policy.verification.settling_delay_secs, 0);
        assert!(policy.verification.offer_retry);
        assert_eq!(policy.safety, SafetyRules::default());
        assert_eq!(policy.executor.timeout_secs, 30);
    }

    #[test]
    fn default_rules_cover_system_context() {
        let rules = SafetyRules::default();
        assert!(rules.system_users.iter().any(|u| u == "SYSTEM"));
        assert!(rules.system_addresses.iter().any(|a| a == "127.0.0.1"));
        assert!(!rules.critical_process_names.iter().any(|p| p == "postgres"));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = Policy::parse_json("{ not json").unwrap_err();
        assert!(matches!(err, ValidationError::ParseError(_)));
    }

    #[test]
    fn missing_schema_version_is_rejected() {
        assert!(Policy::parse_json(r#"{"safety":{}}"#).is_err());
    }
}
