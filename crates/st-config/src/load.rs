//! Policy loading with provenance.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::policy::Policy;
use crate::resolve::{resolve_policy_path, ConfigSource};
use crate::validate::{validate_policy, ValidationError};
use crate::CONFIG_SCHEMA_VERSION;

/// Errors that can occur during policy loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Invalid JSON in config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Semantic validation failed: {0}")]
    ValidationError(#[from] ValidationError),

    #[error("I/O error reading {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Schema version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: String, actual: String },
}

/// Loaded policy with provenance information.
#[derive(Debug, Clone)]
pub struct ResolvedPolicy {
    /// The effective policy.
    pub policy: Policy,
    /// Path to the policy file (None if using defaults).
    pub path: Option<PathBuf>,
    /// Where the path came from.
    pub source: ConfigSource,
    /// SHA-256 of the policy file content (None if using defaults).
    pub hash: Option<String>,
}

/// Compact provenance record attached to audit entries and `config show`.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyProvenance {
    pub path: Option<PathBuf>,
    pub source: ConfigSource,
    pub hash: Option<String>,
    pub schema_version: String,
}

impl ResolvedPolicy {
    /// Built-in defaults, no file involved.
    pub fn builtin() -> Self {
        Self {
            policy: Policy::default(),
            path: None,
            source: ConfigSource::BuiltinDefault,
            hash: None,
        }
    }

    pub fn provenance(&self) -> PolicyProvenance {
        PolicyProvenance {
            path: self.path.clone(),
            source: self.source,
            hash: self.hash.clone(),
            schema_version: self.policy.schema_version.clone(),
        }
    }
}

/// Resolve, read, parse and validate the policy.
pub fn load_policy(cli_policy: Option<&Path>) -> Result<ResolvedPolicy, ConfigError> {
    let resolved = resolve_policy_path(cli_policy);

    let Some(path) = resolved.path else {
        let builtin = ResolvedPolicy::builtin();
        validate_policy(&builtin.policy)?;
        return Ok(builtin);
    };

    let (policy, hash) = load_policy_from_file(&path)?;
    validate_policy(&policy)?;

    Ok(ResolvedPolicy {
        policy,
        path: Some(path),
        source: resolved.source,
        hash: Some(hash),
    })
}

/// Load policy from a specific file.
fn load_policy_from_file(path: &Path) -> Result<(Policy, String), ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            ConfigError::IoError {
                path: path.to_path_buf(),
                source: e,
            }
        }
    })?;

    let hash = compute_hash(&content);

    let policy: Policy = serde_json::from_str(&content).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        source: e,
    })?;

    if policy.schema_version != CONFIG_SCHEMA_VERSION {
        return Err(ConfigError::VersionMismatch {
            expected: CONFIG_SCHEMA_VERSION.to_string(),
            actual: policy.schema_version.clone(),
        });
    }

    Ok((policy, hash))
}

/// SHA-256 of the raw file content, lowercase hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_explicit_file_loads_with_hash() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("policy.json");
        let body = r#"{"schema_version":"1.0.0","executor":{"sql_fallback":true}}"#;
        fs::write(&path, body).unwrap();

        let resolved = load_policy(Some(&path)).unwrap();
        assert_eq!(resolved.source, ConfigSource::CliArgument);
        assert!(resolved.policy.executor.sql_fallback);
        assert_eq!(resolved.hash.as_deref(), Some(compute_hash(body).as_str()));
        assert_eq!(resolved.hash.unwrap().len(), 64);
    }

    #[test]
    fn test_missing_explicit_file_is_not_found() {
        let temp = TempDir::new().unwrap();
        let err = load_policy(Some(&temp.path().join("absent.json"))).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn test_version_mismatch_reported() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("policy.json");
        fs::write(&path, r#"{"schema_version":"2.0.0"}"#).unwrap();
        assert!(matches!(
            load_policy(Some(&path)),
            Err(ConfigError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn test_invalid_values_fail_validation() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("policy.json");
        fs::write(
            &path,
            r#"{"schema_version":"1.0.0","executor":{"timeout_secs":0}}"#,
        )
        .unwrap();
        assert!(matches!(
            load_policy(Some(&path)),
            Err(ConfigError::ValidationError(_))
        ));
    }
}
