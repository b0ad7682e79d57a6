//! Configuration validation errors and semantic validation.

use thiserror::Error;

use crate::policy::Policy;

/// Validation result type.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Longest settling delay accepted before verification.
pub const MAX_SETTLING_DELAY_SECS: u64 = 300;

/// Configuration validation errors.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Semantic validation failed: {0}")]
    SemanticError(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: String, actual: String },
}

impl ValidationError {
    /// Error code for structured error reporting.
    pub fn code(&self) -> u32 {
        match self {
            ValidationError::IoError(_) => 60,
            ValidationError::ParseError(_) => 61,
            ValidationError::SemanticError(_) => 63,
            ValidationError::InvalidValue { .. } => 65,
            ValidationError::VersionMismatch { .. } => 66,
        }
    }
}

/// Validate policy configuration semantically.
pub fn validate_policy(policy: &Policy) -> ValidationResult<()> {
    if policy.schema_version != crate::CONFIG_SCHEMA_VERSION {
        return Err(ValidationError::VersionMismatch {
            expected: crate::CONFIG_SCHEMA_VERSION.to_string(),
            actual: policy.schema_version.clone(),
        });
    }

    let safety = &policy.safety;
    no_blank_entries("safety.system_users", &safety.system_users)?;
    no_blank_entries("safety.system_addresses", &safety.system_addresses)?;
    no_blank_entries("safety.protected_databases", &safety.protected_databases)?;
    // A blank substring would match every application name.
    no_blank_entries(
        "safety.privileged_applications",
        &safety.privileged_applications,
    )?;
    no_blank_entries("safety.privileged_os_users", &safety.privileged_os_users)?;
    no_blank_entries(
        "safety.critical_process_names",
        &safety.critical_process_names,
    )?;

    if policy.executor.utility_paths.is_empty() {
        return Err(ValidationError::SemanticError(
            "executor.utility_paths must list at least one location".to_string(),
        ));
    }
    if policy.source.sql_client_paths.is_empty() {
        return Err(ValidationError::SemanticError(
            "source.sql_client_paths must list at least one location".to_string(),
        ));
    }

    if policy.executor.timeout_secs == 0 {
        return Err(ValidationError::InvalidValue {
            field: "executor.timeout_secs".to_string(),
            message: "Must be positive".to_string(),
        });
    }
    if policy.source.timeout_secs == 0 {
        return Err(ValidationError::InvalidValue {
            field: "source.timeout_secs".to_string(),
            message: "Must be positive".to_string(),
        });
    }
    if policy.source.database.trim().is_empty() {
        return Err(ValidationError::InvalidValue {
            field: "source.database".to_string(),
            message: "Must not be blank".to_string(),
        });
    }

    if policy.verification.settling_delay_secs > MAX_SETTLING_DELAY_SECS {
        return Err(ValidationError::InvalidValue {
            field: "verification.settling_delay_secs".to_string(),
            message: format!(
                "Must be at most {}, got {}",
                MAX_SETTLING_DELAY_SECS, policy.verification.settling_delay_secs
            ),
        });
    }

    Ok(())
}

fn no_blank_entries(field: &str, entries: &[String]) -> ValidationResult<()> {
    if let Some(idx) = entries.iter().position(|e| e.trim().is_empty()) {
        return Err(ValidationError::InvalidValue {
            field: format!("{}[{}]", field, idx),
            message: "Must not be blank".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_is_valid() {
        assert!(validate_policy(&Policy::default()).is_ok());
    }

    #[test]
    fn test_blank_application_entry_rejected() {
        let mut policy = Policy::default();
        policy.safety.privileged_applications.push("  ".to_string());
        let err = validate_policy(&policy).unwrap_err();
        match err {
            ValidationError::InvalidValue { field, .. } => {
                assert_eq!(field, "safety.privileged_applications[6]")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_settling_delay_bounded() {
        let mut policy = Policy::default();
        policy.verification.settling_delay_secs = MAX_SETTLING_DELAY_SECS + 1;
        assert!(matches!(
            validate_policy(&policy),
            Err(ValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_version_mismatch() {
        let mut policy = Policy::default();
        policy.schema_version = "0.9.0".to_string();
        assert_eq!(validate_policy(&policy).unwrap_err().code(), 66);
    }

    #[test]
    fn test_empty_utility_paths_rejected() {
        let mut policy = Policy::default();
        policy.executor.utility_paths.clear();
        assert!(matches!(
            validate_policy(&policy),
            Err(ValidationError::SemanticError(_))
        ));
    }
}
