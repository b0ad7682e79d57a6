//! Error types for Session Triage.
//!
//! This module provides structured error handling with:
//! - Stable error codes for machine parsing
//! - Category classification for error grouping
//! - Recoverability hints for automation
//! - Remediation suggestions for humans
//!
//! # Human-Facing Output
//!
//! ```text
//! ✗ Metadata Source Unavailable
//!   Reason: nzsql exited with status 2: could not connect
//!   Fix: Check appliance connectivity and credentials, then run 'st-core check'
//! ```
//!
//! # Machine-Facing Output
//!
//! ```json
//! {
//!   "code": 20,
//!   "category": "source",
//!   "message": "session metadata source unavailable: connection refused",
//!   "recoverable": true,
//!   "suggested_action": "retry"
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Result type alias for Session Triage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Policy file errors.
    Config,
    /// Malformed operator input (filters, ids).
    Input,
    /// Session metadata source errors.
    Source,
    /// Termination utility errors.
    Action,
    /// Audit log errors.
    Audit,
    /// File I/O and serialization errors.
    Io,
    /// Platform compatibility errors.
    Platform,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Config => write!(f, "config"),
            ErrorCategory::Input => write!(f, "input"),
            ErrorCategory::Source => write!(f, "source"),
            ErrorCategory::Action => write!(f, "action"),
            ErrorCategory::Audit => write!(f, "audit"),
            ErrorCategory::Io => write!(f, "io"),
            ErrorCategory::Platform => write!(f, "platform"),
        }
    }
}

/// Suggested follow-ups for scripted callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedAction {
    /// Retry the operation.
    Retry,
    /// Fix the input and re-run.
    FixInput,
    /// Run the check command.
    RunCheck,
    /// Request elevated privileges.
    Elevate,
    /// Manual intervention required.
    ManualIntervention,
    /// Abort the operation.
    Abort,
}

impl std::fmt::Display for SuggestedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SuggestedAction::Retry => write!(f, "retry"),
            SuggestedAction::FixInput => write!(f, "fix_input"),
            SuggestedAction::RunCheck => write!(f, "run_check"),
            SuggestedAction::Elevate => write!(f, "elevate"),
            SuggestedAction::ManualIntervention => write!(f, "manual_intervention"),
            SuggestedAction::Abort => write!(f, "abort"),
        }
    }
}

/// Unified error type for Session Triage.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (10-19)
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid policy file: {0}")]
    InvalidPolicy(String),

    // Input errors (15-19)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("duplicate session {session_id} in candidate batch")]
    DuplicateSession { session_id: u64 },

    // Source errors (20-29)
    #[error("session metadata source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("cannot determine the caller's own session: {0}")]
    OwnSessionUnknown(String),

    // Action errors (40-49)
    #[error("termination utility unavailable: {0}")]
    UtilityUnavailable(String),

    #[error("termination of session {session_id} failed: {message}")]
    TerminationFailed { session_id: u64, message: String },

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    // Audit errors (50-59)
    #[error("audit log error: {0}")]
    Audit(String),

    // I/O errors (60-69)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Platform errors (70-79)
    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),
}

impl Error {
    /// Returns the error code for this error type.
    ///
    /// Error codes are stable and grouped by category:
    /// - 10-14: Configuration errors
    /// - 15-19: Input errors
    /// - 20-29: Metadata source errors
    /// - 40-49: Termination errors
    /// - 50-59: Audit errors
    /// - 60-69: I/O errors
    /// - 70-79: Platform errors
    pub fn code(&self) -> u32 {
        match self {
            Error::Config(_) => 10,
            Error::InvalidPolicy(_) => 11,
            Error::InvalidInput(_) => 15,
            Error::DuplicateSession { .. } => 16,
            Error::SourceUnavailable(_) => 20,
            Error::OwnSessionUnknown(_) => 21,
            Error::UtilityUnavailable(_) => 40,
            Error::TerminationFailed { .. } => 41,
            Error::PermissionDenied(_) => 42,
            Error::Audit(_) => 50,
            Error::Io(_) => 60,
            Error::Json(_) => 61,
            Error::UnsupportedPlatform(_) => 70,
        }
    }

    /// Returns the error category for grouping and filtering.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_) | Error::InvalidPolicy(_) => ErrorCategory::Config,
            Error::InvalidInput(_) | Error::DuplicateSession { .. } => ErrorCategory::Input,
            Error::SourceUnavailable(_) | Error::OwnSessionUnknown(_) => ErrorCategory::Source,
            Error::UtilityUnavailable(_)
            | Error::TerminationFailed { .. }
            | Error::PermissionDenied(_) => ErrorCategory::Action,
            Error::Audit(_) => ErrorCategory::Audit,
            Error::Io(_) | Error::Json(_) => ErrorCategory::Io,
            Error::UnsupportedPlatform(_) => ErrorCategory::Platform,
        }
    }

    /// Returns whether this error is potentially recoverable by the operator.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Config(_) | Error::InvalidPolicy(_) => true,
            Error::InvalidInput(_) | Error::DuplicateSession { .. } => true,
            // Connectivity is usually transient
            Error::SourceUnavailable(_) => true,
            Error::OwnSessionUnknown(_) => true,
            Error::UtilityUnavailable(_) => true,
            Error::TerminationFailed { .. } => true,
            Error::PermissionDenied(_) => true,
            Error::Audit(_) => true,
            Error::Io(_) => true,
            Error::Json(_) => false,
            Error::UnsupportedPlatform(_) => false,
        }
    }

    /// Returns the suggested follow-up.
    pub fn suggested_action(&self) -> SuggestedAction {
        match self {
            Error::Config(_) | Error::InvalidPolicy(_) => SuggestedAction::RunCheck,
            Error::InvalidInput(_) | Error::DuplicateSession { .. } => SuggestedAction::FixInput,
            Error::SourceUnavailable(_) | Error::OwnSessionUnknown(_) => SuggestedAction::Retry,
            Error::UtilityUnavailable(_) => SuggestedAction::RunCheck,
            Error::TerminationFailed { .. } => SuggestedAction::Retry,
            Error::PermissionDenied(_) => SuggestedAction::Elevate,
            Error::Audit(_) | Error::Io(_) => SuggestedAction::ManualIntervention,
            Error::Json(_) => SuggestedAction::ManualIntervention,
            Error::UnsupportedPlatform(_) => SuggestedAction::Abort,
        }
    }

    /// Returns a human-readable remediation hint.
    pub fn remediation(&self) -> &'static str {
        match self {
            Error::Config(_) => "Run 'st-core check' to validate the policy file.",
            Error::InvalidPolicy(_) => {
                "Fix the reported field in policy.json, or remove the file to use built-in defaults."
            }
            Error::InvalidInput(_) => "Correct the filter arguments and re-run the command.",
            Error::DuplicateSession { .. } => {
                "Candidate batches must list each session once. Re-run the preview."
            }
            Error::SourceUnavailable(_) => {
                "Check appliance connectivity and credentials, then run 'st-core check'."
            }
            Error::OwnSessionUnknown(_) => {
                "The console could not identify its own session and refuses to continue. Check the SQL client configuration."
            }
            Error::UtilityUnavailable(_) => {
                "Install the session utility or list its location under executor.utility_paths in policy.json."
            }
            Error::TerminationFailed { .. } => {
                "The session may already be gone. Re-run the preview to see the current state."
            }
            Error::PermissionDenied(_) => {
                "Run as an account with session-abort privileges on the appliance."
            }
            Error::Audit(_) => {
                "Check permissions on the audit directory. Terminations already performed are not rolled back."
            }
            Error::Io(_) => "Check disk space and permissions, then retry.",
            Error::Json(_) => "Invalid JSON. Check the file syntax or restore it from backup.",
            Error::UnsupportedPlatform(_) => "This feature is not available on this platform.",
        }
    }

    /// Returns a short headline for human-readable output.
    pub fn headline(&self) -> &'static str {
        match self {
            Error::Config(_) => "Configuration Error",
            Error::InvalidPolicy(_) => "Invalid Policy Configuration",
            Error::InvalidInput(_) => "Invalid Input",
            Error::DuplicateSession { .. } => "Duplicate Session In Batch",
            Error::SourceUnavailable(_) => "Metadata Source Unavailable",
            Error::OwnSessionUnknown(_) => "Own Session Unknown",
            Error::UtilityUnavailable(_) => "Termination Utility Unavailable",
            Error::TerminationFailed { .. } => "Termination Failed",
            Error::PermissionDenied(_) => "Permission Denied",
            Error::Audit(_) => "Audit Log Error",
            Error::Io(_) => "I/O Error",
            Error::Json(_) => "Serialization Error",
            Error::UnsupportedPlatform(_) => "Unsupported Platform",
        }
    }

    /// Format for terminal output: headline, reason, fix.
    pub fn format_human(&self) -> String {
        format!(
            "✗ {}\n  Reason: {}\n  Fix: {}",
            self.headline(),
            self,
            self.remediation()
        )
    }
}

/// Structured error response for JSON output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    /// Stable error code.
    pub code: u32,

    /// Error category for grouping.
    pub category: ErrorCategory,

    /// Human-readable error message.
    pub message: String,

    /// Whether the error is potentially recoverable.
    pub recoverable: bool,

    /// Suggested follow-up.
    pub suggested_action: SuggestedAction,

    /// Additional structured context (e.g., session id).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,
}

impl From<&Error> for StructuredError {
    fn from(err: &Error) -> Self {
        let mut context = HashMap::new();

        match err {
            Error::DuplicateSession { session_id } => {
                context.insert("session_id".to_string(), serde_json::json!(session_id));
            }
            Error::TerminationFailed { session_id, .. } => {
                context.insert("session_id".to_string(), serde_json::json!(session_id));
            }
            _ => {}
        }

        StructuredError {
            code: err.code(),
            category: err.category(),
            message: err.to_string(),
            recoverable: err.is_recoverable(),
            suggested_action: err.suggested_action(),
            context,
        }
    }
}

impl StructuredError {
    /// Serialize to pretty JSON string.
    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self)
            .unwrap_or_else(|_| format!(r#"{{"code":{},"error":"serialization_failed"}}"#, self.code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_and_input_errors_have_distinct_categories() {
        let source = Error::SourceUnavailable("connection refused".into());
        let input = Error::InvalidInput("empty username pattern".into());
        assert_eq!(source.category(), ErrorCategory::Source);
        assert_eq!(input.category(), ErrorCategory::Input);
        assert_ne!(source.code(), input.code());
    }

    #[test]
    fn structured_error_carries_session_context() {
        let err = Error::TerminationFailed {
            session_id: 412,
            message: "exit status 1".into(),
        };
        let structured = StructuredError::from(&err);
        assert_eq!(structured.code, 41);
        assert_eq!(structured.context["session_id"], serde_json::json!(412));
        assert!(structured.to_json_pretty().contains("\"category\": \"action\""));
    }

    #[test]
    fn human_format_includes_headline_and_fix() {
        let err = Error::UtilityUnavailable("no candidate path exists".into());
        let text = err.format_human();
        assert!(text.starts_with("✗ Termination Utility Unavailable"));
        assert!(text.contains("Fix: "));
    }
}
