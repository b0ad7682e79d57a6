//! Exit codes for the st-core CLI.
//!
//! Exit codes communicate the pipeline outcome without requiring output parsing.
//!
//! Exit code ranges:
//! - 0-5: Operational outcomes (parse outcome from code, not output)
//! - 10-19: User/environment errors (recoverable by user action)
//! - 20-29: Internal errors (bugs, should be reported)

/// Exit codes for st-core operations.
///
/// These codes are a stable contract for automation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    // ========================================================================
    // Operational Outcomes (0-5)
    // ========================================================================
    /// Nothing to do: no matching sessions, or a clean check
    Clean = 0,

    /// Candidates previewed, nothing terminated
    PreviewOnly = 1,

    /// Every targeted session terminated and verified gone
    AllTerminated = 2,

    /// Some sessions failed or are still active after verification
    PartialFail = 3,

    /// Operator declined at the confirmation gate
    Cancelled = 4,

    /// Audit log failed hash-chain verification, or a batch ran but its
    /// audit record could not be written
    AuditBroken = 5,

    // ========================================================================
    // User / Environment Errors (10-19)
    // ========================================================================
    /// Invalid arguments, filters, or policy
    ArgsError = 10,

    /// Metadata source or termination utility unavailable
    SourceUnavailable = 11,

    /// Permission denied
    PermissionError = 12,

    // ========================================================================
    // Internal Errors (20-29)
    // ========================================================================
    /// Internal error (bug - please report)
    InternalError = 20,

    /// I/O error
    IoError = 21,
}

impl ExitCode {
    /// Convert to i32 for process exit.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Check if this exit code indicates success (codes 0-2).
    pub fn is_success(self) -> bool {
        matches!(
            self,
            ExitCode::Clean | ExitCode::PreviewOnly | ExitCode::AllTerminated
        )
    }

    /// Check if this exit code indicates an operational outcome (codes 0-5).
    pub fn is_operational(self) -> bool {
        (self as i32) < 10
    }

    /// Check if this exit code is a user/environment error (codes 10-19).
    pub fn is_user_error(self) -> bool {
        let code = self as i32;
        (10..20).contains(&code)
    }

    /// Check if this exit code is an internal error (codes 20-29).
    pub fn is_internal_error(self) -> bool {
        (self as i32) >= 20
    }

    /// Get the code name as a string constant (for JSON output).
    pub fn code_name(&self) -> &'static str {
        match self {
            ExitCode::Clean => "OK_CLEAN",
            ExitCode::PreviewOnly => "OK_PREVIEW",
            ExitCode::AllTerminated => "OK_TERMINATED",
            ExitCode::PartialFail => "ERR_PARTIAL",
            ExitCode::Cancelled => "ERR_CANCELLED",
            ExitCode::AuditBroken => "ERR_AUDIT",
            ExitCode::ArgsError => "ERR_ARGS",
            ExitCode::SourceUnavailable => "ERR_SOURCE_UNAVAILABLE",
            ExitCode::PermissionError => "ERR_PERMISSION",
            ExitCode::InternalError => "ERR_INTERNAL",
            ExitCode::IoError => "ERR_IO",
        }
    }

    /// Map a unified error to its exit code.
    pub fn from_error(err: &st_common::Error) -> Self {
        use st_common::Error;
        match err {
            Error::Config(_)
            | Error::InvalidPolicy(_)
            | Error::InvalidInput(_)
            | Error::DuplicateSession { .. } => ExitCode::ArgsError,
            Error::SourceUnavailable(_)
            | Error::OwnSessionUnknown(_)
            | Error::UtilityUnavailable(_) => ExitCode::SourceUnavailable,
            Error::PermissionDenied(_) => ExitCode::PermissionError,
            Error::TerminationFailed { .. } => ExitCode::PartialFail,
            Error::Audit(_) | Error::Io(_) => ExitCode::IoError,
            Error::Json(_) | Error::UnsupportedPlatform(_) => ExitCode::InternalError,
        }
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.code_name(), self.as_i32())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_are_consistent() {
        assert!(ExitCode::Cancelled.is_operational());
        assert!(!ExitCode::Cancelled.is_success());
        assert!(ExitCode::SourceUnavailable.is_user_error());
        assert!(ExitCode::IoError.is_internal_error());
        assert_eq!(i32::from(ExitCode::PartialFail), 3);
    }

    #[test]
    fn source_errors_map_to_source_unavailable() {
        let err = st_common::Error::SourceUnavailable("refused".into());
        assert_eq!(ExitCode::from_error(&err), ExitCode::SourceUnavailable);
        let err = st_common::Error::InvalidInput("blank".into());
        assert_eq!(ExitCode::from_error(&err), ExitCode::ArgsError);
    }
}
