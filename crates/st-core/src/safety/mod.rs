//! Safety classification of candidate sessions.
//!
//! Unsafe is a verdict, not an error: the classifier never fails. Every
//! triggered rule is reported, in rule order.

pub mod classifier;

pub use classifier::SafetyClassifier;

use serde::Serialize;
use st_common::{ProcessInfo, SessionId};

/// The rules, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyRule {
    SystemUser,
    SystemAddress,
    ProtectedDatabase,
    PrivilegedApplication,
    OwnSession,
    PrivilegedProcess,
}

impl SafetyRule {
    pub const ALL: [SafetyRule; 6] = [
        SafetyRule::SystemUser,
        SafetyRule::SystemAddress,
        SafetyRule::ProtectedDatabase,
        SafetyRule::PrivilegedApplication,
        SafetyRule::OwnSession,
        SafetyRule::PrivilegedProcess,
    ];

    /// 1-based rule number shown to operators.
    pub fn number(self) -> u8 {
        match self {
            SafetyRule::SystemUser => 1,
            SafetyRule::SystemAddress => 2,
            SafetyRule::ProtectedDatabase => 3,
            SafetyRule::PrivilegedApplication => 4,
            SafetyRule::OwnSession => 5,
            SafetyRule::PrivilegedProcess => 6,
        }
    }
}

impl std::fmt::Display for SafetyRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SafetyRule::SystemUser => "system_user",
            SafetyRule::SystemAddress => "system_address",
            SafetyRule::ProtectedDatabase => "protected_database",
            SafetyRule::PrivilegedApplication => "privileged_application",
            SafetyRule::OwnSession => "own_session",
            SafetyRule::PrivilegedProcess => "privileged_process",
        };
        write!(f, "{}", s)
    }
}

/// One triggered rule with an operator-facing explanation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SafetyReason {
    pub rule: SafetyRule,
    pub message: String,
}

impl std::fmt::Display for SafetyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[rule {}] {}", self.rule.number(), self.message)
    }
}

/// Outcome of the OS process lookup behind rule 6.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProcessCheck {
    /// The session exposes no process id.
    NoPid,
    /// Inspection succeeded.
    Inspected { info: ProcessInfo },
    /// Inspection unavailable; rule 6 skipped.
    Skipped { reason: String },
}

impl ProcessCheck {
    pub fn info(&self) -> Option<&ProcessInfo> {
        match self {
            ProcessCheck::Inspected { info } => Some(info),
            _ => None,
        }
    }
}

/// Per-session safety judgment. Derived on demand, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SafetyVerdict {
    pub session_id: SessionId,
    /// True iff `reasons` is empty.
    pub safe: bool,
    pub reasons: Vec<SafetyReason>,
    pub process: ProcessCheck,
}

impl SafetyVerdict {
    pub fn new(session_id: SessionId, reasons: Vec<SafetyReason>, process: ProcessCheck) -> Self {
        Self {
            session_id,
            safe: reasons.is_empty(),
            reasons,
            process,
        }
    }

    pub fn triggered(&self, rule: SafetyRule) -> bool {
        self.reasons.iter().any(|r| r.rule == rule)
    }
}
