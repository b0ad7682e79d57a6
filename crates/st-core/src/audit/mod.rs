//! Tamper-evident audit log.
//!
//! One JSONL entry per executed batch and per gate cancellation. Each entry
//! carries the SHA-256 of the previous one, so edits and deletions are
//! detectable with [`verify_log`].
//!
//! The log lives at:
//! - `$SESSION_TRIAGE_DATA/audit/audit.jsonl` (if set)
//! - `$XDG_DATA_HOME/session-triage/audit/audit.jsonl`
//! - the platform data directory otherwise
//!
//! A failed write never undoes a termination; the pipeline reports it.

mod entry;
mod verify;
mod writer;

pub use entry::{
    AuditContext, AuditEntry, AuditEventType, AuditRecord, AuditedSession, GateDetails,
    AUDIT_SCHEMA_VERSION,
};
pub use verify::{verify_log, BreakType, BrokenLink, SchemaWarning, TamperedEntry, VerificationResult};
pub use writer::{AuditLog, GENESIS_HASH};

use crate::gate::Cancellation;
use std::path::PathBuf;
use thiserror::Error;

/// Environment override for the data directory.
pub const ENV_DATA_DIR: &str = "SESSION_TRIAGE_DATA";

const APP_DIR_NAME: &str = "session-triage";
pub(crate) const AUDIT_DIR_NAME: &str = "audit";
pub(crate) const AUDIT_LOG_FILENAME: &str = "audit.jsonl";

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("failed to resolve audit log directory (set SESSION_TRIAGE_DATA or XDG_DATA_HOME)")]
    DataDirUnavailable,

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse audit entry at line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("audit sink rejected the entry: {0}")]
    Rejected(String),
}

impl From<AuditError> for st_common::Error {
    fn from(err: AuditError) -> Self {
        st_common::Error::Audit(err.to_string())
    }
}

/// Destination for audit records.
pub trait AuditSink {
    fn record_batch(&mut self, record: &AuditRecord) -> Result<(), AuditError>;
    fn record_cancellation(&mut self, cancellation: &Cancellation) -> Result<(), AuditError>;
}

/// In-memory sink. Can be told to reject writes.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    pub batches: Vec<AuditRecord>,
    pub cancellations: Vec<Cancellation>,
    fail: bool,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }
}

impl AuditSink for MemoryAuditSink {
    fn record_batch(&mut self, record: &AuditRecord) -> Result<(), AuditError> {
        if self.fail {
            return Err(AuditError::Rejected("disk full".to_string()));
        }
        self.batches.push(record.clone());
        Ok(())
    }

    fn record_cancellation(&mut self, cancellation: &Cancellation) -> Result<(), AuditError> {
        if self.fail {
            return Err(AuditError::Rejected("disk full".to_string()));
        }
        self.cancellations.push(cancellation.clone());
        Ok(())
    }
}

/// Sink standing in for a log that could not be opened. Every write fails
/// with the original reason so the outcome reports it.
#[derive(Debug, Clone)]
pub struct UnavailableAuditSink {
    reason: String,
}

impl UnavailableAuditSink {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl AuditSink for UnavailableAuditSink {
    fn record_batch(&mut self, _record: &AuditRecord) -> Result<(), AuditError> {
        Err(AuditError::Rejected(self.reason.clone()))
    }

    fn record_cancellation(&mut self, _cancellation: &Cancellation) -> Result<(), AuditError> {
        Err(AuditError::Rejected(self.reason.clone()))
    }
}

/// Resolve the audit log directory.
pub fn resolve_audit_dir() -> Result<PathBuf, AuditError> {
    if let Ok(dir) = std::env::var(ENV_DATA_DIR) {
        if !dir.trim().is_empty() {
            return Ok(PathBuf::from(dir).join(AUDIT_DIR_NAME));
        }
    }

    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        if !xdg.trim().is_empty() {
            return Ok(PathBuf::from(xdg).join(APP_DIR_NAME).join(AUDIT_DIR_NAME));
        }
    }

    if let Some(base) = dirs::data_dir() {
        return Ok(base.join(APP_DIR_NAME).join(AUDIT_DIR_NAME));
    }

    Err(AuditError::DataDirUnavailable)
}

/// Path of the active audit log file.
pub fn resolve_audit_path() -> Result<PathBuf, AuditError> {
    resolve_audit_dir().map(|dir| dir.join(AUDIT_LOG_FILENAME))
}
