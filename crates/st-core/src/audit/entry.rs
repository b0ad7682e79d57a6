//! Audit log entry types and schema.
//!
//! Each entry carries a timestamp, the event type, run and host ids for
//! correlation, event-specific details, and the hash chain fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use st_common::{ProcessId, SessionId};

use crate::gate::{Cancellation, CommittedBatch, GateStage};
use crate::verify::{BatchResult, OutcomeCounts, RetryDecision, TerminationOutcome};

/// Schema version for audit log entries.
pub const AUDIT_SCHEMA_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// A committed batch was executed and verified.
    Termination,
    /// The operator declined at the confirmation gate.
    Gate,
}

impl std::fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuditEventType::Termination => "termination",
            AuditEventType::Gate => "gate",
        };
        write!(f, "{}", s)
    }
}

/// A single audit log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub schema_version: String,

    pub ts: DateTime<Utc>,

    pub event_type: AuditEventType,

    /// Unique ID for this invocation.
    pub run_id: String,

    pub host_id: String,

    /// OS account that ran the console.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,

    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    /// Hash of the previous entry, or the genesis marker.
    pub prev_hash: String,

    /// SHA-256 of this entry serialized without this field.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_hash: Option<String>,
}

impl AuditEntry {
    pub fn new(
        ctx: &AuditContext,
        event_type: AuditEventType,
        message: impl Into<String>,
        prev_hash: impl Into<String>,
    ) -> Self {
        AuditEntry {
            schema_version: AUDIT_SCHEMA_VERSION.to_string(),
            ts: Utc::now(),
            event_type,
            run_id: ctx.run_id.clone(),
            host_id: ctx.host_id.clone(),
            operator: ctx.operator.clone(),
            message: message.into(),
            details: None,
            prev_hash: prev_hash.into(),
            entry_hash: None,
        }
    }

    pub fn with_details<T: Serialize>(mut self, details: &T) -> Self {
        self.details = serde_json::to_value(details).ok();
        self
    }

    /// Hash of the entry with `entry_hash` cleared.
    pub fn content_hash(&self) -> String {
        let mut unhashed = self.clone();
        unhashed.entry_hash = None;
        let json = serde_json::to_string(&unhashed).unwrap_or_default();
        hex::encode(Sha256::digest(json.as_bytes()))
    }

    pub fn compute_hash(&mut self) {
        self.entry_hash = Some(self.content_hash());
    }

    pub fn verify_hash(&self) -> bool {
        match &self.entry_hash {
            Some(stored) => *stored == self.content_hash(),
            None => false,
        }
    }

    /// The entry hash, for chaining.
    pub fn hash(&self) -> &str {
        self.entry_hash.as_deref().unwrap_or("invalid")
    }

    pub fn to_jsonl(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"error":"serialization_failed","event_type":"{}"}}"#,
                self.event_type
            )
        })
    }
}

/// Correlation ids stamped on every entry of one run.
#[derive(Debug, Clone)]
pub struct AuditContext {
    pub run_id: String,
    pub host_id: String,
    pub operator: Option<String>,
}

impl AuditContext {
    pub fn new(run_id: impl Into<String>, host_id: impl Into<String>) -> Self {
        AuditContext {
            run_id: run_id.into(),
            host_id: host_id.into(),
            operator: None,
        }
    }

    pub fn with_operator(mut self, operator: impl Into<String>) -> Self {
        self.operator = Some(operator.into());
        self
    }
}

/// One session as it appears in a termination record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditedSession {
    pub session_id: SessionId,
    pub username: String,
    pub database: String,
    pub client_ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<ProcessId>,
    pub outcome: TerminationOutcome,
    pub retried: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

/// What was executed and how it ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub batch_ids: Vec<SessionId>,
    /// The operator overrode an unsafe verdict.
    pub safety_override: bool,
    pub committed_at: DateTime<Utc>,
    pub sessions: Vec<AuditedSession>,
    pub counts_before_retry: OutcomeCounts,
    pub final_counts: OutcomeCounts,
    pub retry: RetryDecision,
}

impl AuditRecord {
    pub fn new(batch: &CommittedBatch, result: &BatchResult) -> Self {
        Self {
            batch_ids: batch.ids(),
            safety_override: batch.was_unsafe(),
            committed_at: batch.committed_at(),
            sessions: result
                .sessions
                .iter()
                .map(|s| AuditedSession {
                    session_id: s.details.session_id,
                    username: s.details.username.clone(),
                    database: s.details.database.clone(),
                    client_ip: s.details.client_ip.clone(),
                    pid: s.details.pid,
                    outcome: s.outcome,
                    retried: s.retried,
                    diagnostic: s.diagnostic.clone(),
                })
                .collect(),
            counts_before_retry: result.counts_before_retry,
            final_counts: result.final_counts,
            retry: result.retry_decision,
        }
    }
}

/// Details for gate events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateDetails {
    pub batch_ids: Vec<SessionId>,
    pub declined_at: GateStage,
    pub unsafe_batch: bool,
    pub answered: bool,
}

impl From<&Cancellation> for GateDetails {
    fn from(c: &Cancellation) -> Self {
        Self {
            batch_ids: c.batch_ids.clone(),
            declined_at: c.stage,
            unsafe_batch: c.unsafe_batch,
            answered: c.answered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_covers_every_field() {
        let ctx = AuditContext::new("run-test", "host-test").with_operator("dba");
        let mut entry = AuditEntry::new(&ctx, AuditEventType::Gate, "declined", "genesis");
        entry.compute_hash();
        assert!(entry.verify_hash());
        assert_eq!(entry.hash().len(), 64);

        entry.message = "something else".to_string();
        assert!(!entry.verify_hash());
    }

    #[test]
    fn entry_without_hash_does_not_verify() {
        let ctx = AuditContext::new("run-test", "host-test");
        let entry = AuditEntry::new(&ctx, AuditEventType::Termination, "x", "genesis");
        assert!(!entry.verify_hash());
        assert_eq!(entry.hash(), "invalid");
    }

    #[test]
    fn event_type_display_matches_serde() {
        for ty in [AuditEventType::Termination, AuditEventType::Gate] {
            let json = serde_json::to_string(&ty).unwrap();
            assert_eq!(json, format!("\"{}\"", ty));
        }
    }
}
