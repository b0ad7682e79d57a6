//! Termination preview.
//!
//! The preview owns its [`CandidateBatch`]. The only way forward is to hand
//! the whole preview to the confirmation gate, which consumes it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use st_common::{SessionId, SessionRecord};
use tracing::{debug, info};

use crate::batch::CandidateBatch;
use crate::collect::process::ProcessInspector;
use crate::logging::Stage;
use crate::safety::{ProcessCheck, SafetyClassifier, SafetyReason, SafetyVerdict};

/// One batch member with its verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionPreview {
    pub record: SessionRecord,
    pub verdict: SafetyVerdict,
}

/// Classified, rendered view of a batch awaiting confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TerminationPreview {
    #[serde(skip)]
    batch: CandidateBatch,
    own_session: SessionId,
    entries: Vec<SessionPreview>,
    /// True iff every member is safe.
    safe: bool,
    generated_at: DateTime<Utc>,
}

impl TerminationPreview {
    /// Classify every member of the batch.
    pub fn build(
        batch: CandidateBatch,
        classifier: &SafetyClassifier,
        processes: &dyn ProcessInspector,
    ) -> Self {
        let own_session = batch.own_session();
        let entries: Vec<SessionPreview> = batch
            .records()
            .iter()
            .map(|record| {
                let verdict = classifier.classify(record, own_session, processes);
                debug!(
                    stage = %Stage::Preview,
                    session_id = %record.id,
                    safe = verdict.safe,
                    reasons = verdict.reasons.len(),
                    "classified session"
                );
                SessionPreview {
                    record: record.clone(),
                    verdict,
                }
            })
            .collect();
        let safe = entries.iter().all(|e| e.verdict.safe);
        info!(
            stage = %Stage::Preview,
            sessions = entries.len(),
            unsafe_sessions = entries.iter().filter(|e| !e.verdict.safe).count(),
            safe,
            "preview built"
        );
        Self {
            batch,
            own_session,
            entries,
            safe,
            generated_at: Utc::now(),
        }
    }

    pub fn is_safe(&self) -> bool {
        self.safe
    }

    pub fn entries(&self) -> &[SessionPreview] {
        &self.entries
    }

    pub fn batch(&self) -> &CandidateBatch {
        &self.batch
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.batch.ids()
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    /// Every triggered reason, batch order then rule order.
    pub fn unsafe_reasons(&self) -> Vec<(SessionId, &SafetyReason)> {
        self.entries
            .iter()
            .flat_map(|e| e.verdict.reasons.iter().map(move |r| (e.record.id, r)))
            .collect()
    }

    pub(crate) fn into_batch(self) -> CandidateBatch {
        self.batch
    }

    /// Operator-facing table plus the safety summary.
    pub fn render_human(&self) -> String {
        let mut lines = Vec::with_capacity(self.entries.len() + 8);
        lines.push(format!(
            "Termination preview: {} session(s), own session {} excluded",
            self.entries.len(),
            self.own_session
        ));
        lines.push(String::new());
        lines.push(format!(
            "{:<10} {:<16} {:<14} {:<16} {:<20} {:<8} {:<8} {:<10} {:<8} PROCESS",
            "SESSION", "USER", "DATABASE", "CLIENT", "CONNECTED", "STATUS", "PID", "OS-USER", "VERDICT"
        ));
        for entry in &self.entries {
            let r = &entry.record;
            let pid = r.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string());
            let process = match &entry.verdict.process {
                ProcessCheck::NoPid => "-".to_string(),
                ProcessCheck::Inspected { info } => format!("{} ({})", info.command, info.owner),
                ProcessCheck::Skipped { .. } => "unavailable".to_string(),
            };
            lines.push(format!(
                "{:<10} {:<16} {:<14} {:<16} {:<20} {:<8} {:<8} {:<10} {:<8} {}",
                r.id,
                r.username,
                r.database,
                r.client_ip,
                r.connected_at.format("%Y-%m-%d %H:%M:%S"),
                r.status,
                pid,
                r.client_os_user.as_deref().unwrap_or("-"),
                if entry.verdict.safe { "safe" } else { "UNSAFE" },
                process,
            ));
        }
        lines.push(String::new());
        if self.safe {
            lines.push("Verdict: safe. No safety rule triggered.".to_string());
        } else {
            lines.push("Verdict: UNSAFE. Terminating requires a safety override.".to_string());
            for (id, reason) in self.unsafe_reasons() {
                lines.push(format!("  session {}: {}", id, reason));
            }
        }
        lines.join("\n")
    }
}
