//! Shared unit-test fixtures.

use chrono::{DateTime, Duration, TimeZone, Utc};
use st_common::{ProcessId, SessionId, SessionRecord};
use st_config::SafetyRules;

use crate::batch::CandidateBatch;
use crate::collect::process::UnavailableProcessInspector;
use crate::gate::{CommittedBatch, ConfirmationGate, GateOutcome};
use crate::preview::TerminationPreview;
use crate::prompt::ScriptedPrompter;
use crate::safety::SafetyClassifier;

/// Fixed reference clock for fixtures.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()
}

/// Builder for session fixtures. Higher ids connect later by default.
#[derive(Debug, Clone)]
pub struct SessionBuilder {
    record: SessionRecord,
}

impl SessionBuilder {
    pub fn new(id: u64) -> Self {
        Self {
            record: SessionRecord {
                id: SessionId(id),
                username: format!("ETL_USER{}", id),
                database: "SALES".to_string(),
                client_ip: "10.20.0.15".to_string(),
                connected_at: base_time() + Duration::seconds(id as i64),
                status: "active".to_string(),
                pid: None,
                client_os_user: None,
                application: None,
            },
        }
    }

    pub fn user(mut self, user: &str) -> Self {
        self.record.username = user.to_string();
        self
    }

    pub fn database(mut self, db: &str) -> Self {
        self.record.database = db.to_string();
        self
    }

    pub fn ip(mut self, ip: &str) -> Self {
        self.record.client_ip = ip.to_string();
        self
    }

    pub fn pid(mut self, pid: u32) -> Self {
        self.record.pid = Some(ProcessId(pid));
        self
    }

    pub fn build(self) -> SessionRecord {
        self.record
    }
}

/// Push `records` through preview and gate with the answers a careful
/// operator would give.
pub fn commit(records: Vec<SessionRecord>, own: SessionId) -> CommittedBatch {
    let batch = CandidateBatch::new(records, own).unwrap();
    let preview = TerminationPreview::build(
        batch,
        &SafetyClassifier::new(&SafetyRules::default()),
        &UnavailableProcessInspector::default(),
    );
    let answers: &[&str] = if preview.is_safe() {
        &["CONFIRM", "y"]
    } else {
        &["FORCE", "I UNDERSTAND THE RISKS", "y"]
    };
    match ConfirmationGate::run(preview, &mut ScriptedPrompter::new(answers.iter().copied())) {
        GateOutcome::Committed(batch) => batch,
        GateOutcome::Cancelled(c) => panic!("fixture batch was cancelled: {:?}", c),
    }
}
