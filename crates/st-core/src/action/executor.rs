//! Termination executor.
//!
//! Takes only a [`CommittedBatch`], so nothing reaches the abort mechanism
//! without passing the confirmation gate.

use serde::Serialize;
use st_common::{ProcessId, SessionId, SessionRecord};
use std::time::Instant;
use tracing::{info, warn};

use super::abort::{AbortError, AbortMechanism, SessionAborter};
use crate::gate::CommittedBatch;
use crate::logging::Stage;

/// Status of a single abort attempt.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Terminated,
    Failed,
    Timeout,
    PermissionDenied,
    UtilityMissing,
}

impl AttemptStatus {
    pub fn is_terminated(self) -> bool {
        self == AttemptStatus::Terminated
    }
}

/// Details captured before the abort call, for the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionDetails {
    pub session_id: SessionId,
    pub username: String,
    pub database: String,
    pub client_ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<ProcessId>,
}

impl From<&SessionRecord> for SessionDetails {
    fn from(record: &SessionRecord) -> Self {
        Self {
            session_id: record.id,
            username: record.username.clone(),
            database: record.database.clone(),
            client_ip: record.client_ip.clone(),
            pid: record.pid,
        }
    }
}

/// Per-session result with timing and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptResult {
    pub details: SessionDetails,
    pub status: AttemptStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mechanism: Option<AbortMechanism>,
    pub time_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExecutionSummary {
    pub attempted: usize,
    pub terminated: usize,
    pub failed: usize,
}

/// Result of one executor run, in batch order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    pub summary: ExecutionSummary,
    pub outcomes: Vec<AttemptResult>,
}

impl ExecutionResult {
    pub fn terminated(&self) -> Vec<SessionId> {
        self.outcomes
            .iter()
            .filter(|o| o.status.is_terminated())
            .map(|o| o.details.session_id)
            .collect()
    }

    pub fn failed(&self) -> Vec<SessionId> {
        self.outcomes
            .iter()
            .filter(|o| !o.status.is_terminated())
            .map(|o| o.details.session_id)
            .collect()
    }

    pub fn outcome(&self, id: SessionId) -> Option<&AttemptResult> {
        self.outcomes.iter().find(|o| o.details.session_id == id)
    }
}

/// Runs aborts sequentially, in batch order, never short-circuiting.
pub struct TerminationExecutor<'a> {
    aborter: &'a dyn SessionAborter,
}

impl<'a> TerminationExecutor<'a> {
    pub fn new(aborter: &'a dyn SessionAborter) -> Self {
        Self { aborter }
    }

    pub fn execute(&self, batch: &CommittedBatch) -> ExecutionResult {
        let mut outcomes = Vec::with_capacity(batch.len());
        let mut terminated = 0;
        let mut failed = 0;

        for record in batch.records() {
            let details = SessionDetails::from(record);
            let start = Instant::now();
            let result = self.aborter.abort(record.id);
            let time_ms = start.elapsed().as_millis();

            let outcome = match result {
                Ok(output) => {
                    terminated += 1;
                    info!(
                        stage = %Stage::Execute,
                        session_id = %record.id,
                        pid = ?record.pid,
                        mechanism = ?output.mechanism,
                        time_ms = time_ms as u64,
                        "session aborted"
                    );
                    AttemptResult {
                        details,
                        status: AttemptStatus::Terminated,
                        mechanism: Some(output.mechanism),
                        time_ms,
                        diagnostic: (!output.diagnostic.is_empty()).then_some(output.diagnostic),
                    }
                }
                Err(err) => {
                    failed += 1;
                    warn!(
                        stage = %Stage::Execute,
                        session_id = %record.id,
                        pid = ?record.pid,
                        error = %err,
                        "session abort failed"
                    );
                    AttemptResult {
                        details,
                        status: status_from_error(&err),
                        mechanism: None,
                        time_ms,
                        diagnostic: Some(err.to_string()),
                    }
                }
            };
            outcomes.push(outcome);
        }

        info!(
            stage = %Stage::Execute,
            attempted = outcomes.len(),
            terminated,
            failed,
            "batch executed"
        );

        ExecutionResult {
            summary: ExecutionSummary {
                attempted: outcomes.len(),
                terminated,
                failed,
            },
            outcomes,
        }
    }
}

fn status_from_error(err: &AbortError) -> AttemptStatus {
    match err {
        AbortError::UtilityMissing(_) => AttemptStatus::UtilityMissing,
        AbortError::Failed(_) => AttemptStatus::Failed,
        AbortError::Timeout(_) => AttemptStatus::Timeout,
        AbortError::PermissionDenied(_) => AttemptStatus::PermissionDenied,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::abort::ScriptedAborter;
    use crate::collect::source::StaticSessionSource;
    use crate::test_utils::{commit, SessionBuilder};

    #[test]
    fn failures_do_not_stop_the_batch() {
        let records: Vec<_> = (1..=3).map(|i| SessionBuilder::new(i).pid(4000 + i as u32).build()).collect();
        let source = StaticSessionSource::new(records.clone(), Some(SessionId(99)));
        let aborter = ScriptedAborter::new(source.clone()).fail(SessionId(3), "session busy", 1);
        let batch = commit(records, SessionId(99));

        let result = TerminationExecutor::new(&aborter).execute(&batch);

        assert_eq!(aborter.calls(), vec![SessionId(3), SessionId(2), SessionId(1)]);
        assert_eq!(result.summary, ExecutionSummary { attempted: 3, terminated: 2, failed: 1 });
        assert_eq!(result.terminated(), vec![SessionId(2), SessionId(1)]);
        assert_eq!(result.failed(), vec![SessionId(3)]);
        let failed = result.outcome(SessionId(3)).unwrap();
        assert_eq!(failed.status, AttemptStatus::Failed);
        assert_eq!(failed.details.pid, Some(ProcessId(4003)));
        assert!(failed.diagnostic.as_deref().unwrap().contains("session busy"));
        assert!(source.contains(SessionId(3)));
    }

    #[test]
    fn details_are_captured_before_the_abort() {
        let records = vec![SessionBuilder::new(7).user("BI_READER").database("MART").build()];
        let source = StaticSessionSource::new(records.clone(), Some(SessionId(99)));
        let aborter = ScriptedAborter::new(source);
        let result = TerminationExecutor::new(&aborter).execute(&commit(records, SessionId(99)));
        let outcome = &result.outcomes[0];
        assert_eq!(outcome.details.username, "BI_READER");
        assert_eq!(outcome.details.database, "MART");
        assert_eq!(outcome.mechanism, Some(AbortMechanism::Scripted));
    }
}
