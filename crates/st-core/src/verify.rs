//! Post-termination verification and the single retry.
//!
//! Verification only observes: it re-queries the metadata source for each
//! targeted id after a settling delay and re-checks process liveness for
//! sessions that are still there.

use serde::{Deserialize, Serialize};
use st_common::{ProcessId, SessionId};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::action::{ExecutionResult, SessionDetails, TerminationExecutor};
use crate::collect::inspector::SessionInspector;
use crate::collect::process::ProcessInspector;
use crate::collect::source::SessionSource;
use crate::gate::CommittedBatch;
use crate::logging::Stage;
use crate::prompt::Prompter;

/// Observed state of one targeted session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Gone,
    StillActive {
        #[serde(skip_serializing_if = "Option::is_none")]
        pid: Option<ProcessId>,
        /// `None` when liveness cannot be determined.
        #[serde(skip_serializing_if = "Option::is_none")]
        pid_alive: Option<bool>,
    },
    /// The source could not answer for this session.
    Unknown { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionCheck {
    pub session_id: SessionId,
    #[serde(flatten)]
    pub state: SessionState,
}

/// One verification pass, in batch order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
    pub checks: Vec<SessionCheck>,
}

impl VerificationReport {
    pub fn still_active(&self) -> Vec<SessionId> {
        self.ids_where(|s| matches!(s, SessionState::StillActive { .. }))
    }

    pub fn gone(&self) -> Vec<SessionId> {
        self.ids_where(|s| matches!(s, SessionState::Gone))
    }

    pub fn unknown(&self) -> Vec<SessionId> {
        self.ids_where(|s| matches!(s, SessionState::Unknown { .. }))
    }

    pub fn state(&self, id: SessionId) -> Option<&SessionState> {
        self.checks
            .iter()
            .find(|c| c.session_id == id)
            .map(|c| &c.state)
    }

    fn ids_where(&self, pred: impl Fn(&SessionState) -> bool) -> Vec<SessionId> {
        self.checks
            .iter()
            .filter(|c| pred(&c.state))
            .map(|c| c.session_id)
            .collect()
    }
}

/// Re-queries targeted sessions after the settling delay.
pub struct Verifier<'a> {
    inspector: SessionInspector<'a>,
    processes: &'a dyn ProcessInspector,
    settling_delay: Duration,
}

impl<'a> Verifier<'a> {
    pub fn new(
        source: &'a dyn SessionSource,
        processes: &'a dyn ProcessInspector,
        settling_delay: Duration,
    ) -> Self {
        Self {
            inspector: SessionInspector::new(source),
            processes,
            settling_delay,
        }
    }

    pub fn verify(&self, ids: &[SessionId]) -> VerificationReport {
        if !self.settling_delay.is_zero() {
            debug!(stage = %Stage::Verify, delay_ms = self.settling_delay.as_millis() as u64, "settling");
            thread::sleep(self.settling_delay);
        }

        let checks: Vec<SessionCheck> = ids
            .iter()
            .map(|&id| {
                let state = match self.inspector.lookup(id) {
                    Ok(None) => SessionState::Gone,
                    Ok(Some(record)) => SessionState::StillActive {
                        pid: record.pid,
                        pid_alive: record.pid.and_then(|pid| self.processes.is_alive(pid)),
                    },
                    Err(e) => {
                        warn!(stage = %Stage::Verify, session_id = %id, error = %e, "verification lookup failed");
                        SessionState::Unknown {
                            reason: e.to_string(),
                        }
                    }
                };
                debug!(stage = %Stage::Verify, session_id = %id, state = ?state, "verified session");
                SessionCheck {
                    session_id: id,
                    state,
                }
            })
            .collect();

        let report = VerificationReport { checks };
        info!(
            stage = %Stage::Verify,
            gone = report.gone().len(),
            still_active = report.still_active().len(),
            unknown = report.unknown().len(),
            "verification complete"
        );
        report
    }
}

/// Final per-session outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationOutcome {
    Terminated,
    Failed,
    StillActive,
    /// Verification could not observe the session.
    Unknown,
}

impl TerminationOutcome {
    fn derive(aborted: bool, state: Option<&SessionState>) -> Self {
        match state {
            Some(SessionState::StillActive { .. }) => TerminationOutcome::StillActive,
            Some(SessionState::Unknown { .. }) | None => TerminationOutcome::Unknown,
            Some(SessionState::Gone) if aborted => TerminationOutcome::Terminated,
            Some(SessionState::Gone) => TerminationOutcome::Failed,
        }
    }
}

/// Counts for a result. `terminated` and `failed` come from the abort
/// attempts, `still_active` and `unknown` from verification, so one session
/// can be both failed and still active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub terminated: usize,
    pub failed: usize,
    pub still_active: usize,
    pub unknown: usize,
}

impl OutcomeCounts {
    pub fn from_pass(execution: &ExecutionResult, verification: &VerificationReport) -> Self {
        Self {
            terminated: execution.summary.terminated,
            failed: execution.summary.failed,
            still_active: verification.still_active().len(),
            unknown: verification.unknown().len(),
        }
    }
}

/// Per-session line of the final result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionResult {
    pub details: SessionDetails,
    pub outcome: TerminationOutcome,
    /// The session was part of the retry pass.
    pub retried: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetryPass {
    pub execution: ExecutionResult,
    pub verification: VerificationReport,
}

/// What happened when the caller was offered a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryDecision {
    NotNeeded,
    Disabled,
    Declined,
    Accepted,
}

/// Everything after the gate: first pass, optional retry, final outcomes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchResult {
    pub execution: ExecutionResult,
    pub verification: VerificationReport,
    pub counts_before_retry: OutcomeCounts,
    pub retry_decision: RetryDecision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPass>,
    pub sessions: Vec<SessionResult>,
    /// Disjoint tally of `sessions`.
    pub final_counts: OutcomeCounts,
}

impl BatchResult {
    pub fn ids_with(&self, outcome: TerminationOutcome) -> Vec<SessionId> {
        self.sessions
            .iter()
            .filter(|s| s.outcome == outcome)
            .map(|s| s.details.session_id)
            .collect()
    }

    /// Every session terminated and verified gone.
    pub fn all_terminated(&self) -> bool {
        self.sessions
            .iter()
            .all(|s| s.outcome == TerminationOutcome::Terminated)
    }
}

pub fn retry_prompt(still_active: usize) -> String {
    format!(
        "{} session(s) still active. Retry termination once? [y/N]: ",
        still_active
    )
}

/// Execute the committed batch, verify, and offer at most one retry.
pub fn execute_and_verify(
    batch: &CommittedBatch,
    executor: &TerminationExecutor<'_>,
    verifier: &Verifier<'_>,
    offer_retry: bool,
    prompter: &mut dyn Prompter,
) -> BatchResult {
    let execution = executor.execute(batch);
    let verification = verifier.verify(&batch.ids());
    let counts_before_retry = OutcomeCounts::from_pass(&execution, &verification);
    let still_active = verification.still_active();

    let mut retry_decision = if still_active.is_empty() {
        RetryDecision::NotNeeded
    } else if !offer_retry {
        RetryDecision::Disabled
    } else {
        let answer = prompter.ask(&retry_prompt(still_active.len()));
        let accepted = answer
            .as_deref()
            .map(str::trim)
            .is_some_and(|a| a.eq_ignore_ascii_case("y") || a.eq_ignore_ascii_case("yes"));
        if accepted {
            RetryDecision::Accepted
        } else {
            RetryDecision::Declined
        }
    };

    let mut retry = None;
    if retry_decision == RetryDecision::Accepted {
        match batch.subset(&still_active) {
            Some(subset) => {
                info!(stage = %Stage::Verify, sessions = subset.len(), "retrying still-active sessions");
                let execution = executor.execute(&subset);
                let verification = verifier.verify(&subset.ids());
                retry = Some(RetryPass {
                    execution,
                    verification,
                });
            }
            None => retry_decision = RetryDecision::NotNeeded,
        }
    }

    let sessions: Vec<SessionResult> = execution
        .outcomes
        .iter()
        .map(|first| {
            let id = first.details.session_id;
            let retried = retry
                .as_ref()
                .and_then(|r| r.execution.outcome(id).map(|o| (o, &r.verification)));
            let (attempt, report) = retried.unwrap_or((first, &verification));
            let aborted = first.status.is_terminated() || attempt.status.is_terminated();
            SessionResult {
                details: first.details.clone(),
                outcome: TerminationOutcome::derive(aborted, report.state(id)),
                retried: retried.is_some(),
                diagnostic: attempt.diagnostic.clone(),
            }
        })
        .collect();

    let mut final_counts = OutcomeCounts::default();
    for s in &sessions {
        match s.outcome {
            TerminationOutcome::Terminated => final_counts.terminated += 1,
            TerminationOutcome::Failed => final_counts.failed += 1,
            TerminationOutcome::StillActive => final_counts.still_active += 1,
            TerminationOutcome::Unknown => final_counts.unknown += 1,
        }
    }

    BatchResult {
        execution,
        verification,
        counts_before_retry,
        retry_decision,
        retry,
        sessions,
        final_counts,
    }
}
