//! Confirmation gate.
//!
//! A staged text dialogue that turns a [`TerminationPreview`] into a
//! [`CommittedBatch`]. Any answer other than the exact token expected at a
//! stage cancels, and cancellation consumes the preview.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use st_common::{SessionId, SessionRecord};
use std::fmt;
use tracing::{debug, info};

use crate::logging::Stage;
use crate::preview::TerminationPreview;
use crate::prompt::Prompter;

pub const FORCE_KEYWORD: &str = "FORCE";
pub const CONFIRM_KEYWORD: &str = "CONFIRM";
pub const RISK_KEYWORD: &str = "I UNDERSTAND THE RISKS";

/// Stage at which the operator answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStage {
    SafetyOverride,
    Proceed,
    FinalConfirmation,
}

impl fmt::Display for GateStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GateStage::SafetyOverride => "safety_override",
            GateStage::Proceed => "proceed",
            GateStage::FinalConfirmation => "final_confirmation",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum GateState {
    Previewed,
    SafetyOverrideRequired,
    ProceedRequested,
    FirstKeywordConfirmed,
    SecondYesNoConfirmed,
    Committed,
    Cancelled { at: GateStage },
}

impl GateState {
    pub fn is_terminal(self) -> bool {
        matches!(self, GateState::Committed | GateState::Cancelled { .. })
    }

    /// The question asked in this state, if it waits for the operator.
    pub fn prompt(self, unsafe_batch: bool, sessions: usize) -> Option<String> {
        match self {
            GateState::SafetyOverrideRequired => Some(format!(
                "Batch is UNSAFE. Type {} to override the safety checks: ",
                FORCE_KEYWORD
            )),
            GateState::ProceedRequested => Some(format!(
                "Type {} to terminate {} session(s): ",
                proceed_keyword(unsafe_batch),
                sessions
            )),
            GateState::FirstKeywordConfirmed => {
                Some(format!("Terminate {} session(s) now? [y/N]: ", sessions))
            }
            _ => None,
        }
    }
}

/// Keyword required at the proceed stage.
pub fn proceed_keyword(unsafe_batch: bool) -> &'static str {
    if unsafe_batch {
        RISK_KEYWORD
    } else {
        CONFIRM_KEYWORD
    }
}

/// One transition. `None` input means no answer will come and cancels any
/// waiting state. States that do not wait ignore the input.
pub fn advance(state: GateState, unsafe_batch: bool, input: Option<&str>) -> GateState {
    let answer = input.map(str::trim);
    match state {
        GateState::Previewed => {
            if unsafe_batch {
                GateState::SafetyOverrideRequired
            } else {
                GateState::ProceedRequested
            }
        }
        GateState::SafetyOverrideRequired => match answer {
            Some(FORCE_KEYWORD) => GateState::ProceedRequested,
            _ => GateState::Cancelled {
                at: GateStage::SafetyOverride,
            },
        },
        GateState::ProceedRequested => {
            if answer == Some(proceed_keyword(unsafe_batch)) {
                GateState::FirstKeywordConfirmed
            } else {
                GateState::Cancelled {
                    at: GateStage::Proceed,
                }
            }
        }
        GateState::FirstKeywordConfirmed => match answer {
            Some(a) if a.eq_ignore_ascii_case("y") || a.eq_ignore_ascii_case("yes") => {
                GateState::SecondYesNoConfirmed
            }
            _ => GateState::Cancelled {
                at: GateStage::FinalConfirmation,
            },
        },
        GateState::SecondYesNoConfirmed => GateState::Committed,
        terminal => terminal,
    }
}

/// A batch the operator has fully confirmed. Only the gate creates one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommittedBatch {
    records: Vec<SessionRecord>,
    own_session: SessionId,
    was_unsafe: bool,
    committed_at: DateTime<Utc>,
}

impl CommittedBatch {
    pub fn records(&self) -> &[SessionRecord] {
        &self.records
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.records.iter().map(|r| r.id).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whether the operator overrode an unsafe verdict.
    pub fn was_unsafe(&self) -> bool {
        self.was_unsafe
    }

    pub fn committed_at(&self) -> DateTime<Utc> {
        self.committed_at
    }

    /// Members whose id is in `keep`, in batch order. `None` when nothing is
    /// left. Used for the single verification retry.
    pub fn subset(&self, keep: &[SessionId]) -> Option<CommittedBatch> {
        let records: Vec<SessionRecord> = self
            .records
            .iter()
            .filter(|r| keep.contains(&r.id))
            .cloned()
            .collect();
        if records.is_empty() {
            return None;
        }
        Some(CommittedBatch {
            records,
            own_session: self.own_session,
            was_unsafe: self.was_unsafe,
            committed_at: self.committed_at,
        })
    }
}

/// Operator declined at some stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cancellation {
    pub stage: GateStage,
    pub batch_ids: Vec<SessionId>,
    pub unsafe_batch: bool,
    /// False when input ended instead of a wrong answer.
    pub answered: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    Committed(CommittedBatch),
    Cancelled(Cancellation),
}

pub struct ConfirmationGate;

impl ConfirmationGate {
    /// Run the dialogue to a terminal state.
    pub fn run(preview: TerminationPreview, prompter: &mut dyn Prompter) -> GateOutcome {
        let unsafe_batch = !preview.is_safe();
        let sessions = preview.entries().len();
        let mut state = GateState::Previewed;
        let mut answered = true;

        while !state.is_terminal() {
            let input = match state.prompt(unsafe_batch, sessions) {
                Some(question) => {
                    let reply = prompter.ask(&question);
                    answered = reply.is_some();
                    reply
                }
                None => None,
            };
            let next = advance(state, unsafe_batch, input.as_deref());
            debug!(stage = %Stage::Gate, from = ?state, to = ?next, "gate transition");
            state = next;
        }

        let batch = preview.into_batch();
        match state {
            GateState::Cancelled { at } => {
                info!(
                    stage = %Stage::Gate,
                    at = %at,
                    sessions,
                    unsafe_batch,
                    answered,
                    "termination cancelled by operator"
                );
                GateOutcome::Cancelled(Cancellation {
                    stage: at,
                    batch_ids: batch.ids(),
                    unsafe_batch,
                    answered,
                })
            }
            _ => {
                info!(stage = %Stage::Gate, sessions, unsafe_batch, "batch committed");
                let own_session = batch.own_session();
                GateOutcome::Committed(CommittedBatch {
                    records: batch.records().to_vec(),
                    own_session,
                    was_unsafe: unsafe_batch,
                    committed_at: Utc::now(),
                })
            }
        }
    }
}
