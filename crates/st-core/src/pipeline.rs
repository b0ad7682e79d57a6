//! The termination safety pipeline.
//!
//! Inspector → Classifier → Preview → Gate → Executor → Verification →
//! Audit. [`Pipeline::prepare`] runs up to the preview so the caller can show
//! it; [`Pipeline::execute`] consumes the preview and runs the rest.

use serde::Serialize;
use st_common::SessionId;
use st_config::{Policy, SafetyRules};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::action::{AbortError, SessionAborter, TerminationExecutor};
use crate::audit::{AuditRecord, AuditSink};
use crate::batch::{BatchError, CandidateBatch};
use crate::collect::filter::SessionFilter;
use crate::collect::inspector::{InspectError, InspectOutcome, SessionInspector};
use crate::collect::process::ProcessInspector;
use crate::collect::source::SessionSource;
use crate::exit_codes::ExitCode;
use crate::gate::{Cancellation, ConfirmationGate, GateOutcome};
use crate::logging::Stage;
use crate::preview::TerminationPreview;
use crate::prompt::Prompter;
use crate::safety::SafetyClassifier;
use crate::verify::{execute_and_verify, BatchResult, Verifier};

/// Errors that end a request before anything is terminated.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("termination requires at least one filter predicate")]
    EmptyFilter,

    #[error(transparent)]
    Inspect(#[from] InspectError),

    #[error(transparent)]
    Batch(#[from] BatchError),

    #[error("termination utility unavailable: {0}")]
    UtilityUnavailable(AbortError),
}

impl From<PipelineError> for st_common::Error {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::EmptyFilter => st_common::Error::InvalidInput(
                "termination requires at least one filter predicate".to_string(),
            ),
            PipelineError::Inspect(e) => e.into(),
            PipelineError::Batch(e) => e.into(),
            PipelineError::UtilityUnavailable(AbortError::PermissionDenied(m)) => {
                st_common::Error::PermissionDenied(m)
            }
            PipelineError::UtilityUnavailable(e) => {
                st_common::Error::UtilityUnavailable(e.to_string())
            }
        }
    }
}

/// Result of the inspection half.
#[derive(Debug)]
pub enum Prepared {
    NoCandidates {
        own_session: SessionId,
        excluded_own: bool,
    },
    Preview(TerminationPreview),
}

/// Whether the audit record made it to the sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AuditStatus {
    Written,
    Disabled,
    Failed { error: String },
}

/// How a request ended once a preview existed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PipelineReport {
    Cancelled {
        cancellation: Cancellation,
        audit: AuditStatus,
    },
    Executed {
        batch_ids: Vec<SessionId>,
        safety_override: bool,
        result: BatchResult,
        audit: AuditStatus,
    },
}

impl PipelineReport {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            PipelineReport::Cancelled { .. } => ExitCode::Cancelled,
            PipelineReport::Executed { result, audit, .. } => {
                if !result.all_terminated() {
                    ExitCode::PartialFail
                } else if matches!(audit, AuditStatus::Failed { .. }) {
                    ExitCode::AuditBroken
                } else {
                    ExitCode::AllTerminated
                }
            }
        }
    }

    pub fn audit(&self) -> &AuditStatus {
        match self {
            PipelineReport::Cancelled { audit, .. } | PipelineReport::Executed { audit, .. } => audit,
        }
    }
}

/// Tunables taken from the verification section of the policy.
#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub settling_delay: Duration,
    pub offer_retry: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            settling_delay: Duration::from_secs(3),
            offer_retry: true,
        }
    }
}

impl PipelineOptions {
    pub fn from_policy(policy: &Policy) -> Self {
        Self {
            settling_delay: Duration::from_secs(policy.verification.settling_delay_secs),
            offer_retry: policy.verification.offer_retry,
        }
    }
}

/// One pipeline instance per operator request.
pub struct Pipeline<'a> {
    source: &'a dyn SessionSource,
    processes: &'a dyn ProcessInspector,
    classifier: SafetyClassifier,
    options: PipelineOptions,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        source: &'a dyn SessionSource,
        processes: &'a dyn ProcessInspector,
        rules: &SafetyRules,
        options: PipelineOptions,
    ) -> Self {
        Self {
            source,
            processes,
            classifier: SafetyClassifier::new(rules),
            options,
        }
    }

    /// Inspect, classify, and build the preview. Never mutates anything.
    pub fn prepare(&self, filter: &SessionFilter) -> Result<Prepared, PipelineError> {
        if filter.is_empty() {
            return Err(PipelineError::EmptyFilter);
        }
        let inspection = match SessionInspector::new(self.source).inspect(filter)? {
            InspectOutcome::NoCandidates {
                own_session,
                excluded_own,
            } => {
                info!(stage = %Stage::Preview, excluded_own, "no candidates");
                return Ok(Prepared::NoCandidates {
                    own_session,
                    excluded_own,
                });
            }
            InspectOutcome::Candidates(inspection) => inspection,
        };
        let batch = CandidateBatch::from_inspection(inspection)?;
        Ok(Prepared::Preview(TerminationPreview::build(
            batch,
            &self.classifier,
            self.processes,
        )))
    }

    /// Gate, execute, verify with at most one retry, and audit.
    ///
    /// The abort mechanism is probed before the operator is asked anything.
    pub fn execute(
        &self,
        preview: TerminationPreview,
        aborter: &dyn SessionAborter,
        prompter: &mut dyn Prompter,
        audit: Option<&mut dyn AuditSink>,
    ) -> Result<PipelineReport, PipelineError> {
        aborter.probe().map_err(|e| {
            warn!(stage = %Stage::Execute, error = %e, "abort mechanism unavailable");
            PipelineError::UtilityUnavailable(e)
        })?;

        let batch = match ConfirmationGate::run(preview, prompter) {
            GateOutcome::Cancelled(cancellation) => {
                let audit = write_audit(audit, |sink| sink.record_cancellation(&cancellation));
                return Ok(PipelineReport::Cancelled {
                    cancellation,
                    audit,
                });
            }
            GateOutcome::Committed(batch) => batch,
        };

        let executor = TerminationExecutor::new(aborter);
        let verifier = Verifier::new(self.source, self.processes, self.options.settling_delay);
        let result = execute_and_verify(
            &batch,
            &executor,
            &verifier,
            self.options.offer_retry,
            prompter,
        );

        let record = AuditRecord::new(&batch, &result);
        let audit = write_audit(audit, |sink| sink.record_batch(&record));

        Ok(PipelineReport::Executed {
            batch_ids: batch.ids(),
            safety_override: batch.was_unsafe(),
            result,
            audit,
        })
    }
}

fn write_audit(
    sink: Option<&mut dyn AuditSink>,
    write: impl FnOnce(&mut dyn AuditSink) -> Result<(), crate::audit::AuditError>,
) -> AuditStatus {
    let Some(sink) = sink else {
        return AuditStatus::Disabled;
    };
    match write(sink) {
        Ok(()) => AuditStatus::Written,
        Err(e) => {
            warn!(stage = %Stage::Audit, error = %e, "audit write failed; outcome stands");
            AuditStatus::Failed {
                error: e.to_string(),
            }
        }
    }
}
