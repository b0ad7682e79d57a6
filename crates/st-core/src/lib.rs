//! Session Triage core library.
//!
//! The session-termination safety pipeline for a data-warehouse appliance
//! console:
//! - Session discovery through structured, parameterized filters
//! - Per-session safety classification
//! - Preview, staged confirmation, and execution of aborts
//! - Post-termination verification with one bounded retry
//! - Hash-chained audit log
//!
//! The binary entry point is in `main.rs`.

pub mod action;
pub mod audit;
pub mod batch;
pub mod collect;
pub mod exit_codes;
pub mod gate;
pub mod logging;
pub mod pipeline;
pub mod preview;
pub mod prompt;
pub mod safety;
pub mod verify;

#[cfg(test)]
mod test_utils;

pub use batch::{BatchError, CandidateBatch};
pub use gate::{CommittedBatch, ConfirmationGate, GateOutcome};
pub use pipeline::{Pipeline, PipelineError, PipelineOptions, PipelineReport, Prepared};
pub use preview::TerminationPreview;
