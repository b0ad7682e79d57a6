//! Session Triage common types, IDs, and errors.
//!
//! This crate provides foundational types shared across the workspace:
//! - Appliance session and OS process identifiers
//! - The `SessionRecord` observed from the metadata source
//! - Unified error type with categories and remediation hints
//! - Output format specifications

pub mod error;
pub mod id;
pub mod output;
pub mod session;

pub use error::{Error, ErrorCategory, Result, SuggestedAction};
pub use id::{ParseIdError, ProcessId, SessionId};
pub use output::OutputFormat;
pub use session::{ProcessInfo, SessionRecord};

/// Schema version for JSON command payloads.
pub const SCHEMA_VERSION: &str = "1.0.0";
