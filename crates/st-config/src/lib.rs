//! Session Triage policy loading and validation.
//!
//! This crate provides:
//! - Typed Rust structs for policy.json
//! - Policy resolution (CLI → env → XDG → /etc → defaults)
//! - Semantic validation
//! - Content hashing for provenance

pub mod load;
pub mod policy;
pub mod resolve;
pub mod validate;

pub use load::{load_policy, ConfigError, PolicyProvenance, ResolvedPolicy};
pub use policy::{ExecutorSettings, Policy, SafetyRules, SourceSettings, VerificationSettings};
pub use resolve::{resolve_policy_path, ConfigSource, PolicyPath};
pub use validate::{validate_policy, ValidationError, ValidationResult};

/// Schema version for configuration files.
pub const CONFIG_SCHEMA_VERSION: &str = "1.0.0";
