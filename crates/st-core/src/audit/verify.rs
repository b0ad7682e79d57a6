//! Audit log integrity verification.

use super::entry::{AuditEntry, AUDIT_SCHEMA_VERSION};
use super::writer::GENESIS_HASH;
use super::AuditError;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

#[derive(Debug, Clone, Serialize)]
pub struct VerificationResult {
    pub is_valid: bool,

    pub entries_verified: u64,

    /// Hash of all entry hashes, in order.
    pub state_hash: String,

    /// First broken link in the chain, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broken_link: Option<BrokenLink>,

    /// Entries whose self-hash does not match their content.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tampered_entries: Vec<TamperedEntry>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub schema_warnings: Vec<SchemaWarning>,
}

impl VerificationResult {
    fn empty() -> Self {
        Self {
            is_valid: true,
            entries_verified: 0,
            state_hash: "empty".to_string(),
            broken_link: None,
            tampered_entries: Vec::new(),
            schema_warnings: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BrokenLink {
    /// 1-indexed.
    pub line: usize,
    pub expected: String,
    pub actual: String,
    pub break_type: BreakType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakType {
    ChainMismatch,
    InvalidGenesis,
}

#[derive(Debug, Clone, Serialize)]
pub struct TamperedEntry {
    pub line: usize,
    pub stored_hash: String,
    pub computed_hash: String,
    pub event_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchemaWarning {
    pub line: usize,
    pub version: String,
    pub expected: String,
}

/// Check every self-hash and every chain link of the log at `path`.
///
/// A missing file is an empty, valid log.
pub fn verify_log(path: &Path) -> Result<VerificationResult, AuditError> {
    if !path.exists() {
        return Ok(VerificationResult::empty());
    }

    let file = File::open(path).map_err(|e| AuditError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;

    let reader = BufReader::new(file);
    let mut entries_verified = 0u64;
    let mut prev_hash = GENESIS_HASH.to_string();
    let mut broken_link: Option<BrokenLink> = None;
    let mut tampered_entries = Vec::new();
    let mut schema_warnings = Vec::new();
    let mut combined_hashes = String::new();

    for (line_idx, line_result) in reader.lines().enumerate() {
        let line_num = line_idx + 1;

        let line = line_result.map_err(|e| AuditError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        if line.trim().is_empty() {
            continue;
        }

        let entry: AuditEntry =
            serde_json::from_str(&line).map_err(|e| AuditError::Parse {
                line: line_num,
                source: e,
            })?;

        if entry.schema_version != AUDIT_SCHEMA_VERSION {
            schema_warnings.push(SchemaWarning {
                line: line_num,
                version: entry.schema_version.clone(),
                expected: AUDIT_SCHEMA_VERSION.to_string(),
            });
        }

        if !entry.verify_hash() {
            tampered_entries.push(TamperedEntry {
                line: line_num,
                stored_hash: entry.entry_hash.clone().unwrap_or_default(),
                computed_hash: entry.content_hash(),
                event_type: entry.event_type.to_string(),
            });
        }

        // Only the first break is reported.
        if broken_link.is_none() && entry.prev_hash != prev_hash {
            let break_type = if entries_verified == 0 {
                BreakType::InvalidGenesis
            } else {
                BreakType::ChainMismatch
            };
            broken_link = Some(BrokenLink {
                line: line_num,
                expected: prev_hash.clone(),
                actual: entry.prev_hash.clone(),
                break_type,
            });
        }

        if let Some(ref hash) = entry.entry_hash {
            prev_hash = hash.clone();
            combined_hashes.push_str(hash);
        }
        entries_verified += 1;
    }

    let state_hash = if combined_hashes.is_empty() {
        "empty".to_string()
    } else {
        hex::encode(Sha256::digest(combined_hashes.as_bytes()))
    };

    Ok(VerificationResult {
        is_valid: broken_link.is_none() && tampered_entries.is_empty(),
        entries_verified,
        state_hash,
        broken_link,
        tampered_entries,
        schema_warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditContext, AuditLog, AuditSink};
    use crate::gate::{Cancellation, GateStage};
    use st_common::SessionId;
    use tempfile::TempDir;

    fn write_entries(dir: &Path, n: u64) -> std::path::PathBuf {
        let mut log = AuditLog::open_in(dir, AuditContext::new("run-test", "host-test")).unwrap();
        for i in 0..n {
            log.record_cancellation(&Cancellation {
                stage: GateStage::FinalConfirmation,
                batch_ids: vec![SessionId(100 + i)],
                unsafe_batch: false,
                answered: true,
            })
            .unwrap();
        }
        log.path().to_path_buf()
    }

    #[test]
    fn missing_file_is_valid_and_empty() {
        let tmp = TempDir::new().unwrap();
        let result = verify_log(&tmp.path().join("audit.jsonl")).unwrap();
        assert!(result.is_valid);
        assert_eq!(result.entries_verified, 0);
        assert_eq!(result.state_hash, "empty");
    }

    #[test]
    fn intact_log_verifies() {
        let tmp = TempDir::new().unwrap();
        let path = write_entries(tmp.path(), 3);
        let result = verify_log(&path).unwrap();
        assert!(result.is_valid);
        assert_eq!(result.entries_verified, 3);
        assert_ne!(result.state_hash, "empty");
    }

    #[test]
    fn edited_entry_is_reported_as_tampered() {
        let tmp = TempDir::new().unwrap();
        let path = write_entries(tmp.path(), 2);
        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
        let mut second: serde_json::Value = serde_json::from_str(&lines[1]).unwrap();
        second["details"]["batch_ids"] = serde_json::json!([999]);
        lines[1] = serde_json::to_string(&second).unwrap();
        std::fs::write(&path, lines.join("\n")).unwrap();

        let result = verify_log(&path).unwrap();
        assert!(!result.is_valid);
        assert_eq!(result.tampered_entries.len(), 1);
        assert_eq!(result.tampered_entries[0].line, 2);
    }

    #[test]
    fn removed_entry_breaks_the_chain() {
        let tmp = TempDir::new().unwrap();
        let path = write_entries(tmp.path(), 3);
        let content = std::fs::read_to_string(&path).unwrap();
        let kept: Vec<&str> = content.lines().enumerate().filter(|(i, _)| *i != 1).map(|(_, l)| l).collect();
        std::fs::write(&path, kept.join("\n")).unwrap();

        let result = verify_log(&path).unwrap();
        assert!(!result.is_valid);
        let link = result.broken_link.unwrap();
        assert_eq!(link.line, 2);
        assert_eq!(link.break_type, BreakType::ChainMismatch);
        assert!(result.tampered_entries.is_empty());
    }

    #[test]
    fn first_entry_must_start_at_genesis() {
        let tmp = TempDir::new().unwrap();
        let path = write_entries(tmp.path(), 2);
        let content = std::fs::read_to_string(&path).unwrap();
        let second = content.lines().nth(1).unwrap().to_string();
        std::fs::write(&path, second).unwrap();

        let result = verify_log(&path).unwrap();
        assert_eq!(result.broken_link.unwrap().break_type, BreakType::InvalidGenesis);
    }
}
