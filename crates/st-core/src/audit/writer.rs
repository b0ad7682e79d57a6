//! Append-only audit log writer with hash chain.

use super::entry::{AuditContext, AuditEntry, AuditEventType, AuditRecord, GateDetails};
use super::{resolve_audit_dir, AuditError, AuditSink, AUDIT_LOG_FILENAME};
use crate::gate::Cancellation;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// The special hash used for the first entry in a new log file.
pub const GENESIS_HASH: &str = "genesis";

/// The audit log writer. Maintains the hash chain across reopenings.
pub struct AuditLog {
    path: PathBuf,
    ctx: AuditContext,
    /// Hash of the last entry written (for chaining).
    last_hash: String,
    entry_count: u64,
    writer: Option<BufWriter<File>>,
}

impl AuditLog {
    /// Open the log in the resolved data directory.
    pub fn open_or_create(ctx: AuditContext) -> Result<Self, AuditError> {
        Self::open_in(resolve_audit_dir()?, ctx)
    }

    /// Open or create `audit.jsonl` inside `audit_dir`.
    pub fn open_in(audit_dir: impl Into<PathBuf>, ctx: AuditContext) -> Result<Self, AuditError> {
        let audit_dir = audit_dir.into();
        std::fs::create_dir_all(&audit_dir).map_err(|e| AuditError::Io {
            path: audit_dir.clone(),
            source: e,
        })?;

        let path = audit_dir.join(AUDIT_LOG_FILENAME);
        let (last_hash, entry_count) = if path.exists() {
            Self::read_last_entry_hash(&path)?
        } else {
            (GENESIS_HASH.to_string(), 0)
        };

        Ok(AuditLog {
            path,
            ctx,
            last_hash,
            entry_count,
            writer: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    pub fn last_hash(&self) -> &str {
        &self.last_hash
    }

    /// Chain, hash, and append one entry.
    pub fn write_entry(&mut self, mut entry: AuditEntry) -> Result<(), AuditError> {
        entry.prev_hash = self.last_hash.clone();
        entry.compute_hash();
        let line = entry.to_jsonl();

        self.ensure_writer_open()?;
        if let Some(ref mut writer) = self.writer {
            writeln!(writer, "{}", line).map_err(|e| AuditError::Io {
                path: self.path.clone(),
                source: e,
            })?;
            writer.flush().map_err(|e| AuditError::Io {
                path: self.path.clone(),
                source: e,
            })?;
        }

        self.last_hash = entry.hash().to_string();
        self.entry_count += 1;
        debug!(event = %entry.event_type, entries = self.entry_count, "audit entry written");
        Ok(())
    }

    fn ensure_writer_open(&mut self) -> Result<(), AuditError> {
        if self.writer.is_some() {
            return Ok(());
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| AuditError::Io {
                path: self.path.clone(),
                source: e,
            })?;

        self.writer = Some(BufWriter::new(file));
        Ok(())
    }

    fn read_last_entry_hash(path: &Path) -> Result<(String, u64), AuditError> {
        let file = File::open(path).map_err(|e| AuditError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        let reader = BufReader::new(file);
        let mut last_hash = GENESIS_HASH.to_string();
        let mut count = 0u64;

        for line in reader.lines() {
            let line = line.map_err(|e| AuditError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;

            if line.trim().is_empty() {
                continue;
            }

            let entry: AuditEntry =
                serde_json::from_str(&line).map_err(|e| AuditError::Parse {
                    line: count as usize + 1,
                    source: e,
                })?;

            if let Some(hash) = &entry.entry_hash {
                last_hash = hash.clone();
            }
            count += 1;
        }

        Ok((last_hash, count))
    }

    pub fn close(&mut self) {
        if let Some(ref mut writer) = self.writer {
            let _ = writer.flush();
        }
        self.writer = None;
    }
}

impl AuditSink for AuditLog {
    fn record_batch(&mut self, record: &AuditRecord) -> Result<(), AuditError> {
        let message = format!(
            "Terminated {} of {} session(s); {} still active, {} failed, {} unknown",
            record.final_counts.terminated,
            record.batch_ids.len(),
            record.final_counts.still_active,
            record.final_counts.failed,
            record.final_counts.unknown,
        );
        let entry = AuditEntry::new(&self.ctx, AuditEventType::Termination, message, &self.last_hash)
            .with_details(record);
        self.write_entry(entry)
    }

    fn record_cancellation(&mut self, cancellation: &Cancellation) -> Result<(), AuditError> {
        let message = format!(
            "Termination of {} session(s) declined at {}",
            cancellation.batch_ids.len(),
            cancellation.stage
        );
        let entry = AuditEntry::new(&self.ctx, AuditEventType::Gate, message, &self.last_hash)
            .with_details(&GateDetails::from(cancellation));
        self.write_entry(entry)
    }
}

impl Drop for AuditLog {
    fn drop(&mut self) {
        self.close();
    }
}
