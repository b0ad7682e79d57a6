//! Candidate batches.

use serde::Serialize;
use st_common::{SessionId, SessionRecord};
use std::collections::HashSet;
use thiserror::Error;

use crate::collect::inspector::Inspection;

/// Why a set of records cannot form a batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    #[error("a candidate batch needs at least one session")]
    Empty,

    #[error("session {0} appears more than once")]
    DuplicateSession(SessionId),

    #[error("session {0} is the console's own session")]
    ContainsOwnSession(SessionId),
}

impl From<BatchError> for st_common::Error {
    fn from(err: BatchError) -> Self {
        match err {
            BatchError::DuplicateSession(id) => st_common::Error::DuplicateSession { session_id: id.0 },
            other => st_common::Error::InvalidInput(other.to_string()),
        }
    }
}

/// The sessions selected for one termination request.
///
/// Non-empty, unique ids, newest connection first, never containing the
/// console's own session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateBatch {
    records: Vec<SessionRecord>,
    own_session: SessionId,
}

impl CandidateBatch {
    pub fn new(mut records: Vec<SessionRecord>, own_session: SessionId) -> Result<Self, BatchError> {
        if records.is_empty() {
            return Err(BatchError::Empty);
        }
        let mut seen = HashSet::with_capacity(records.len());
        for record in &records {
            if record.id == own_session {
                return Err(BatchError::ContainsOwnSession(record.id));
            }
            if !seen.insert(record.id) {
                return Err(BatchError::DuplicateSession(record.id));
            }
        }
        records.sort_by(|a, b| b.connected_at.cmp(&a.connected_at));
        Ok(Self {
            records,
            own_session,
        })
    }

    pub fn from_inspection(inspection: Inspection) -> Result<Self, BatchError> {
        Self::new(inspection.records, inspection.own_session)
    }

    pub fn records(&self) -> &[SessionRecord] {
        &self.records
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.records.iter().map(|r| r.id).collect()
    }

    pub fn own_session(&self) -> SessionId {
        self.own_session
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
