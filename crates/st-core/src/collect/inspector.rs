//! Session Inspector: filter → ordered, deduplicated candidate list.
//!
//! Guarantees on every successful inspection:
//! - ids are unique (first occurrence wins)
//! - records are ordered by connection time, newest first
//! - the caller's own session is absent
//!
//! "No candidates" and "source unavailable" are distinct outcomes.

use chrono::{DateTime, Utc};
use serde::Serialize;
use st_common::{SessionId, SessionRecord};
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::filter::{FilterError, SessionFilter};
use super::source::{SessionSource, SourceError};
use crate::logging::Stage;

/// Why an inspection could not produce an answer.
#[derive(Debug, Error)]
pub enum InspectError {
    #[error("invalid filter: {0}")]
    Input(#[from] FilterError),

    #[error("session metadata source unavailable: {0}")]
    SourceUnavailable(#[source] SourceError),

    /// The own session cannot be excluded, so no batch is produced.
    #[error("cannot determine own session id: {0}")]
    OwnSessionUnknown(#[source] SourceError),
}

impl InspectError {
    /// True for every failure that is the source's fault rather than the input's.
    pub fn is_source_unavailable(&self) -> bool {
        !matches!(self, InspectError::Input(_))
    }
}

impl From<InspectError> for st_common::Error {
    fn from(err: InspectError) -> Self {
        match err {
            InspectError::Input(e) => st_common::Error::InvalidInput(e.to_string()),
            InspectError::SourceUnavailable(SourceError::PermissionDenied(m)) => {
                st_common::Error::PermissionDenied(m)
            }
            InspectError::SourceUnavailable(e) => st_common::Error::SourceUnavailable(e.to_string()),
            InspectError::OwnSessionUnknown(e) => st_common::Error::OwnSessionUnknown(e.to_string()),
        }
    }
}

/// Successful inspection with at least one candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Inspection {
    pub records: Vec<SessionRecord>,
    pub own_session: SessionId,
    /// The own session matched the filter and was removed.
    pub excluded_own: bool,
    pub duplicates_dropped: usize,
}

/// Result of a successful inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InspectOutcome {
    Candidates(Inspection),
    NoCandidates {
        own_session: SessionId,
        excluded_own: bool,
    },
}

impl InspectOutcome {
    pub fn records(&self) -> &[SessionRecord] {
        match self {
            InspectOutcome::Candidates(i) => &i.records,
            InspectOutcome::NoCandidates { .. } => &[],
        }
    }
}

/// Queries the metadata source on behalf of the pipeline.
pub struct SessionInspector<'a> {
    source: &'a dyn SessionSource,
}

impl<'a> SessionInspector<'a> {
    pub fn new(source: &'a dyn SessionSource) -> Self {
        Self { source }
    }

    pub fn inspect(&self, filter: &SessionFilter) -> Result<InspectOutcome, InspectError> {
        self.inspect_at(filter, Utc::now())
    }

    /// Inspect with an explicit clock reading for age predicates.
    pub fn inspect_at(
        &self,
        filter: &SessionFilter,
        now: DateTime<Utc>,
    ) -> Result<InspectOutcome, InspectError> {
        let own_session = self.source.current_session_id().map_err(|e| {
            warn!(stage = %Stage::Inspect, error = %e, "own session id unavailable; refusing to continue");
            InspectError::OwnSessionUnknown(e)
        })?;

        let rows = self.source.fetch(filter, now).map_err(|e| {
            warn!(stage = %Stage::Inspect, error = %e, "metadata source unavailable");
            InspectError::SourceUnavailable(e)
        })?;
        let fetched = rows.len();

        let mut seen = HashSet::with_capacity(rows.len());
        let mut excluded_own = false;
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            if row.id == own_session {
                excluded_own = true;
                continue;
            }
            if seen.insert(row.id) {
                records.push(row);
            }
        }
        let duplicates_dropped = fetched - records.len() - usize::from(excluded_own);
        if duplicates_dropped > 0 {
            debug!(stage = %Stage::Inspect, duplicates_dropped, "dropped duplicate session rows");
        }

        // Stable: equal timestamps keep source order.
        records.sort_by(|a, b| b.connected_at.cmp(&a.connected_at));

        info!(
            stage = %Stage::Inspect,
            fetched,
            candidates = records.len(),
            excluded_own,
            "inspection complete"
        );

        if records.is_empty() {
            return Ok(InspectOutcome::NoCandidates {
                own_session,
                excluded_own,
            });
        }
        Ok(InspectOutcome::Candidates(Inspection {
            records,
            own_session,
            excluded_own,
            duplicates_dropped,
        }))
    }

    /// Current state of one session, for verification.
    ///
    /// `Ok(None)` means the source answered and the session is gone.
    pub fn lookup(&self, id: SessionId) -> Result<Option<SessionRecord>, InspectError> {
        let filter = SessionFilter::session(id)?;
        let rows = self
            .source
            .fetch(&filter, Utc::now())
            .map_err(InspectError::SourceUnavailable)?;
        Ok(rows.into_iter().find(|r| r.id == id))
    }
}
