//! Session records as observed from the appliance metadata source.

use crate::id::{ProcessId, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One live appliance session.
///
/// Created by the appliance when a client connects and destroyed when the
/// connection closes or is aborted. This workspace only ever observes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    /// Appliance account owning the session.
    pub username: String,
    /// Database the session is connected to.
    pub database: String,
    /// Client address as reported by the appliance.
    pub client_ip: String,
    pub connected_at: DateTime<Utc>,
    /// Free-text state label ("active", "idle", ...).
    pub status: String,
    /// Server-side OS process, when the metadata source exposes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<ProcessId>,
    /// OS account on the client machine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_os_user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application: Option<String>,
}

impl SessionRecord {
    /// Seconds since the session connected, clamped at zero for clock skew.
    pub fn age_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.connected_at).num_seconds().max(0)
    }
}

/// OS-level details about the process behind a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: ProcessId,
    /// Owning OS account name (or numeric uid when unresolvable).
    pub owner: String,
    /// Short command name.
    pub command: String,
}
