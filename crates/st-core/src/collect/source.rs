//! Session metadata sources.
//!
//! [`SessionSource`] is the seam between the pipeline and the appliance. The
//! production binding shells out to the vendor SQL client; the in-memory
//! binding backs tests and dry runs.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use st_common::{ProcessId, SessionId, SessionRecord};
use st_config::SourceSettings;
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use super::filter::{FilterError, SessionFilter, APPLIANCE_TIME_FORMAT, SESSION_COLUMNS};
use super::tool_runner::{first_executable, ToolError, ToolRunner, ToolRunnerBuilder, ToolSpec};

/// Field separator requested from the SQL client (ASCII unit separator).
const FIELD_SEPARATOR: char = '\u{1f}';

/// Failures talking to the metadata source.
///
/// None of these mean "zero rows"; an empty result is `Ok(vec![])`.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("SQL client not found; tried: {0}")]
    ClientMissing(String),

    #[error("metadata query failed: {0}")]
    QueryFailed(String),

    #[error("metadata query timed out after {0:?}")]
    Timeout(Duration),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("unparseable metadata row {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("filter cannot be sent to the source: {0}")]
    Filter(#[from] FilterError),
}

impl From<ToolError> for SourceError {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::Timeout(d) => SourceError::Timeout(d),
            ToolError::CommandNotFound(c) => SourceError::ClientMissing(c),
            ToolError::PermissionDenied(c) => SourceError::PermissionDenied(c),
            other => SourceError::QueryFailed(other.to_string()),
        }
    }
}

/// Read-only access to live session metadata.
pub trait SessionSource {
    /// Sessions matching `filter`, in source order. May contain duplicates.
    fn fetch(
        &self,
        filter: &SessionFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<SessionRecord>, SourceError>;

    /// Id of the connection this tool is using.
    fn current_session_id(&self) -> Result<SessionId, SourceError>;

    /// Cheap connectivity check.
    fn probe(&self) -> Result<(), SourceError> {
        self.current_session_id().map(|_| ())
    }
}

/// Thin wrapper around the vendor SQL client.
#[derive(Debug, Clone)]
pub struct NzsqlClient {
    runner: ToolRunner,
    client: PathBuf,
    settings: SourceSettings,
}

impl NzsqlClient {
    /// Find the first executable client among the configured paths.
    pub fn locate(settings: &SourceSettings) -> Result<Self, SourceError> {
        let client = first_executable(&settings.sql_client_paths).ok_or_else(|| {
            SourceError::ClientMissing(
                settings
                    .sql_client_paths
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            )
        })?;
        Ok(Self::with_client(client, settings))
    }

    /// Use an explicit client binary.
    pub fn with_client(client: &Path, settings: &SourceSettings) -> Self {
        let runner = ToolRunnerBuilder::new()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .pass_env_prefix("NZ_")
            .build();
        Self {
            runner,
            client: client.to_path_buf(),
            settings: settings.clone(),
        }
    }

    pub fn client_path(&self) -> &Path {
        &self.client
    }

    /// Run one statement and return unaligned, tuples-only stdout.
    pub fn execute(&self, sql: &str) -> Result<String, SourceError> {
        let mut args = vec![
            "-A".to_string(),
            "-t".to_string(),
            "-F".to_string(),
            FIELD_SEPARATOR.to_string(),
            "-d".to_string(),
            self.settings.database.clone(),
        ];
        if let Some(host) = &self.settings.host {
            args.push("-host".to_string());
            args.push(host.clone());
        }
        if let Some(user) = &self.settings.user {
            args.push("-u".to_string());
            args.push(user.clone());
        }
        args.push("-c".to_string());
        args.push(sql.to_string());

        let spec = ToolSpec::new(self.client.display().to_string(), args);
        let output = self.runner.run(&spec)?;

        if !output.success() {
            let diagnostic = output.diagnostic();
            let lowered = diagnostic.to_lowercase();
            if lowered.contains("permission denied") || lowered.contains("not authorized") {
                return Err(SourceError::PermissionDenied(diagnostic));
            }
            return Err(SourceError::QueryFailed(if diagnostic.is_empty() {
                format!("exit status {:?}", output.exit_code)
            } else {
                diagnostic
            }));
        }
        Ok(output.stdout_str())
    }
}

/// Metadata source backed by the vendor SQL client.
#[derive(Debug, Clone)]
pub struct NzsqlSource {
    client: NzsqlClient,
}

impl NzsqlSource {
    pub fn new(client: NzsqlClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &NzsqlClient {
        &self.client
    }
}

impl SessionSource for NzsqlSource {
    fn fetch(
        &self,
        filter: &SessionFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<SessionRecord>, SourceError> {
        let sql = filter.to_query(now).render_literal()?;
        debug!(sql = %sql, "querying session metadata");
        let stdout = self.client.execute(&sql)?;
        let rows = parse_session_rows(&stdout)?;
        // The SQL predicate is a pre-filter; in-memory evaluation is authoritative.
        Ok(rows
            .into_iter()
            .filter(|r| filter.matches(r, now))
            .collect())
    }

    fn current_session_id(&self) -> Result<SessionId, SourceError> {
        let stdout = self.client.execute("SELECT CURRENT_SID")?;
        let line = stdout
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .ok_or_else(|| SourceError::QueryFailed("CURRENT_SID returned no rows".into()))?;
        line.parse::<SessionId>().map_err(|e| SourceError::Parse {
            line: 1,
            reason: format!("CURRENT_SID {:?}: {}", line, e),
        })
    }
}

/// Parse unaligned client output into records.
pub fn parse_session_rows(stdout: &str) -> Result<Vec<SessionRecord>, SourceError> {
    let mut rows = Vec::new();
    for (idx, line) in stdout.lines().enumerate() {
        let line_no = idx + 1;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(FIELD_SEPARATOR).collect();
        if fields.len() != SESSION_COLUMNS.len() {
            return Err(SourceError::Parse {
                line: line_no,
                reason: format!(
                    "expected {} fields, got {}",
                    SESSION_COLUMNS.len(),
                    fields.len()
                ),
            });
        }
        let parse_err = |reason: String| SourceError::Parse {
            line: line_no,
            reason,
        };

        let id = fields[0]
            .parse::<SessionId>()
            .map_err(|e| parse_err(format!("ID: {}", e)))?;
        let connected_at =
            parse_appliance_time(fields[4]).map_err(|e| parse_err(format!("CONNTIME: {}", e)))?;
        let pid = match fields[6].trim() {
            "" | "0" => None,
            raw => Some(
                raw.parse::<ProcessId>()
                    .map_err(|e| parse_err(format!("PID: {}", e)))?,
            ),
        };

        rows.push(SessionRecord {
            id,
            username: fields[1].trim().to_string(),
            database: fields[2].trim().to_string(),
            client_ip: fields[3].trim().to_string(),
            connected_at,
            status: fields[5].trim().to_string(),
            pid,
            client_os_user: non_empty(fields[7]),
            application: non_empty(fields[8]),
        });
    }
    Ok(rows)
}

/// Appliance timestamps are local wall-clock time.
fn parse_appliance_time(raw: &str) -> Result<DateTime<Utc>, String> {
    let raw = raw.trim();
    let naive = NaiveDateTime::parse_from_str(raw, APPLIANCE_TIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .map_err(|e| format!("{:?}: {}", raw, e))?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| format!("{:?} does not exist in the local time zone", raw))
}

fn non_empty(field: &str) -> Option<String> {
    let trimmed = field.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[derive(Debug, Default)]
struct StaticState {
    rows: Vec<SessionRecord>,
    own: Option<SessionId>,
    fetches: usize,
    fail_after: Option<usize>,
}

/// In-memory metadata source.
///
/// Clones share state, so a scripted aborter can remove sessions that a
/// later fetch will no longer see.
#[derive(Debug, Clone, Default)]
pub struct StaticSessionSource {
    state: Rc<RefCell<StaticState>>,
}

impl StaticSessionSource {
    pub fn new(rows: Vec<SessionRecord>, own: Option<SessionId>) -> Self {
        Self {
            state: Rc::new(RefCell::new(StaticState {
                rows,
                own,
                ..StaticState::default()
            })),
        }
    }

    /// Let the first `n` fetches succeed and fail every later one.
    pub fn fail_after_fetches(self, n: usize) -> Self {
        self.state.borrow_mut().fail_after = Some(n);
        self
    }

    /// Drop a session, as if its connection closed.
    pub fn remove(&self, id: SessionId) -> bool {
        let mut state = self.state.borrow_mut();
        let before = state.rows.len();
        state.rows.retain(|r| r.id != id);
        state.rows.len() != before
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.state.borrow().rows.iter().any(|r| r.id == id)
    }

    pub fn fetch_count(&self) -> usize {
        self.state.borrow().fetches
    }
}

impl SessionSource for StaticSessionSource {
    fn fetch(
        &self,
        filter: &SessionFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<SessionRecord>, SourceError> {
        let mut state = self.state.borrow_mut();
        state.fetches += 1;
        if let Some(limit) = state.fail_after {
            if state.fetches > limit {
                warn!(fetch = state.fetches, "static source simulating outage");
                return Err(SourceError::QueryFailed(
                    "connection to appliance lost".to_string(),
                ));
            }
        }
        Ok(state
            .rows
            .iter()
            .filter(|r| filter.matches(r, now))
            .cloned()
            .collect())
    }

    fn current_session_id(&self) -> Result<SessionId, SourceError> {
        self.state
            .borrow()
            .own
            .ok_or_else(|| SourceError::QueryFailed("current session id unavailable".into()))
    }
}
