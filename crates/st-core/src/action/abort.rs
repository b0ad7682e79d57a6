//! Session abort bindings.

use serde::Serialize;
use st_common::SessionId;
use st_config::ExecutorSettings;
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::collect::source::{NzsqlClient, SourceError, StaticSessionSource};
use crate::collect::tool_runner::{
    first_executable, is_executable, ToolError, ToolRunner, ToolRunnerBuilder, ToolSpec,
};

/// Errors from a single abort attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AbortError {
    #[error("abort utility not available: {0}")]
    UtilityMissing(String),

    #[error("abort failed: {0}")]
    Failed(String),

    #[error("abort timed out after {0:?}")]
    Timeout(Duration),

    #[error("permission denied: {0}")]
    PermissionDenied(String),
}

impl From<ToolError> for AbortError {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::CommandNotFound(c) => AbortError::UtilityMissing(c),
            ToolError::Timeout(d) => AbortError::Timeout(d),
            ToolError::PermissionDenied(c) => AbortError::PermissionDenied(c),
            other => AbortError::Failed(other.to_string()),
        }
    }
}

impl From<SourceError> for AbortError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::ClientMissing(c) => AbortError::UtilityMissing(c),
            SourceError::Timeout(d) => AbortError::Timeout(d),
            SourceError::PermissionDenied(m) => AbortError::PermissionDenied(m),
            other => AbortError::Failed(other.to_string()),
        }
    }
}

/// Which mechanism carried out an abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortMechanism {
    Utility,
    Sql,
    Scripted,
}

/// What the mechanism reported on success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AbortOutput {
    pub mechanism: AbortMechanism,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub diagnostic: String,
}

/// Capability to terminate one appliance session by id.
pub trait SessionAborter {
    fn abort(&self, id: SessionId) -> Result<AbortOutput, AbortError>;

    /// Check the mechanism is present before any session is touched.
    fn probe(&self) -> Result<(), AbortError>;
}

fn classify_failure(diagnostic: String, exit_code: Option<i32>) -> AbortError {
    let lowered = diagnostic.to_lowercase();
    if lowered.contains("permission denied")
        || lowered.contains("not authorized")
        || lowered.contains("privilege")
    {
        return AbortError::PermissionDenied(diagnostic);
    }
    if diagnostic.is_empty() {
        AbortError::Failed(format!("exit status {:?}", exit_code))
    } else {
        AbortError::Failed(diagnostic)
    }
}

/// The vendor session utility: `<utility> abort -id <id> -force [-host <host>]`.
#[derive(Debug, Clone)]
pub struct UtilityAborter {
    runner: ToolRunner,
    utility: PathBuf,
    host: Option<String>,
}

impl UtilityAborter {
    /// First executable utility among the configured paths.
    pub fn locate(settings: &ExecutorSettings) -> Result<Self, AbortError> {
        let utility = first_executable(&settings.utility_paths).ok_or_else(|| {
            AbortError::UtilityMissing(
                settings
                    .utility_paths
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            )
        })?;
        Ok(Self::with_utility(utility, settings))
    }

    pub fn with_utility(utility: &Path, settings: &ExecutorSettings) -> Self {
        let runner = ToolRunnerBuilder::new()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .pass_env_prefix("NZ_")
            .build();
        Self {
            runner,
            utility: utility.to_path_buf(),
            host: settings.host.clone(),
        }
    }

    pub fn utility_path(&self) -> &Path {
        &self.utility
    }

    fn args(&self, id: SessionId) -> Vec<String> {
        let mut args = vec![
            "abort".to_string(),
            "-id".to_string(),
            id.to_string(),
            "-force".to_string(),
        ];
        if let Some(host) = &self.host {
            args.push("-host".to_string());
            args.push(host.clone());
        }
        args
    }
}

impl SessionAborter for UtilityAborter {
    fn abort(&self, id: SessionId) -> Result<AbortOutput, AbortError> {
        let spec = ToolSpec::new(self.utility.display().to_string(), self.args(id));
        let output = self.runner.run(&spec)?;
        if !output.success() {
            return Err(classify_failure(output.diagnostic(), output.exit_code));
        }
        Ok(AbortOutput {
            mechanism: AbortMechanism::Utility,
            diagnostic: output.diagnostic(),
        })
    }

    fn probe(&self) -> Result<(), AbortError> {
        if is_executable(&self.utility) {
            Ok(())
        } else {
            Err(AbortError::UtilityMissing(self.utility.display().to_string()))
        }
    }
}

/// Secondary mechanism: `DROP SESSION <id>` through the SQL client.
#[derive(Debug, Clone)]
pub struct SqlAborter {
    client: NzsqlClient,
}

impl SqlAborter {
    pub fn new(client: NzsqlClient) -> Self {
        Self { client }
    }
}

impl SessionAborter for SqlAborter {
    fn abort(&self, id: SessionId) -> Result<AbortOutput, AbortError> {
        // The id is numeric; nothing operator-typed reaches this statement.
        let output = self.client.execute(&format!("DROP SESSION {}", id.0))?;
        Ok(AbortOutput {
            mechanism: AbortMechanism::Sql,
            diagnostic: output.trim().to_string(),
        })
    }

    fn probe(&self) -> Result<(), AbortError> {
        if is_executable(self.client.client_path()) {
            Ok(())
        } else {
            Err(AbortError::UtilityMissing(
                self.client.client_path().display().to_string(),
            ))
        }
    }
}

/// Primary mechanism, then the secondary one when the primary fails.
pub struct FallbackAborter {
    primary: Box<dyn SessionAborter>,
    secondary: Box<dyn SessionAborter>,
}

impl FallbackAborter {
    pub fn new(primary: Box<dyn SessionAborter>, secondary: Box<dyn SessionAborter>) -> Self {
        Self { primary, secondary }
    }
}

impl SessionAborter for FallbackAborter {
    fn abort(&self, id: SessionId) -> Result<AbortOutput, AbortError> {
        match self.primary.abort(id) {
            Ok(output) => Ok(output),
            Err(primary) => {
                warn!(session_id = %id, error = %primary, "primary abort failed; trying fallback");
                self.secondary.abort(id).map_err(|secondary| {
                    AbortError::Failed(format!("{}; fallback: {}", primary, secondary))
                })
            }
        }
    }

    fn probe(&self) -> Result<(), AbortError> {
        self.primary.probe().or_else(|e| {
            debug!(error = %e, "primary abort mechanism unavailable; probing fallback");
            self.secondary.probe()
        })
    }
}

#[derive(Debug, Default)]
struct ScriptState {
    failures: HashMap<SessionId, (String, usize)>,
    calls: Vec<SessionId>,
}

/// In-memory aborter that removes sessions from a [`StaticSessionSource`].
///
/// Clones share the call log and the scripted failures.
#[derive(Debug, Clone)]
pub struct ScriptedAborter {
    source: StaticSessionSource,
    state: Rc<RefCell<ScriptState>>,
    available: bool,
}

impl ScriptedAborter {
    pub fn new(source: StaticSessionSource) -> Self {
        Self {
            source,
            state: Rc::default(),
            available: true,
        }
    }

    /// Fail the next `times` aborts of `id` with `message`.
    pub fn fail(self, id: SessionId, message: impl Into<String>, times: usize) -> Self {
        self.state
            .borrow_mut()
            .failures
            .insert(id, (message.into(), times));
        self
    }

    /// Make `probe` report the utility as missing.
    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    /// Every abort call, in order.
    pub fn calls(&self) -> Vec<SessionId> {
        self.state.borrow().calls.clone()
    }
}

impl SessionAborter for ScriptedAborter {
    fn abort(&self, id: SessionId) -> Result<AbortOutput, AbortError> {
        let mut state = self.state.borrow_mut();
        state.calls.push(id);
        if let Some((message, remaining)) = state.failures.get_mut(&id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(AbortError::Failed(message.clone()));
            }
        }
        drop(state);
        if self.source.remove(id) {
            Ok(AbortOutput {
                mechanism: AbortMechanism::Scripted,
                diagnostic: String::new(),
            })
        } else {
            Err(AbortError::Failed(format!("session {} does not exist", id)))
        }
    }

    fn probe(&self) -> Result<(), AbortError> {
        if self.available {
            Ok(())
        } else {
            Err(AbortError::UtilityMissing("scripted utility disabled".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use st_common::SessionRecord;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    fn rec(id: u64) -> SessionRecord {
        SessionRecord {
            id: SessionId(id),
            username: "ETL".to_string(),
            database: "SALES".to_string(),
            client_ip: "10.0.0.1".to_string(),
            connected_at: Utc::now(),
            status: "active".to_string(),
            pid: None,
            client_os_user: None,
            application: None,
        }
    }

    fn stub(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("nzsession");
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn utility_receives_abort_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let path = stub(dir.path(), "echo \"$@\"");
        let settings = ExecutorSettings {
            host: Some("nzhost01".to_string()),
            ..ExecutorSettings::default()
        };
        let aborter = UtilityAborter::with_utility(&path, &settings);
        aborter.probe().unwrap();
        let out = aborter.abort(SessionId(42)).unwrap();
        assert_eq!(out.mechanism, AbortMechanism::Utility);
        assert_eq!(out.diagnostic, "abort -id 42 -force -host nzhost01");
    }

    #[test]
    fn nonzero_exit_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = stub(dir.path(), "echo 'ERROR: session 7 not found' >&2; exit 1");
        let aborter = UtilityAborter::with_utility(&path, &ExecutorSettings::default());
        assert_eq!(
            aborter.abort(SessionId(7)),
            Err(AbortError::Failed("ERROR: session 7 not found".to_string()))
        );
    }

    #[test]
    fn missing_utility_is_reported_by_locate() {
        let settings = ExecutorSettings {
            utility_paths: vec![PathBuf::from("/nonexistent/nzsession")],
            ..ExecutorSettings::default()
        };
        assert!(matches!(
            UtilityAborter::locate(&settings),
            Err(AbortError::UtilityMissing(_))
        ));
    }

    #[test]
    fn fallback_is_tried_after_primary_failure() {
        let source = StaticSessionSource::new(vec![rec(1)], Some(SessionId(9)));
        let primary = ScriptedAborter::new(source.clone()).fail(SessionId(1), "utility error", 1);
        let secondary = ScriptedAborter::new(source.clone());
        let fallback = FallbackAborter::new(Box::new(primary.clone()), Box::new(secondary.clone()));
        fallback.abort(SessionId(1)).unwrap();
        assert_eq!(primary.calls(), vec![SessionId(1)]);
        assert_eq!(secondary.calls(), vec![SessionId(1)]);
        assert!(!source.contains(SessionId(1)));
    }

    #[test]
    fn scripted_failures_are_consumed() {
        let source = StaticSessionSource::new(vec![rec(1)], Some(SessionId(9)));
        let aborter = ScriptedAborter::new(source.clone()).fail(SessionId(1), "busy", 1);
        assert!(aborter.abort(SessionId(1)).is_err());
        assert!(aborter.abort(SessionId(1)).is_ok());
        assert!(aborter.abort(SessionId(1)).is_err());
        assert!(ScriptedAborter::new(source).unavailable().probe().is_err());
    }
}
