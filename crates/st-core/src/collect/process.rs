//! OS process inspection for session back-end processes.
//!
//! Optional capability: when the platform or permissions do not allow it,
//! callers get [`ProcessUnavailable`] and must treat the process rule as
//! skipped rather than as a verdict.

use st_common::{ProcessId, ProcessInfo};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use thiserror::Error;

use super::tool_runner::ToolRunner;

/// Why process details could not be obtained.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProcessUnavailable {
    #[error("process {0} is not visible from this host")]
    NotVisible(ProcessId),

    #[error("permission denied inspecting process {0}")]
    PermissionDenied(ProcessId),

    #[error("process inspection is not available: {0}")]
    Unsupported(String),
}

/// Look up the owner and command of an OS process.
pub trait ProcessInspector {
    fn inspect(&self, pid: ProcessId) -> Result<ProcessInfo, ProcessUnavailable>;

    /// `None` when liveness cannot be determined.
    fn is_alive(&self, pid: ProcessId) -> Option<bool>;
}

/// Inspector for processes on the local host.
///
/// Reads /proc on Linux and falls back to `ps` elsewhere.
#[derive(Debug, Clone, Default)]
pub struct LiveProcessInspector {
    runner: ToolRunner,
}

impl LiveProcessInspector {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(target_os = "linux")]
    fn inspect_proc(&self, pid: ProcessId) -> Result<ProcessInfo, ProcessUnavailable> {
        let path = format!("/proc/{}/status", pid.0);
        let content = std::fs::read_to_string(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => ProcessUnavailable::PermissionDenied(pid),
            _ => ProcessUnavailable::NotVisible(pid),
        })?;
        let (name, uid) = parse_proc_status(&content)
            .ok_or_else(|| ProcessUnavailable::Unsupported(format!("unreadable {}", path)))?;
        Ok(ProcessInfo {
            pid,
            owner: resolve_username(uid),
            command: name,
        })
    }

    #[cfg_attr(target_os = "linux", allow(dead_code))]
    fn inspect_ps(&self, pid: ProcessId) -> Result<ProcessInfo, ProcessUnavailable> {
        let pid_arg = pid.0.to_string();
        let output = self
            .runner
            .run_tool("ps", &["-o", "user=", "-o", "comm=", "-p", &pid_arg], None)
            .map_err(|e| ProcessUnavailable::Unsupported(e.to_string()))?;
        if !output.success() {
            return Err(ProcessUnavailable::NotVisible(pid));
        }
        let stdout = output.stdout_str();
        let line = stdout
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .ok_or(ProcessUnavailable::NotVisible(pid))?;
        let mut parts = line.split_whitespace();
        let owner = parts.next().ok_or(ProcessUnavailable::NotVisible(pid))?;
        let command = parts.collect::<Vec<_>>().join(" ");
        let command = command.rsplit('/').next().unwrap_or(&command).to_string();
        Ok(ProcessInfo {
            pid,
            owner: owner.to_string(),
            command,
        })
    }
}

impl ProcessInspector for LiveProcessInspector {
    fn inspect(&self, pid: ProcessId) -> Result<ProcessInfo, ProcessUnavailable> {
        #[cfg(target_os = "linux")]
        {
            self.inspect_proc(pid)
        }
        #[cfg(not(target_os = "linux"))]
        {
            self.inspect_ps(pid)
        }
    }

    fn is_alive(&self, pid: ProcessId) -> Option<bool> {
        let Ok(raw) = i32::try_from(pid.0) else {
            return None;
        };
        if raw <= 0 {
            return None;
        }
        let result = unsafe { libc::kill(raw, 0) };
        if result == 0 {
            return Some(true);
        }
        match std::io::Error::last_os_error().raw_os_error() {
            Some(libc::ESRCH) => Some(false),
            // Exists but belongs to someone else.
            Some(libc::EPERM) => Some(true),
            _ => None,
        }
    }
}

/// `(Name, real Uid)` from /proc/<pid>/status.
pub fn parse_proc_status(content: &str) -> Option<(String, u32)> {
    let mut name = None;
    let mut uid = None;
    for line in content.lines() {
        if let Some(rest) = line.strip_prefix("Name:") {
            name = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("Uid:") {
            uid = rest.split_whitespace().next().and_then(|u| u.parse().ok());
        }
        if name.is_some() && uid.is_some() {
            break;
        }
    }
    Some((name?, uid?))
}

/// Resolve a username from /etc/passwd, falling back to the numeric uid.
fn resolve_username(uid: u32) -> String {
    if let Ok(passwd) = std::fs::read_to_string("/etc/passwd") {
        for line in passwd.lines() {
            let fields: Vec<&str> = line.split(':').collect();
            if fields.len() >= 3 && fields[2].parse::<u32>().ok() == Some(uid) {
                return fields[0].to_string();
            }
        }
    }
    uid.to_string()
}

/// Inspector for hosts where process details are never available.
#[derive(Debug, Clone, Default)]
pub struct UnavailableProcessInspector {
    reason: String,
}

impl UnavailableProcessInspector {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl ProcessInspector for UnavailableProcessInspector {
    fn inspect(&self, _pid: ProcessId) -> Result<ProcessInfo, ProcessUnavailable> {
        Err(ProcessUnavailable::Unsupported(self.reason.clone()))
    }

    fn is_alive(&self, _pid: ProcessId) -> Option<bool> {
        None
    }
}

/// Pick the inspector for the configured appliance host.
///
/// Session PIDs belong to the appliance, so a remote host disables local
/// lookups instead of matching unrelated local processes.
pub fn inspector_for_host(host: Option<&str>) -> Box<dyn ProcessInspector> {
    match host.map(str::trim).filter(|h| !is_local_host(h)) {
        Some(remote) => Box::new(UnavailableProcessInspector::new(format!(
            "appliance host {} is not this machine",
            remote
        ))),
        None => Box::new(LiveProcessInspector::new()),
    }
}

fn is_local_host(host: &str) -> bool {
    host.is_empty()
        || matches!(
            host.to_ascii_lowercase().as_str(),
            "localhost" | "127.0.0.1" | "::1"
        )
}

/// In-memory process table. Clones share the exited set.
#[derive(Debug, Clone, Default)]
pub struct StaticProcessInspector {
    processes: HashMap<ProcessId, ProcessInfo>,
    exited: Rc<RefCell<HashSet<ProcessId>>>,
}

impl StaticProcessInspector {
    pub fn new(processes: impl IntoIterator<Item = ProcessInfo>) -> Self {
        Self {
            processes: processes.into_iter().map(|p| (p.pid, p)).collect(),
            exited: Rc::default(),
        }
    }

    /// Simulate the process going away.
    pub fn mark_exited(&self, pid: ProcessId) {
        self.exited.borrow_mut().insert(pid);
    }
}

impl ProcessInspector for StaticProcessInspector {
    fn inspect(&self, pid: ProcessId) -> Result<ProcessInfo, ProcessUnavailable> {
        if self.exited.borrow().contains(&pid) {
            return Err(ProcessUnavailable::NotVisible(pid));
        }
        self.processes
            .get(&pid)
            .cloned()
            .ok_or(ProcessUnavailable::NotVisible(pid))
    }

    fn is_alive(&self, pid: ProcessId) -> Option<bool> {
        Some(self.processes.contains_key(&pid) && !self.exited.borrow().contains(&pid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_status_name_and_real_uid() {
        let status = "Name:\tpostgres\nUmask:\t0077\nState:\tS (sleeping)\nUid:\t500\t500\t500\t500\n";
        assert_eq!(parse_proc_status(status), Some(("postgres".to_string(), 500)));
        assert_eq!(parse_proc_status("State:\tR\n"), None);
    }

    #[test]
    fn live_inspector_sees_itself() {
        let me = ProcessId(std::process::id());
        let inspector = LiveProcessInspector::new();
        assert_eq!(inspector.is_alive(me), Some(true));
        let info = inspector.inspect(me).unwrap();
        assert_eq!(info.pid, me);
        assert!(!info.command.is_empty());
    }

    #[test]
    fn unavailable_inspector_never_answers() {
        let inspector = UnavailableProcessInspector::new("remote appliance");
        assert!(inspector.inspect(ProcessId(1)).is_err());
        assert_eq!(inspector.is_alive(ProcessId(1)), None);
    }

    #[test]
    fn remote_host_never_consults_local_processes() {
        let me = ProcessId(std::process::id());
        let remote = inspector_for_host(Some("appliance01.example"));
        assert!(matches!(
            remote.inspect(me),
            Err(ProcessUnavailable::Unsupported(_))
        ));
        assert_eq!(remote.is_alive(me), None);

        for local in [None, Some("localhost"), Some(" 127.0.0.1 ")] {
            assert_eq!(inspector_for_host(local).is_alive(me), Some(true));
        }
    }

    #[test]
    fn static_inspector_tracks_exits() {
        let inspector = StaticProcessInspector::new([ProcessInfo {
            pid: ProcessId(4100),
            owner: "nz".to_string(),
            command: "postgres".to_string(),
        }]);
        assert_eq!(inspector.is_alive(ProcessId(4100)), Some(true));
        inspector.clone().mark_exited(ProcessId(4100));
        assert_eq!(inspector.is_alive(ProcessId(4100)), Some(false));
        assert_eq!(inspector.is_alive(ProcessId(1)), Some(false));
    }
}
