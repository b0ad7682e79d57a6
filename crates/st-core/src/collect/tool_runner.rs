//! Tool runner with timeout and output cap.
//!
//! Every vendor utility (the SQL client, the session utility, `ps`) is run
//! through this module:
//!
//! - Per-command timeout with SIGTERM → SIGKILL escalation
//! - Output size caps to prevent memory exhaustion
//! - Scrubbed environment (PATH, LC_ALL=C, plus named passthrough prefixes)
//! - Command path validation to prevent injection
//! - Arguments are passed as argv entries, never through a shell

use serde::Serialize;
use std::collections::HashSet;
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, trace, warn};

/// Default timeout per command in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default maximum output size in bytes (4MB).
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 4 * 1024 * 1024;

/// Grace period between SIGTERM and SIGKILL in milliseconds.
const SIGTERM_GRACE_MS: u64 = 500;

/// Errors that can occur during tool execution.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("command failed to spawn: {0}")]
    SpawnFailed(String),

    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    #[error("permission denied running {0}")]
    PermissionDenied(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid command path: {0}")]
    InvalidPath(String),

    #[error("command not in allowlist: {0}")]
    NotAllowed(String),
}

/// Output from a tool execution.
#[derive(Debug, Clone, Serialize)]
pub struct ToolOutput {
    /// Command that was executed.
    pub command: String,

    /// Arguments passed to the command.
    pub args: Vec<String>,

    /// Standard output (may be truncated).
    pub stdout: Vec<u8>,

    /// Standard error (may be truncated).
    pub stderr: Vec<u8>,

    /// Exit code (None when killed by a signal).
    pub exit_code: Option<i32>,

    /// Whether output was truncated.
    pub truncated: bool,

    /// Execution duration.
    pub duration: Duration,

    /// Whether the command timed out.
    pub timed_out: bool,
}

impl ToolOutput {
    /// Get stdout as string (lossy UTF-8 conversion).
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    /// Get stderr as string (lossy UTF-8 conversion).
    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }

    /// Check if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out
    }

    /// First non-empty line of stderr, falling back to stdout.
    pub fn diagnostic(&self) -> String {
        let first_line = |bytes: &[u8]| {
            String::from_utf8_lossy(bytes)
                .lines()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .map(str::to_string)
        };
        first_line(&self.stderr)
            .or_else(|| first_line(&self.stdout))
            .unwrap_or_default()
    }
}

/// Configuration for the tool runner.
#[derive(Debug, Clone)]
pub struct ToolConfig {
    /// Default timeout per command.
    pub default_timeout: Duration,

    /// Maximum output size per stream in bytes.
    pub max_output_bytes: usize,

    /// Environment variable prefixes passed through to the child
    /// (e.g. `NZ_` for client credentials).
    pub env_passthrough_prefixes: Vec<String>,

    /// Allowed commands (empty = all allowed).
    pub allowed_commands: HashSet<String>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            env_passthrough_prefixes: Vec::new(),
            allowed_commands: HashSet::new(),
        }
    }
}

/// Specification for a tool to run.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    /// Command to execute.
    pub command: String,

    /// Arguments to pass.
    pub args: Vec<String>,

    /// Override timeout (None = use default).
    pub timeout: Option<Duration>,
}

impl ToolSpec {
    /// Create a new tool specification.
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            timeout: None,
        }
    }

    /// Set custom timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Runs external tools one at a time.
#[derive(Debug, Clone, Default)]
pub struct ToolRunner {
    config: ToolConfig,
}

impl ToolRunner {
    /// Create a new tool runner with the given configuration.
    pub fn new(config: ToolConfig) -> Self {
        Self { config }
    }

    /// Run a single tool with the given command and arguments.
    pub fn run_tool(
        &self,
        cmd: &str,
        args: &[&str],
        timeout: Option<Duration>,
    ) -> Result<ToolOutput, ToolError> {
        let spec = ToolSpec {
            command: cmd.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            timeout,
        };
        self.run(&spec)
    }

    /// Run a tool from a specification.
    ///
    /// A timeout is reported as `ToolError::Timeout`; a non-zero exit is not
    /// an error at this layer and is left to the caller to interpret.
    pub fn run(&self, spec: &ToolSpec) -> Result<ToolOutput, ToolError> {
        self.validate_command(&spec.command)?;

        let timeout = spec.timeout.unwrap_or(self.config.default_timeout);
        let max_output = self.config.max_output_bytes;

        debug!(
            command = %spec.command,
            args = ?spec.args,
            timeout_ms = timeout.as_millis() as u64,
            "running tool"
        );

        let start = Instant::now();
        let mut command = self.build_command(&spec.command, &spec.args);

        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                error!(command = %spec.command, error = %e, "failed to spawn");
                match e.kind() {
                    std::io::ErrorKind::NotFound => ToolError::CommandNotFound(spec.command.clone()),
                    std::io::ErrorKind::PermissionDenied => {
                        ToolError::PermissionDenied(spec.command.clone())
                    }
                    _ => ToolError::SpawnFailed(e.to_string()),
                }
            })?;

        let (stdout, stderr, exit_code, truncated, timed_out) =
            self.execute_with_timeout(&mut child, timeout, max_output)?;
        let duration = start.elapsed();

        debug!(
            command = %spec.command,
            duration_ms = duration.as_millis() as u64,
            exit_code = ?exit_code,
            truncated,
            "tool execution complete"
        );

        if timed_out {
            warn!(command = %spec.command, "tool timed out");
            return Err(ToolError::Timeout(timeout));
        }

        Ok(ToolOutput {
            command: spec.command.clone(),
            args: spec.args.clone(),
            stdout,
            stderr,
            exit_code,
            truncated,
            duration,
            timed_out,
        })
    }

    /// Validate that a command is allowed and safe to execute.
    fn validate_command(&self, cmd: &str) -> Result<(), ToolError> {
        if !self.config.allowed_commands.is_empty() {
            let basename = Path::new(cmd)
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(cmd);

            if !self.config.allowed_commands.contains(cmd)
                && !self.config.allowed_commands.contains(basename)
            {
                return Err(ToolError::NotAllowed(cmd.to_string()));
            }
        }

        if cmd.is_empty() || cmd.contains(['|', '&', ';', '$', '`', '\n', '\r']) {
            return Err(ToolError::InvalidPath(format!(
                "command contains shell metacharacters: {}",
                cmd
            )));
        }

        if cmd.starts_with('/') && !Path::new(cmd).exists() {
            return Err(ToolError::CommandNotFound(cmd.to_string()));
        }

        Ok(())
    }

    /// Build the command with a scrubbed environment.
    fn build_command(&self, cmd: &str, args: &[String]) -> Command {
        let mut command = Command::new(cmd);
        command.args(args);

        command.env_clear();
        if let Ok(path) = std::env::var("PATH") {
            command.env("PATH", path);
        }
        command.env("LC_ALL", "C");
        command.env("LANG", "C");

        if !self.config.env_passthrough_prefixes.is_empty() {
            for (key, value) in std::env::vars() {
                if self
                    .config
                    .env_passthrough_prefixes
                    .iter()
                    .any(|p| key.starts_with(p.as_str()))
                {
                    command.env(key, value);
                }
            }
        }

        command
    }

    /// Execute a child process with timeout and output capture.
    #[allow(clippy::type_complexity)]
    fn execute_with_timeout(
        &self,
        child: &mut Child,
        timeout: Duration,
        max_output: usize,
    ) -> Result<(Vec<u8>, Vec<u8>, Option<i32>, bool, bool), ToolError> {
        let deadline = Instant::now() + timeout;
        let mut stdout_buf = Vec::with_capacity(max_output.min(65536));
        let mut stderr_buf = Vec::with_capacity(max_output.min(65536));
        let mut truncated = false;

        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();

        let mut chunk = vec![0u8; 8192];

        loop {
            if Instant::now() >= deadline {
                warn!("command timed out, sending SIGTERM");
                kill_with_grace(child);
                let exit_code = child.wait().ok().and_then(|s| s.code());
                return Ok((stdout_buf, stderr_buf, exit_code, truncated, true));
            }

            let mut did_read = false;

            if let Some(ref mut out) = stdout {
                if let Ok(n) = try_read_nonblocking(out, &mut chunk) {
                    if n > 0 {
                        did_read = true;
                        append_capped(&mut stdout_buf, &chunk[..n], max_output, &mut truncated);
                    }
                }
            }

            if let Some(ref mut err) = stderr {
                if let Ok(n) = try_read_nonblocking(err, &mut chunk) {
                    if n > 0 {
                        did_read = true;
                        append_capped(&mut stderr_buf, &chunk[..n], max_output, &mut truncated);
                    }
                }
            }

            match child.try_wait() {
                Ok(Some(status)) => {
                    if let Some(ref mut out) = stdout {
                        let _ = drain_to_limit(out, &mut stdout_buf, max_output, &mut truncated);
                    }
                    if let Some(ref mut err) = stderr {
                        let _ = drain_to_limit(err, &mut stderr_buf, max_output, &mut truncated);
                    }

                    let exit_code = status.code();
                    trace!(exit_code = ?exit_code, "process exited");
                    return Ok((stdout_buf, stderr_buf, exit_code, truncated, false));
                }
                Ok(None) => {
                    if !did_read {
                        thread::sleep(Duration::from_millis(10));
                    }
                }
                Err(e) => {
                    error!(error = %e, "failed to wait for child");
                    return Err(ToolError::Io(e));
                }
            }
        }
    }
}

fn append_capped(buf: &mut Vec<u8>, data: &[u8], max: usize, truncated: &mut bool) {
    let space = max.saturating_sub(buf.len());
    if data.len() > space {
        *truncated = true;
    }
    buf.extend_from_slice(&data[..data.len().min(space)]);
}

/// Drain remaining data from a stream up to the limit.
///
/// Non-blocking so a grandchild still holding the pipe cannot hang us.
fn drain_to_limit<R: Read + std::os::unix::io::AsRawFd>(
    stream: &mut R,
    buf: &mut Vec<u8>,
    max: usize,
    truncated: &mut bool,
) -> std::io::Result<()> {
    let mut chunk = vec![0u8; 8192];
    loop {
        match try_read_nonblocking(stream, &mut chunk) {
            Ok(0) => break,
            Ok(n) => append_capped(buf, &chunk[..n], max, truncated),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Kill a process with SIGTERM, then SIGKILL after grace period.
fn kill_with_grace(child: &mut Child) {
    let pid = child.id() as i32;

    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }
    debug!(pid, "sent SIGTERM");

    thread::sleep(Duration::from_millis(SIGTERM_GRACE_MS));

    match child.try_wait() {
        Ok(Some(_)) => trace!(pid, "process exited after SIGTERM"),
        Ok(None) => {
            warn!(pid, "process did not exit after SIGTERM, sending SIGKILL");
            unsafe {
                libc::kill(pid, libc::SIGKILL);
            }
        }
        Err(e) => error!(pid, error = %e, "failed to check process status"),
    }
}

/// Try to read from a stream without blocking.
///
/// Sets O_NONBLOCK for the duration of one read and restores the original
/// flags. Returns Ok(0) if no data is available.
fn try_read_nonblocking<R: Read + std::os::unix::io::AsRawFd>(
    stream: &mut R,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    let fd = stream.as_raw_fd();

    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(std::io::Error::last_os_error());
    }

    let was_nonblocking = (flags & libc::O_NONBLOCK) != 0;
    if !was_nonblocking {
        let result = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
        if result < 0 {
            return Err(std::io::Error::last_os_error());
        }
    }

    let result = stream.read(buf);

    if !was_nonblocking {
        unsafe {
            libc::fcntl(fd, libc::F_SETFL, flags);
        }
    }

    match result {
        Ok(n) => Ok(n),
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
        Err(e) => Err(e),
    }
}

/// Whether `path` names an existing executable file.
pub fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// First executable entry of `candidates`, in order.
pub fn first_executable<'a, I>(candidates: I) -> Option<&'a Path>
where
    I: IntoIterator<Item = &'a std::path::PathBuf>,
{
    candidates
        .into_iter()
        .map(|p| p.as_path())
        .find(|p| is_executable(p))
}

/// Builder for creating a tool runner with custom configuration.
#[derive(Debug, Default)]
pub struct ToolRunnerBuilder {
    config: ToolConfig,
}

impl ToolRunnerBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.default_timeout = timeout;
        self
    }

    /// Set the maximum output size.
    pub fn max_output(mut self, max_bytes: usize) -> Self {
        self.config.max_output_bytes = max_bytes;
        self
    }

    /// Pass environment variables with this prefix through to children.
    pub fn pass_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.env_passthrough_prefixes.push(prefix.into());
        self
    }

    /// Add allowed commands (restrict to only these).
    pub fn allow_commands<I, S>(mut self, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for cmd in commands {
            self.config.allowed_commands.insert(cmd.into());
        }
        self
    }

    /// Build the tool runner.
    pub fn build(self) -> ToolRunner {
        ToolRunner::new(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_echo() {
        let runner = ToolRunner::default();
        let output = runner.run_tool("echo", &["hello", "world"], None).unwrap();
        assert!(output.success());
        assert_eq!(output.stdout_str().trim(), "hello world");
        assert!(!output.truncated);
    }

    #[test]
    fn test_nonzero_exit_is_not_an_error() {
        let runner = ToolRunner::default();
        let output = runner
            .run_tool("sh", &["-c", "echo 'ERROR: session 7 not found' >&2; exit 1"], None)
            .unwrap();
        assert!(!output.success());
        assert_eq!(output.exit_code, Some(1));
        assert_eq!(output.diagnostic(), "ERROR: session 7 not found");
    }

    #[test]
    fn test_command_not_found() {
        let runner = ToolRunner::default();
        let err = runner
            .run_tool("/nonexistent/command/that/does/not/exist", &[], None)
            .unwrap_err();
        assert!(matches!(err, ToolError::CommandNotFound(_)));
    }

    #[test]
    fn test_invalid_path_shell_metachar() {
        let runner = ToolRunner::default();
        let err = runner.run_tool("echo; rm -rf /", &[], None).unwrap_err();
        assert!(matches!(err, ToolError::InvalidPath(_)));
    }

    #[test]
    fn test_arguments_are_not_shell_expanded() {
        let runner = ToolRunner::default();
        let output = runner.run_tool("echo", &["$(id)", "a;b"], None).unwrap();
        assert_eq!(output.stdout_str().trim(), "$(id) a;b");
    }

    #[test]
    fn test_timeout() {
        let runner = ToolRunnerBuilder::new()
            .timeout(Duration::from_millis(100))
            .build();
        let start = Instant::now();
        let err = runner.run_tool("sleep", &["10"], None).unwrap_err();
        assert!(matches!(err, ToolError::Timeout(_)));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_output_truncation() {
        let runner = ToolRunnerBuilder::new().max_output(100).build();
        let output = runner
            .run_tool("sh", &["-c", "head -c 1000 /dev/zero | tr '\\0' 'x'"], None)
            .unwrap();
        assert!(output.truncated);
        assert!(output.stdout.len() <= 100);
    }

    #[test]
    fn test_allowlist() {
        let runner = ToolRunnerBuilder::new().allow_commands(["echo"]).build();
        assert!(runner.run_tool("echo", &["ok"], None).is_ok());
        assert!(matches!(
            runner.run_tool("cat", &["/dev/null"], None),
            Err(ToolError::NotAllowed(_))
        ));
    }

    #[test]
    fn test_environment_is_scrubbed() {
        std::env::set_var("ST_TOOL_RUNNER_SECRET", "leak");
        std::env::set_var("NZ_TOOL_RUNNER_TEST", "kept");
        let runner = ToolRunnerBuilder::new().pass_env_prefix("NZ_").build();
        let output = runner.run_tool("env", &[], None).unwrap();
        let env = output.stdout_str();
        assert!(!env.contains("ST_TOOL_RUNNER_SECRET"));
        assert!(env.contains("NZ_TOOL_RUNNER_TEST=kept"));
        assert!(env.contains("LC_ALL=C"));
    }

    #[test]
    fn test_first_executable_skips_missing() {
        let candidates = vec![
            std::path::PathBuf::from("/nonexistent/nzsession"),
            std::path::PathBuf::from("/bin/sh"),
        ];
        assert_eq!(first_executable(&candidates), Some(Path::new("/bin/sh")));
    }
}
