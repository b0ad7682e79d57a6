//! Logging configuration for the console.
//!
//! Diagnostics go to stderr; stdout belongs to previews, reports and JSON.
//! Precedence, lowest first: built-in `warn`, `ST_LOG` / `ST_LOG_FORMAT`,
//! then `-v` / `-q` and `--format json`. `RUST_LOG` replaces the whole
//! filter at init time.

use std::io::IsTerminal;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Human,
    /// One JSON object per line, used whenever command output is JSON.
    Jsonl,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "human" => Ok(LogFormat::Human),
            "jsonl" | "json" => Ok(LogFormat::Jsonl),
            _ => Err(format!("unknown log format: {}", s)),
        }
    }
}

/// Minimum level for the crate's own targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Level selected by `-q` and repeated `-v`. `None` keeps the default.
    pub fn from_flags(verbose: u8, quiet: bool) -> Option<Self> {
        if quiet {
            return Some(LogLevel::Error);
        }
        match verbose {
            0 => None,
            1 => Some(LogLevel::Info),
            2 => Some(LogLevel::Debug),
            _ => Some(LogLevel::Trace),
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(format!("unknown log level: {}", s)),
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(s)
    }
}

/// Resolved logging settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub format: LogFormat,
    pub level: LogLevel,
    /// Timestamps in human output; off while prompting on a terminal.
    pub timestamps: bool,
    /// `ST_LOG*` values that could not be parsed, reported once logging is up.
    pub rejected_env: Vec<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            format: LogFormat::Human,
            level: LogLevel::Warn,
            timestamps: true,
            rejected_env: Vec::new(),
        }
    }
}

impl LogConfig {
    /// Settings for one console invocation, read from the process environment.
    pub fn for_console(verbose: u8, quiet: bool, json_output: bool) -> Self {
        let mut config = Self::resolve(
            std::env::var("ST_LOG").ok().as_deref(),
            std::env::var("ST_LOG_FORMAT").ok().as_deref(),
            verbose,
            quiet,
            json_output,
        );
        config.timestamps = !std::io::stderr().is_terminal();
        config
    }

    fn resolve(
        env_level: Option<&str>,
        env_format: Option<&str>,
        verbose: u8,
        quiet: bool,
        json_output: bool,
    ) -> Self {
        let mut config = LogConfig::default();

        if let Some(raw) = env_level {
            match raw.parse::<LogLevel>() {
                Ok(level) => config.level = level,
                Err(e) => config.rejected_env.push(format!("ST_LOG: {}", e)),
            }
        }
        if let Some(raw) = env_format {
            match raw.parse::<LogFormat>() {
                Ok(format) => config.format = format,
                Err(e) => config.rejected_env.push(format!("ST_LOG_FORMAT: {}", e)),
            }
        }

        if let Some(level) = LogLevel::from_flags(verbose, quiet) {
            config.level = level;
        }
        if json_output {
            config.format = LogFormat::Jsonl;
        }
        config
    }
}
