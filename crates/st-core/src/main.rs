//! Session Triage Core - termination safety pipeline CLI
//!
//! The main entry point for st-core, handling:
//! - Session listing and dry-run previews
//! - Interactive, staged termination with verification
//! - Environment checks, audit verification, and policy inspection

use clap::{ArgGroup, Args, Parser, Subcommand};
use st_common::error::StructuredError;
use st_common::{OutputFormat, SessionId, SessionRecord, SCHEMA_VERSION};
use st_config::validate::MAX_SETTLING_DELAY_SECS;
use st_config::{load_policy, ConfigError, ResolvedPolicy};
use st_core::action::{aborter_from_settings, SessionAborter};
use st_core::audit::{
    resolve_audit_path, verify_log, AuditContext, AuditLog, AuditSink, UnavailableAuditSink,
};
use st_core::collect::{
    inspector_for_host, InspectOutcome, NzsqlClient, NzsqlSource, Predicate, SessionFilter,
    SessionInspector, SessionSource,
};
use st_core::exit_codes::ExitCode;
use st_core::logging::{
    generate_run_id, get_host_id, init_logging, LogConfig,
};
use st_core::pipeline::{AuditStatus, Pipeline, PipelineOptions, PipelineReport, Prepared};
use st_core::prompt::ConsolePrompter;
use st_core::verify::TerminationOutcome;
use std::path::PathBuf;
use std::time::Duration;

/// Session Triage Core - safe termination of appliance sessions
#[derive(Parser)]
#[command(name = "st-core")]
#[command(author, version, long_about = None)]
#[command(about = "Session Triage Core - safe termination of appliance sessions")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOpts,
}

/// Global options available to all commands
#[derive(Args, Debug)]
struct GlobalOpts {
    /// Policy file (overrides SESSION_TRIAGE_POLICY and the config dirs)
    #[arg(long, global = true)]
    policy: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'f', global = true, default_value = "human")]
    format: OutputFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Do not write the audit log
    #[arg(long, global = true)]
    no_audit: bool,

    /// Appliance host (overrides the policy)
    #[arg(long, global = true)]
    host: Option<String>,

    /// Database the SQL client connects to (overrides the policy)
    #[arg(long, global = true)]
    database: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// List sessions matching the filter
    List(ListArgs),

    /// Dry run: classify and preview the sessions a termination would hit
    Preview(PreviewArgs),

    /// Preview, confirm, terminate, and verify
    Terminate(TerminateArgs),

    /// Validate the policy and probe the SQL client and abort utility
    Check,

    /// Audit log operations
    Audit(AuditArgs),

    /// Policy inspection
    Config(ConfigArgs),

    /// Print version information
    Version,
}

// ============================================================================
// Command argument structs
// ============================================================================

/// Session filter. All given predicates must hold.
#[derive(Args, Debug, Default)]
struct FilterArgs {
    /// Username contains (LIKE, case-insensitive; % and _ are wildcards)
    #[arg(long)]
    user: Option<String>,

    /// Database name (case-insensitive)
    #[arg(long)]
    db: Option<String>,

    /// Client OS username contains (LIKE, case-insensitive)
    #[arg(long)]
    client_user: Option<String>,

    /// Session status label (case-insensitive)
    #[arg(long)]
    status: Option<String>,

    /// Connected at least this long ago (e.g. 90s, 30m, 2h, 1d; bare number = seconds)
    #[arg(long, value_parser = parse_age)]
    min_age: Option<Duration>,

    /// Exactly this session id
    #[arg(long)]
    id: Option<SessionId>,
}

impl FilterArgs {
    fn to_filter(&self) -> Result<SessionFilter, st_common::Error> {
        let mut predicates = Vec::new();
        if let Some(user) = &self.user {
            predicates.push(Predicate::UsernameLike(user.clone()));
        }
        if let Some(db) = &self.db {
            predicates.push(Predicate::Database(db.clone()));
        }
        if let Some(client_user) = &self.client_user {
            predicates.push(Predicate::ClientUserLike(client_user.clone()));
        }
        if let Some(status) = &self.status {
            predicates.push(Predicate::Status(status.clone()));
        }
        if let Some(age) = self.min_age {
            predicates.push(Predicate::MinAge(age));
        }
        if let Some(id) = self.id {
            predicates.push(Predicate::SessionId(id));
        }
        SessionFilter::new(predicates).map_err(|e| st_common::Error::InvalidInput(e.to_string()))
    }
}

#[derive(Args, Debug)]
struct ListArgs {
    #[command(flatten)]
    filter: FilterArgs,
}

#[derive(Args, Debug)]
#[command(group(
    ArgGroup::new("criteria")
        .required(true)
        .multiple(true)
        .args(["user", "db", "client_user", "status", "min_age", "id"])
))]
struct PreviewArgs {
    #[command(flatten)]
    filter: FilterArgs,
}

#[derive(Args, Debug)]
#[command(group(
    ArgGroup::new("criteria")
        .required(true)
        .multiple(true)
        .args(["user", "db", "client_user", "status", "min_age", "id"])
))]
struct TerminateArgs {
    #[command(flatten)]
    filter: FilterArgs,

    /// Never offer the post-verification retry
    #[arg(long)]
    no_retry: bool,

    /// Settling delay before verification, in seconds (overrides the policy)
    #[arg(long)]
    settle: Option<u64>,
}

#[derive(Args, Debug)]
struct AuditArgs {
    #[command(subcommand)]
    command: AuditCommands,
}

#[derive(Subcommand, Debug)]
enum AuditCommands {
    /// Verify the audit log hash chain
    Verify {
        /// Log file (defaults to the resolved audit log)
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show the effective policy and where it came from
    Show,
}

fn main() {
    let cli = Cli::parse();

    let log_config = LogConfig::for_console(
        cli.global.verbose,
        cli.global.quiet,
        cli.global.format == OutputFormat::Json,
    );
    init_logging(&log_config);
    for rejected in &log_config.rejected_env {
        tracing::warn!(setting = %rejected, "ignoring logging setting");
    }

    let exit_code = match &cli.command {
        Commands::List(args) => run_list(&cli.global, args),
        Commands::Preview(args) => run_preview(&cli.global, args),
        Commands::Terminate(args) => run_terminate(&cli.global, args),
        Commands::Check => run_check(&cli.global),
        Commands::Audit(args) => match &args.command {
            AuditCommands::Verify { path } => run_audit_verify(&cli.global, path.as_ref()),
        },
        Commands::Config(args) => match &args.command {
            ConfigCommands::Show => run_config_show(&cli.global),
        },
        Commands::Version => {
            print_version(&cli.global);
            ExitCode::Clean
        }
    };

    std::process::exit(exit_code.as_i32());
}

// ============================================================================
// Shared setup
// ============================================================================

/// Load the policy and apply the global host/database overrides.
fn load_effective_policy(global: &GlobalOpts) -> Result<ResolvedPolicy, ConfigError> {
    let mut resolved = load_policy(global.policy.as_deref())?;
    if let Some(host) = &global.host {
        resolved.policy.source.host = Some(host.clone());
        resolved.policy.executor.host = Some(host.clone());
    }
    if let Some(db) = &global.database {
        resolved.policy.source.database = db.clone();
    }
    Ok(resolved)
}

fn open_source(resolved: &ResolvedPolicy) -> Result<NzsqlSource, st_common::Error> {
    NzsqlClient::locate(&resolved.policy.source)
        .map(NzsqlSource::new)
        .map_err(|e| st_common::Error::SourceUnavailable(e.to_string()))
}

fn build_aborter(
    resolved: &ResolvedPolicy,
    source: &NzsqlSource,
) -> Result<Box<dyn SessionAborter>, st_common::Error> {
    aborter_from_settings(&resolved.policy.executor, Some(source.client().clone()))
        .map_err(|e| st_common::Error::UtilityUnavailable(e.to_string()))
}

fn open_audit(global: &GlobalOpts) -> Option<Box<dyn AuditSink>> {
    if global.no_audit {
        return None;
    }
    let mut ctx = AuditContext::new(generate_run_id(), get_host_id());
    if let Some(user) = std::env::var("USER").ok().or_else(|| std::env::var("LOGNAME").ok()) {
        ctx = ctx.with_operator(user);
    }
    match AuditLog::open_or_create(ctx) {
        Ok(log) => Some(Box::new(log)),
        Err(e) => {
            tracing::warn!(error = %e, "audit log unavailable");
            Some(Box::new(UnavailableAuditSink::new(e.to_string())))
        }
    }
}

// ============================================================================
// Command implementations
// ============================================================================

fn run_list(global: &GlobalOpts, args: &ListArgs) -> ExitCode {
    let resolved = match load_effective_policy(global) {
        Ok(r) => r,
        Err(e) => return output_config_error(global, &e),
    };
    let filter = match args.filter.to_filter() {
        Ok(f) => f,
        Err(e) => return output_error(global, &e),
    };
    let source = match open_source(&resolved) {
        Ok(s) => s,
        Err(e) => return output_error(global, &e),
    };

    let outcome = match SessionInspector::new(&source).inspect(&filter) {
        Ok(o) => o,
        Err(e) => return output_error(global, &e.into()),
    };
    let (own_session, excluded_own) = match &outcome {
        InspectOutcome::Candidates(i) => (i.own_session, i.excluded_own),
        InspectOutcome::NoCandidates {
            own_session,
            excluded_own,
        } => (*own_session, *excluded_own),
    };
    let records = outcome.records();

    match global.format {
        OutputFormat::Json => {
            let response = serde_json::json!({
                "schema_version": SCHEMA_VERSION,
                "generated_at": chrono::Utc::now().to_rfc3339(),
                "filter": filter.predicates(),
                "own_session": own_session,
                "own_session_excluded": excluded_own,
                "sessions": records,
            });
            print_json(&response);
        }
        OutputFormat::Summary => {
            println!("{} session(s) matched (own session {} excluded)", records.len(), own_session);
        }
        OutputFormat::Human => {
            println!("{}", render_session_table(records));
            println!();
            println!("{} session(s); own session {} not listed", records.len(), own_session);
        }
    }
    ExitCode::Clean
}

fn run_preview(global: &GlobalOpts, args: &PreviewArgs) -> ExitCode {
    let resolved = match load_effective_policy(global) {
        Ok(r) => r,
        Err(e) => return output_config_error(global, &e),
    };
    let filter = match args.filter.to_filter() {
        Ok(f) => f,
        Err(e) => return output_error(global, &e),
    };
    let source = match open_source(&resolved) {
        Ok(s) => s,
        Err(e) => return output_error(global, &e),
    };
    let processes = inspector_for_host(resolved.policy.source.host.as_deref());
    let pipeline = Pipeline::new(
        &source,
        processes.as_ref(),
        &resolved.policy.safety,
        PipelineOptions::from_policy(&resolved.policy),
    );

    match pipeline.prepare(&filter) {
        Err(e) => output_error(global, &e.into()),
        Ok(Prepared::NoCandidates { own_session, .. }) => {
            output_no_candidates(global, own_session);
            ExitCode::Clean
        }
        Ok(Prepared::Preview(preview)) => {
            match global.format {
                OutputFormat::Json => print_json(&serde_json::json!({
                    "schema_version": SCHEMA_VERSION,
                    "preview": &preview,
                })),
                OutputFormat::Summary => println!(
                    "{} session(s), verdict {}",
                    preview.entries().len(),
                    if preview.is_safe() { "safe" } else { "UNSAFE" }
                ),
                OutputFormat::Human => println!("{}", preview.render_human()),
            }
            ExitCode::PreviewOnly
        }
    }
}

fn run_terminate(global: &GlobalOpts, args: &TerminateArgs) -> ExitCode {
    let resolved = match load_effective_policy(global) {
        Ok(r) => r,
        Err(e) => return output_config_error(global, &e),
    };
    let filter = match args.filter.to_filter() {
        Ok(f) => f,
        Err(e) => return output_error(global, &e),
    };
    let source = match open_source(&resolved) {
        Ok(s) => s,
        Err(e) => return output_error(global, &e),
    };
    let aborter = match build_aborter(&resolved, &source) {
        Ok(a) => a,
        Err(e) => return output_error(global, &e),
    };

    let mut options = PipelineOptions::from_policy(&resolved.policy);
    if args.no_retry {
        options.offer_retry = false;
    }
    if let Some(secs) = args.settle {
        if secs > MAX_SETTLING_DELAY_SECS {
            let err = st_common::Error::InvalidInput(format!(
                "--settle must be at most {} seconds",
                MAX_SETTLING_DELAY_SECS
            ));
            return output_error(global, &err);
        }
        options.settling_delay = Duration::from_secs(secs);
    }
    let processes = inspector_for_host(resolved.policy.source.host.as_deref());
    let pipeline = Pipeline::new(&source, processes.as_ref(), &resolved.policy.safety, options);

    let preview = match pipeline.prepare(&filter) {
        Err(e) => return output_error(global, &e.into()),
        Ok(Prepared::NoCandidates { own_session, .. }) => {
            output_no_candidates(global, own_session);
            return ExitCode::Clean;
        }
        Ok(Prepared::Preview(preview)) => preview,
    };

    // The operator must see the preview even when stdout is machine-read.
    if global.format == OutputFormat::Human {
        println!("{}", preview.render_human());
        println!();
    } else {
        eprintln!("{}", preview.render_human());
        eprintln!();
    }

    let mut audit = open_audit(global);
    let mut prompter = ConsolePrompter::stdio();
    let sink = audit.as_mut().map(|b| &mut **b as &mut dyn AuditSink);
    let report = match pipeline.execute(preview, aborter.as_ref(), &mut prompter, sink) {
        Ok(r) => r,
        Err(e) => return output_error(global, &e.into()),
    };

    output_report(global, &report);
    report.exit_code()
}

fn run_check(global: &GlobalOpts) -> ExitCode {
    let mut results: Vec<serde_json::Value> = Vec::new();
    let mut exit = ExitCode::Clean;

    let resolved = match load_effective_policy(global) {
        Ok(r) => {
            let provenance = r.provenance();
            results.push(serde_json::json!({
                "check": "policy",
                "status": "ok",
                "source": provenance.source,
                "path": provenance.path.as_ref().map(|p| p.display().to_string()),
                "hash": provenance.hash,
            }));
            Some(r)
        }
        Err(e) => {
            exit = ExitCode::ArgsError;
            results.push(serde_json::json!({
                "check": "policy",
                "status": "error",
                "error": e.to_string(),
            }));
            None
        }
    };

    if let Some(resolved) = &resolved {
        match open_source(resolved) {
            Ok(source) => {
                match source.current_session_id() {
                    Ok(own) => results.push(serde_json::json!({
                        "check": "metadata_source",
                        "status": "ok",
                        "client": source.client().client_path().display().to_string(),
                        "own_session": own,
                    })),
                    Err(e) => {
                        exit = ExitCode::SourceUnavailable;
                        results.push(serde_json::json!({
                            "check": "metadata_source",
                            "status": "error",
                            "error": e.to_string(),
                        }));
                    }
                }
                let aborter = build_aborter(resolved, &source)
                    .and_then(|a| a.probe().map_err(|e| st_common::Error::UtilityUnavailable(e.to_string())));
                match aborter {
                    Ok(()) => results.push(serde_json::json!({
                        "check": "abort_utility",
                        "status": "ok",
                        "sql_fallback": resolved.policy.executor.sql_fallback,
                    })),
                    Err(e) => {
                        exit = ExitCode::SourceUnavailable;
                        results.push(serde_json::json!({
                            "check": "abort_utility",
                            "status": "error",
                            "error": e.to_string(),
                        }));
                    }
                }
            }
            Err(e) => {
                exit = ExitCode::SourceUnavailable;
                results.push(serde_json::json!({
                    "check": "metadata_source",
                    "status": "error",
                    "error": e.to_string(),
                }));
            }
        }
    }

    let all_ok = exit == ExitCode::Clean;
    match global.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "schema_version": SCHEMA_VERSION,
            "generated_at": chrono::Utc::now().to_rfc3339(),
            "status": if all_ok { "ok" } else { "error" },
            "checks": results,
        })),
        OutputFormat::Summary => {
            println!("check: {}", if all_ok { "OK" } else { "FAILED" });
        }
        OutputFormat::Human => {
            println!("# st-core check");
            println!();
            for result in &results {
                let check = result.get("check").and_then(|v| v.as_str()).unwrap_or("?");
                let status = result.get("status").and_then(|v| v.as_str()).unwrap_or("?");
                let symbol = if status == "ok" { "✓" } else { "✗" };
                println!("{} {}: {}", symbol, check, status);
                if let Some(error) = result.get("error").and_then(|v| v.as_str()) {
                    println!("  Error: {}", error);
                }
            }
        }
    }
    exit
}

fn run_audit_verify(global: &GlobalOpts, path: Option<&PathBuf>) -> ExitCode {
    let path = match path {
        Some(p) => p.clone(),
        None => match resolve_audit_path() {
            Ok(p) => p,
            Err(e) => return output_error(global, &e.into()),
        },
    };
    let result = match verify_log(&path) {
        Ok(r) => r,
        Err(e) => return output_error(global, &e.into()),
    };

    match global.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "schema_version": SCHEMA_VERSION,
            "path": path.display().to_string(),
            "verification": &result,
        })),
        OutputFormat::Summary => println!(
            "audit: {} ({} entries)",
            if result.is_valid { "OK" } else { "BROKEN" },
            result.entries_verified
        ),
        OutputFormat::Human => {
            println!("Audit log: {}", path.display());
            println!("Entries verified: {}", result.entries_verified);
            println!("State hash: {}", result.state_hash);
            if let Some(link) = &result.broken_link {
                println!(
                    "Chain broken at line {} ({:?}): expected {}, found {}",
                    link.line, link.break_type, link.expected, link.actual
                );
            }
            for t in &result.tampered_entries {
                println!("Tampered entry at line {} ({})", t.line, t.event_type);
            }
            println!("Status: {}", if result.is_valid { "intact" } else { "BROKEN" });
        }
    }

    if result.is_valid {
        ExitCode::Clean
    } else {
        ExitCode::AuditBroken
    }
}

fn run_config_show(global: &GlobalOpts) -> ExitCode {
    let resolved = match load_effective_policy(global) {
        Ok(r) => r,
        Err(e) => return output_config_error(global, &e),
    };
    let response = serde_json::json!({
        "schema_version": SCHEMA_VERSION,
        "generated_at": chrono::Utc::now().to_rfc3339(),
        "source": resolved.provenance(),
        "policy": &resolved.policy,
    });
    match global.format {
        OutputFormat::Summary => {
            let provenance = resolved.provenance();
            println!(
                "policy: {} {}",
                provenance.source,
                provenance
                    .path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(built-in)".to_string())
            );
        }
        _ => print_json(&response),
    }
    ExitCode::Clean
}

fn print_version(global: &GlobalOpts) {
    let version_info = serde_json::json!({
        "schema_version": SCHEMA_VERSION,
        "st_core_version": env!("CARGO_PKG_VERSION"),
    });

    match global.format {
        OutputFormat::Json => print_json(&version_info),
        _ => {
            println!("st-core {}", env!("CARGO_PKG_VERSION"));
            println!("schema version: {}", SCHEMA_VERSION);
        }
    }
}

// ============================================================================
// Output helpers
// ============================================================================

fn print_json(value: &impl serde::Serialize) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("failed to serialize output: {}", e),
    }
}

fn render_session_table(records: &[SessionRecord]) -> String {
    let mut lines = vec![format!(
        "{:<10} {:<16} {:<14} {:<16} {:<20} {:<8} {:<8} OS-USER",
        "SESSION", "USER", "DATABASE", "CLIENT", "CONNECTED", "STATUS", "PID"
    )];
    for r in records {
        lines.push(format!(
            "{:<10} {:<16} {:<14} {:<16} {:<20} {:<8} {:<8} {}",
            r.id.to_string(),
            r.username,
            r.database,
            r.client_ip,
            r.connected_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            r.status,
            r.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
            r.client_os_user.as_deref().unwrap_or("-"),
        ));
    }
    lines.join("\n")
}

fn output_no_candidates(global: &GlobalOpts, own_session: SessionId) {
    match global.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "schema_version": SCHEMA_VERSION,
            "outcome": "no_candidates",
            "own_session": own_session,
        })),
        _ => println!("No candidate sessions (own session {} is never a candidate).", own_session),
    }
}

fn output_report(global: &GlobalOpts, report: &PipelineReport) {
    match global.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "schema_version": SCHEMA_VERSION,
            "report": report,
            "exit_code": report.exit_code().as_i32(),
        })),
        OutputFormat::Summary => match report {
            PipelineReport::Cancelled { cancellation, .. } => {
                println!("cancelled at {}", cancellation.stage)
            }
            PipelineReport::Executed { result, .. } => println!(
                "terminated {} failed {} still_active {} unknown {}",
                result.final_counts.terminated,
                result.final_counts.failed,
                result.final_counts.still_active,
                result.final_counts.unknown
            ),
        },
        OutputFormat::Human => match report {
            PipelineReport::Cancelled { cancellation, .. } => {
                println!(
                    "Cancelled at {}. Nothing was terminated; run a new preview to try again.",
                    cancellation.stage
                );
            }
            PipelineReport::Executed { result, .. } => {
                let before = result.counts_before_retry;
                println!(
                    "Executed: {} terminated, {} failed; verification: {} still active, {} unknown",
                    before.terminated, before.failed, before.still_active, before.unknown
                );
                for s in &result.sessions {
                    let label = match s.outcome {
                        TerminationOutcome::Terminated => "terminated",
                        TerminationOutcome::Failed => "failed",
                        TerminationOutcome::StillActive => "STILL ACTIVE",
                        TerminationOutcome::Unknown => "unknown",
                    };
                    print!("  session {:<10} {:<14}", s.details.session_id.to_string(), label);
                    if s.retried {
                        print!(" (retried)");
                    }
                    if let Some(d) = &s.diagnostic {
                        print!(" {}", d);
                    }
                    println!();
                }
                let after = result.final_counts;
                println!(
                    "Final: {} terminated, {} failed, {} still active, {} unknown",
                    after.terminated, after.failed, after.still_active, after.unknown
                );
            }
        },
    }
    if let AuditStatus::Failed { error } = report.audit() {
        eprintln!("WARNING: audit record not written: {}", error);
    }
}

fn output_error(global: &GlobalOpts, error: &st_common::Error) -> ExitCode {
    match global.format {
        OutputFormat::Json => {
            let structured = StructuredError::from(error);
            eprintln!("{}", structured.to_json_pretty());
        }
        _ => eprintln!("{}", error.format_human()),
    }
    ExitCode::from_error(error)
}

fn output_config_error(global: &GlobalOpts, error: &ConfigError) -> ExitCode {
    let exit_code = match error {
        ConfigError::IoError { .. } => ExitCode::IoError,
        _ => ExitCode::ArgsError,
    };

    match global.format {
        OutputFormat::Json => {
            let response = serde_json::json!({
                "schema_version": SCHEMA_VERSION,
                "status": "error",
                "error": {
                    "code": exit_code.as_i32(),
                    "message": error.to_string(),
                }
            });
            print_json_stderr(&response);
        }
        _ => {
            eprintln!("# Configuration Error");
            eprintln!();
            eprintln!("Error: {}", error);
        }
    }

    exit_code
}

fn print_json_stderr(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => eprintln!("{}", s),
        Err(e) => eprintln!("failed to serialize error: {}", e),
    }
}

/// Parse `90s`, `30m`, `2h`, `1d`, or a bare number of seconds.
fn parse_age(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("age must not be empty".to_string());
    }
    let (digits, multiplier) = match s.char_indices().last() {
        Some((i, 's')) => (&s[..i], 1),
        Some((i, 'm')) => (&s[..i], 60),
        Some((i, 'h')) => (&s[..i], 3_600),
        Some((i, 'd')) => (&s[..i], 86_400),
        _ => (s, 1),
    };
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid age {:?}: expected e.g. 90s, 30m, 2h, 1d", s))?;
    value
        .checked_mul(multiplier)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("age {:?} is too large", s))
}
