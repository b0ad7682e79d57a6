//! End-to-end pipeline scenarios against in-memory source, aborter and prompts.

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use st_common::{ProcessId, ProcessInfo, SessionId, SessionRecord};
use st_config::SafetyRules;
use st_core::action::ScriptedAborter;
use st_core::audit::MemoryAuditSink;
use st_core::collect::{
    Predicate, SessionFilter, StaticProcessInspector, StaticSessionSource,
    UnavailableProcessInspector,
};
use st_core::exit_codes::ExitCode;
use st_core::gate::{GateStage, CONFIRM_KEYWORD, FORCE_KEYWORD, RISK_KEYWORD};
use st_core::pipeline::{AuditStatus, PipelineError};
use st_core::prompt::ScriptedPrompter;
use st_core::safety::SafetyRule;
use st_core::verify::{OutcomeCounts, RetryDecision, TerminationOutcome};
use st_core::{Pipeline, PipelineOptions, PipelineReport, Prepared, TerminationPreview};
use std::time::Duration;

const OWN: SessionId = SessionId(900);

fn session(id: u64, user: &str, ip: &str, db: &str) -> SessionRecord {
    SessionRecord {
        id: SessionId(id),
        username: user.to_string(),
        database: db.to_string(),
        client_ip: ip.to_string(),
        connected_at: Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()
            + ChronoDuration::seconds(id as i64),
        status: "active".to_string(),
        pid: Some(ProcessId(5000 + id as u32)),
        client_os_user: Some("etl".to_string()),
        application: None,
    }
}

fn own_row() -> SessionRecord {
    session(OWN.0, "DBA_CONSOLE", "10.20.0.2", "SALES")
}

fn etl_rows() -> Vec<SessionRecord> {
    vec![
        session(101, "ETL_LOADER", "10.20.0.15", "SALES"),
        session(102, "ETL_NIGHTLY", "10.20.0.16", "SALES"),
        session(103, "ETL_ADHOC", "10.20.0.17", "MART"),
        session(200, "BI_READER", "10.20.0.30", "MART"),
        own_row(),
    ]
}

fn processes() -> StaticProcessInspector {
    StaticProcessInspector::new([101u32, 102, 103, 200].into_iter().map(|id| ProcessInfo {
        pid: ProcessId(5000 + id),
        owner: "nzuser".to_string(),
        command: "postgres".to_string(),
    }))
}

fn options() -> PipelineOptions {
    PipelineOptions {
        settling_delay: Duration::ZERO,
        offer_retry: true,
    }
}

fn etl_filter() -> SessionFilter {
    SessionFilter::new(vec![Predicate::UsernameLike("ETL%".to_string())]).unwrap()
}

fn expect_preview(prepared: Prepared) -> TerminationPreview {
    match prepared {
        Prepared::Preview(preview) => preview,
        Prepared::NoCandidates { .. } => panic!("expected a preview"),
    }
}

#[test]
fn scenario_a_safe_batch_needs_confirm_and_yes_only() {
    let source = StaticSessionSource::new(etl_rows(), Some(OWN));
    let procs = processes();
    let rules = SafetyRules::default();
    let pipeline = Pipeline::new(&source, &procs, &rules, options());

    let preview = expect_preview(pipeline.prepare(&etl_filter()).unwrap());
    assert!(preview.is_safe());
    assert_eq!(preview.ids(), vec![SessionId(103), SessionId(102), SessionId(101)]);

    let aborter = ScriptedAborter::new(source.clone());
    let mut prompter = ScriptedPrompter::new([CONFIRM_KEYWORD, "y"]);
    let mut audit = MemoryAuditSink::new();
    let report = pipeline
        .execute(preview, &aborter, &mut prompter, Some(&mut audit))
        .unwrap();

    assert_eq!(prompter.asked().len(), 2);
    assert!(!prompter.asked()[0].contains(FORCE_KEYWORD));
    assert_eq!(report.exit_code(), ExitCode::AllTerminated);
    match &report {
        PipelineReport::Executed {
            safety_override,
            result,
            audit,
            ..
        } => {
            assert!(!*safety_override);
            assert!(result.all_terminated());
            assert_eq!(result.retry_decision, RetryDecision::NotNeeded);
            assert_eq!(audit, &AuditStatus::Written);
        }
        other => panic!("unexpected report {other:?}"),
    }
    assert_eq!(audit.batches.len(), 1);
    assert!(source.contains(SessionId(200)));
    assert!(source.contains(OWN));

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["outcome"], "executed");
    assert_eq!(json["result"]["final_counts"]["terminated"], 3);
    assert_eq!(json["audit"]["status"], "written");
}

#[test]
fn scenario_b_own_session_by_id_is_no_candidates() {
    let source = StaticSessionSource::new(etl_rows(), Some(OWN));
    let procs = processes();
    let rules = SafetyRules::default();
    let pipeline = Pipeline::new(&source, &procs, &rules, options());

    let prepared = pipeline.prepare(&SessionFilter::session(OWN).unwrap()).unwrap();
    match prepared {
        Prepared::NoCandidates {
            own_session,
            excluded_own,
        } => {
            assert_eq!(own_session, OWN);
            assert!(excluded_own);
        }
        Prepared::Preview(_) => panic!("own session must never be a candidate"),
    }
}

#[test]
fn scenario_c_system_user_requires_full_override() {
    let mut rows = etl_rows();
    rows.push(session(150, "SYSTEM", "10.20.0.40", "SALES"));
    let filter = SessionFilter::new(vec![Predicate::Database("SALES".to_string())]).unwrap();

    let source = StaticSessionSource::new(rows, Some(OWN));
    let procs = processes();
    let rules = SafetyRules::default();
    let pipeline = Pipeline::new(&source, &procs, &rules, options());
    let aborter = ScriptedAborter::new(source.clone());

    // CONFIRM is not accepted where FORCE is required.
    let preview = expect_preview(pipeline.prepare(&filter).unwrap());
    assert!(!preview.is_safe());
    assert!(preview
        .unsafe_reasons()
        .iter()
        .any(|(id, reason)| *id == SessionId(150) && reason.rule == SafetyRule::SystemUser));

    let mut prompter = ScriptedPrompter::new([CONFIRM_KEYWORD, RISK_KEYWORD, "y"]);
    let report = pipeline.execute(preview, &aborter, &mut prompter, None).unwrap();
    match &report {
        PipelineReport::Cancelled { cancellation, audit } => {
            assert_eq!(cancellation.stage, GateStage::SafetyOverride);
            assert_eq!(audit, &AuditStatus::Disabled);
        }
        other => panic!("unexpected report {other:?}"),
    }
    assert_eq!(report.exit_code(), ExitCode::Cancelled);
    assert!(aborter.calls().is_empty());
    assert_eq!(serde_json::to_value(&report).unwrap()["outcome"], "cancelled");

    // A fresh preview with the full sequence commits.
    let preview = expect_preview(pipeline.prepare(&filter).unwrap());
    let mut prompter = ScriptedPrompter::new([FORCE_KEYWORD, RISK_KEYWORD, "y"]);
    let mut audit = MemoryAuditSink::new();
    let report = pipeline
        .execute(preview, &aborter, &mut prompter, Some(&mut audit))
        .unwrap();
    match &report {
        PipelineReport::Executed {
            safety_override, ..
        } => assert!(*safety_override),
        other => panic!("unexpected report {other:?}"),
    }
    assert_eq!(aborter.calls().len(), 3);
    assert!(audit.batches[0].safety_override);
}

#[test]
fn scenario_d_partial_failure_counts_and_retry_scope() {
    let source = StaticSessionSource::new(etl_rows(), Some(OWN));
    let procs = processes();
    let rules = SafetyRules::default();
    let pipeline = Pipeline::new(&source, &procs, &rules, options());
    let aborter = ScriptedAborter::new(source.clone()).fail(SessionId(102), "lock wait timeout", 1);

    let preview = expect_preview(pipeline.prepare(&etl_filter()).unwrap());
    let mut prompter = ScriptedPrompter::new([CONFIRM_KEYWORD, "y", "n"]);
    let report = pipeline.execute(preview, &aborter, &mut prompter, None).unwrap();

    let PipelineReport::Executed { result, .. } = &report else {
        panic!("expected execution");
    };
    assert_eq!(
        result.counts_before_retry,
        OutcomeCounts {
            terminated: 2,
            failed: 1,
            still_active: 1,
            unknown: 0
        }
    );
    assert_eq!(result.verification.still_active(), vec![SessionId(102)]);
    assert_eq!(result.verification.gone().len(), 2);
    assert!(prompter.asked()[2].starts_with("1 session(s) still active"));
    assert_eq!(result.retry_decision, RetryDecision::Declined);
    assert_eq!(result.ids_with(TerminationOutcome::StillActive), vec![SessionId(102)]);
    assert_eq!(report.exit_code(), ExitCode::PartialFail);
}

#[test]
fn scenario_e_source_outage_is_not_no_candidates() {
    let source = StaticSessionSource::new(etl_rows(), Some(OWN)).fail_after_fetches(0);
    let procs = processes();
    let rules = SafetyRules::default();
    let pipeline = Pipeline::new(&source, &procs, &rules, options());

    let err = pipeline.prepare(&etl_filter()).unwrap_err();
    match &err {
        PipelineError::Inspect(inner) => assert!(inner.is_source_unavailable()),
        other => panic!("unexpected error {other:?}"),
    }
    let common: st_common::Error = err.into();
    assert_eq!(ExitCode::from_error(&common), ExitCode::SourceUnavailable);
}

#[test]
fn unknown_own_session_fails_closed() {
    let source = StaticSessionSource::new(etl_rows(), None);
    let procs = processes();
    let rules = SafetyRules::default();
    let pipeline = Pipeline::new(&source, &procs, &rules, options());

    let err = pipeline.prepare(&etl_filter()).unwrap_err();
    assert!(matches!(err, PipelineError::Inspect(ref e) if e.is_source_unavailable()));
}

#[test]
fn empty_filter_is_rejected_before_inspection() {
    let source = StaticSessionSource::new(etl_rows(), Some(OWN));
    let procs = processes();
    let rules = SafetyRules::default();
    let pipeline = Pipeline::new(&source, &procs, &rules, options());

    assert!(matches!(
        pipeline.prepare(&SessionFilter::all()),
        Err(PipelineError::EmptyFilter)
    ));
    assert_eq!(source.fetch_count(), 0);
}

#[test]
fn preview_is_idempotent_on_unchanged_source() {
    let source = StaticSessionSource::new(etl_rows(), Some(OWN));
    let procs = processes();
    let rules = SafetyRules::default();
    let pipeline = Pipeline::new(&source, &procs, &rules, options());

    let first = expect_preview(pipeline.prepare(&etl_filter()).unwrap());
    let second = expect_preview(pipeline.prepare(&etl_filter()).unwrap());

    assert_eq!(first.batch(), second.batch());
    assert_eq!(first.is_safe(), second.is_safe());
    assert_eq!(first.entries(), second.entries());
}

#[test]
fn wrong_keyword_at_any_stage_never_aborts() {
    let answers: [&[&str]; 4] = [
        &["confirm", "y"],
        &[CONFIRM_KEYWORD, "n"],
        &[CONFIRM_KEYWORD],
        &[" CONFIRMED ", "y"],
    ];
    for script in answers {
        let source = StaticSessionSource::new(etl_rows(), Some(OWN));
        let procs = processes();
        let rules = SafetyRules::default();
        let pipeline = Pipeline::new(&source, &procs, &rules, options());
        let aborter = ScriptedAborter::new(source.clone());

        let preview = expect_preview(pipeline.prepare(&etl_filter()).unwrap());
        let mut prompter = ScriptedPrompter::new(script.iter().copied());
        let report = pipeline.execute(preview, &aborter, &mut prompter, None).unwrap();

        assert!(
            matches!(report, PipelineReport::Cancelled { .. }),
            "script {script:?} must cancel"
        );
        assert!(aborter.calls().is_empty(), "script {script:?} reached the executor");
    }
}

#[test]
fn missing_utility_halts_before_the_gate() {
    let source = StaticSessionSource::new(etl_rows(), Some(OWN));
    let procs = processes();
    let rules = SafetyRules::default();
    let pipeline = Pipeline::new(&source, &procs, &rules, options());
    let aborter = ScriptedAborter::new(source.clone()).unavailable();

    let preview = expect_preview(pipeline.prepare(&etl_filter()).unwrap());
    let mut prompter = ScriptedPrompter::new([CONFIRM_KEYWORD, "y"]);
    let err = pipeline
        .execute(preview, &aborter, &mut prompter, None)
        .unwrap_err();

    assert!(matches!(err, PipelineError::UtilityUnavailable(_)));
    assert!(prompter.asked().is_empty());
    assert!(aborter.calls().is_empty());
}

#[test]
fn audit_write_failure_does_not_roll_back() {
    let source = StaticSessionSource::new(etl_rows(), Some(OWN));
    let procs = processes();
    let rules = SafetyRules::default();
    let pipeline = Pipeline::new(&source, &procs, &rules, options());
    let aborter = ScriptedAborter::new(source.clone());

    let preview = expect_preview(pipeline.prepare(&etl_filter()).unwrap());
    let mut prompter = ScriptedPrompter::new([CONFIRM_KEYWORD, "y"]);
    let mut audit = MemoryAuditSink::failing();
    let report = pipeline
        .execute(preview, &aborter, &mut prompter, Some(&mut audit))
        .unwrap();

    assert!(matches!(report.audit(), AuditStatus::Failed { .. }));
    assert_eq!(report.exit_code(), ExitCode::AuditBroken);
    assert!(!source.contains(SessionId(101)));
    assert!(!source.contains(SessionId(102)));
    assert!(!source.contains(SessionId(103)));
}

#[test]
fn process_rule_is_skipped_when_processes_are_not_visible() {
    let source = StaticSessionSource::new(etl_rows(), Some(OWN));
    let procs = UnavailableProcessInspector::new("remote appliance");
    let rules = SafetyRules::default();
    let pipeline = Pipeline::new(&source, &procs, &rules, options());

    let preview = expect_preview(pipeline.prepare(&etl_filter()).unwrap());
    assert!(preview.is_safe());
    assert!(preview
        .entries()
        .iter()
        .all(|e| !e.verdict.triggered(SafetyRule::PrivilegedProcess)));
}
