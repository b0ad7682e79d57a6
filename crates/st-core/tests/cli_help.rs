//! CLI help, version and argument validation tests for st-core.

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;

fn st_core() -> Command {
    cargo_bin_cmd!("st-core")
}

mod top_level {
    use super::*;

    #[test]
    fn help_flag_works() {
        st_core()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("safe termination"));
    }

    #[test]
    fn help_shows_all_commands() {
        st_core()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("list"))
            .stdout(predicate::str::contains("preview"))
            .stdout(predicate::str::contains("terminate"))
            .stdout(predicate::str::contains("check"))
            .stdout(predicate::str::contains("audit"))
            .stdout(predicate::str::contains("config"));
    }

    #[test]
    fn version_flag_works() {
        st_core()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("st-core"));
    }

    #[test]
    fn version_json_carries_schema_version() {
        st_core()
            .args(["version", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"schema_version\""));
    }
}

mod filters {
    use super::*;

    #[test]
    fn preview_without_filter_is_a_usage_error() {
        st_core().arg("preview").assert().code(2);
    }

    #[test]
    fn terminate_without_filter_is_a_usage_error() {
        st_core().arg("terminate").assert().code(2);
    }

    #[test]
    fn terminate_help_lists_filter_flags() {
        st_core()
            .args(["terminate", "--help"])
            .assert()
            .success()
            .stdout(predicate::str::contains("--user"))
            .stdout(predicate::str::contains("--min-age"))
            .stdout(predicate::str::contains("--no-retry"));
    }

    #[test]
    fn malformed_age_is_rejected() {
        st_core()
            .args(["preview", "--min-age", "ten minutes"])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("invalid age"));
    }

    #[test]
    fn zero_session_id_is_rejected() {
        st_core().args(["preview", "--id", "0"]).assert().code(2);
    }
}

mod config {
    use super::*;

    #[test]
    fn missing_explicit_policy_is_an_args_error() {
        let dir = tempfile::tempdir().unwrap();
        st_core()
            .args(["config", "show", "--policy"])
            .arg(dir.path().join("absent.json"))
            .assert()
            .code(10);
    }

    #[test]
    fn config_show_reports_explicit_policy() {
        let dir = tempfile::tempdir().unwrap();
        let policy = dir.path().join("policy.json");
        std::fs::write(
            &policy,
            r#"{"schema_version":"1.0.0","verification":{"settling_delay_secs":0}}"#,
        )
        .unwrap();

        st_core()
            .args(["config", "show", "--policy"])
            .arg(&policy)
            .assert()
            .success()
            .stdout(predicate::str::contains("cli_argument"))
            .stdout(predicate::str::contains("\"settling_delay_secs\": 0"));
    }

    #[test]
    fn wrong_schema_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let policy = dir.path().join("policy.json");
        std::fs::write(&policy, r#"{"schema_version":"0.1.0"}"#).unwrap();

        st_core()
            .args(["config", "show", "--policy"])
            .arg(&policy)
            .assert()
            .code(10);
    }
}

mod audit {
    use super::*;

    #[test]
    fn verify_on_missing_log_is_clean() {
        let dir = tempfile::tempdir().unwrap();
        st_core()
            .args(["audit", "verify", "--format", "json"])
            .env("SESSION_TRIAGE_DATA", dir.path())
            .assert()
            .success()
            .stdout(predicate::str::contains("\"is_valid\": true"));
    }

    #[test]
    fn verify_detects_garbage_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("audit.jsonl");
        std::fs::write(&log, "{\"not\":\"an entry\"}\n").unwrap();
        st_core()
            .args(["audit", "verify", "--path"])
            .arg(&log)
            .assert()
            .failure();
    }
}
