//! Property-based tests for classifier and confirmation-gate invariants.

use chrono::Utc;
use proptest::prelude::*;
use st_common::{SessionId, SessionRecord};
use st_config::SafetyRules;
use st_core::collect::UnavailableProcessInspector;
use st_core::gate::{advance, GateStage, GateState, CONFIRM_KEYWORD, FORCE_KEYWORD, RISK_KEYWORD};
use st_core::safety::{SafetyClassifier, SafetyRule};

fn record(id: u64, user: &str, ip: &str, db: &str, app: Option<String>) -> SessionRecord {
    SessionRecord {
        id: SessionId(id),
        username: user.to_string(),
        database: db.to_string(),
        client_ip: ip.to_string(),
        connected_at: Utc::now(),
        status: "active".to_string(),
        pid: None,
        client_os_user: None,
        application: app,
    }
}

fn system_user() -> impl Strategy<Value = String> {
    prop::sample::select(SafetyRules::default().system_users).prop_flat_map(|u| {
        // Any casing of a configured system account.
        let len = u.len();
        prop::collection::vec(any::<bool>(), len).prop_map(move |upper| {
            u.chars()
                .zip(upper)
                .map(|(c, up)| if up { c.to_ascii_uppercase() } else { c.to_ascii_lowercase() })
                .collect::<String>()
        })
    })
}

fn normal_user() -> impl Strategy<Value = String> {
    "[A-Z]{2,6}_(USER|LOADER|APP)[0-9]{0,2}"
}

fn address() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("127.0.0.1".to_string()),
        Just("::1".to_string()),
        (1u8..=223, 0u8..=255, 0u8..=255, 1u8..=254)
            .prop_map(|(a, b, c, d)| format!("{a}.{b}.{c}.{d}")),
    ]
}

fn unprotected_db() -> impl Strategy<Value = String> {
    "(SALES|MART|STAGE|DW)[0-9]{0,2}"
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn system_user_is_always_unsafe_with_rule_one(
        user in system_user(),
        ip in address(),
        db in prop_oneof![unprotected_db(), Just("SYSTEM".to_string())],
        app in proptest::option::of("[a-z]{3,10}"),
        id in 1u64..10_000,
    ) {
        let classifier = SafetyClassifier::new(&SafetyRules::default());
        let verdict = classifier.classify(
            &record(id, &user, &ip, &db, app),
            SessionId(99_999),
            &UnavailableProcessInspector::new("test"),
        );
        prop_assert!(!verdict.safe);
        prop_assert!(verdict.triggered(SafetyRule::SystemUser));
        prop_assert_eq!(verdict.reasons[0].rule.number(), 1);
    }

    #[test]
    fn loopback_normal_user_on_unprotected_db_is_safe(
        user in normal_user(),
        ip in prop_oneof![Just("127.0.0.1"), Just("::1"), Just("localhost")],
        db in unprotected_db(),
        id in 1u64..10_000,
    ) {
        let classifier = SafetyClassifier::new(&SafetyRules::default());
        let verdict = classifier.classify(
            &record(id, &user, ip, &db, None),
            SessionId(99_999),
            &UnavailableProcessInspector::new("test"),
        );
        prop_assert!(verdict.safe, "reasons: {:?}", verdict.reasons);
        prop_assert!(!verdict.triggered(SafetyRule::ProtectedDatabase));
    }

    #[test]
    fn normal_user_from_any_address_on_unprotected_db_is_safe(
        user in normal_user(),
        octets in (1u8..=223, 0u8..=255, 0u8..=255, 1u8..=254),
        db in unprotected_db(),
        id in 1u64..10_000,
    ) {
        let ip = format!("{}.{}.{}.{}", octets.0, octets.1, octets.2, octets.3);
        let classifier = SafetyClassifier::new(&SafetyRules::default());
        let verdict = classifier.classify(
            &record(id, &user, &ip, &db, None),
            SessionId(99_999),
            &UnavailableProcessInspector::new("test"),
        );
        prop_assert!(verdict.safe, "reasons: {:?}", verdict.reasons);
    }

    #[test]
    fn any_non_keyword_answer_cancels(
        answer in ".{0,24}",
        unsafe_batch in any::<bool>(),
    ) {
        let first = advance(GateState::Previewed, unsafe_batch, None);
        let expected_keyword = if unsafe_batch { FORCE_KEYWORD } else { CONFIRM_KEYWORD };
        prop_assume!(answer.trim() != expected_keyword);

        let next = advance(first, unsafe_batch, Some(&answer));
        let stage = if unsafe_batch { GateStage::SafetyOverride } else { GateStage::Proceed };
        prop_assert_eq!(next, GateState::Cancelled { at: stage });
    }

    #[test]
    fn wrong_risk_phrase_cancels_after_force(answer in ".{0,30}") {
        prop_assume!(answer.trim() != RISK_KEYWORD);
        let state = advance(GateState::SafetyOverrideRequired, true, Some(FORCE_KEYWORD));
        prop_assert_eq!(state, GateState::ProceedRequested);
        let next = advance(state, true, Some(&answer));
        prop_assert_eq!(next, GateState::Cancelled { at: GateStage::Proceed });
    }
}
