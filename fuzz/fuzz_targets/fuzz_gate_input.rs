//! Fuzz target for the confirmation gate.
//!
//! No sequence of answers reaches the committed state unless every stage
//! received its exact keyword.

#![no_main]

use libfuzzer_sys::fuzz_target;
use st_core::gate::{advance, proceed_keyword, GateState, FORCE_KEYWORD};

fuzz_target!(|input: (bool, Vec<String>)| {
    let (unsafe_batch, answers) = input;
    let mut state = advance(GateState::Previewed, unsafe_batch, None);
    let mut accepted = Vec::new();
    for answer in &answers {
        if state.is_terminal() {
            break;
        }
        let before = state;
        state = advance(state, unsafe_batch, Some(answer));
        if !matches!(state, GateState::Cancelled { .. }) {
            accepted.push((before, answer.trim().to_string()));
        }
        if state == GateState::SecondYesNoConfirmed {
            state = advance(state, unsafe_batch, None);
        }
    }
    if state == GateState::Committed {
        for (stage, answer) in accepted {
            match stage {
                GateState::SafetyOverrideRequired => assert_eq!(answer, FORCE_KEYWORD),
                GateState::ProceedRequested => assert_eq!(answer, proceed_keyword(unsafe_batch)),
                GateState::FirstKeywordConfirmed => {
                    assert!(answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes"))
                }
                other => panic!("unexpected accepting state {other:?}"),
            }
        }
    }
});
