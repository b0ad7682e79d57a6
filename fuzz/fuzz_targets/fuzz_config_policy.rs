//! Fuzz target for policy.json configuration parsing.
//!
//! Parsing and validation of arbitrary input must return errors, not panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use st_config::{validate_policy, Policy};

fuzz_target!(|data: &[u8]| {
    if let Ok(policy) = serde_json::from_slice::<Policy>(data) {
        let _ = validate_policy(&policy);
    }
});
