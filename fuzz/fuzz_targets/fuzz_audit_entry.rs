//! Fuzz target for audit log lines.
//!
//! Arbitrary lines must either fail to parse or hash without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use st_core::audit::AuditEntry;

fuzz_target!(|data: &str| {
    if let Ok(entry) = serde_json::from_str::<AuditEntry>(data) {
        let _ = entry.verify_hash();
        let _ = entry.content_hash();
    }
});
