//! Fuzz target for unaligned SQL client output.
//!
//! `parse_session_rows` must reject malformed rows with an error, never panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use st_core::collect::source::parse_session_rows;

fuzz_target!(|data: &str| {
    if let Ok(rows) = parse_session_rows(data) {
        for row in rows {
            assert!(row.id.0 > 0);
        }
    }
});
