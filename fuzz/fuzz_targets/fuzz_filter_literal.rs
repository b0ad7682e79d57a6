//! Fuzz target for filter rendering.
//!
//! Operator-typed fragments become quoted SQL literals. Rendering either
//! refuses the value or produces a statement whose quotes are balanced.

#![no_main]

use arbitrary::Arbitrary;
use chrono::{TimeZone, Utc};
use libfuzzer_sys::fuzz_target;
use st_core::collect::{Predicate, SessionFilter};

#[derive(Debug, Arbitrary)]
struct Input {
    user: String,
    database: String,
    client_user: String,
    status: String,
}

fuzz_target!(|input: Input| {
    let Ok(filter) = SessionFilter::new(vec![
        Predicate::UsernameLike(input.user),
        Predicate::Database(input.database),
        Predicate::ClientUserLike(input.client_user),
        Predicate::Status(input.status),
    ]) else {
        return;
    };
    let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
    if let Ok(sql) = filter.to_query(now).render_literal() {
        assert_eq!(sql.matches('\'').count() % 2, 0, "unbalanced quotes: {sql}");
        assert!(!sql.contains('\\'));
    }
});
