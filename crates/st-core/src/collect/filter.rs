//! Structured session filters.
//!
//! A [`SessionFilter`] is a conjunction of typed predicates. It is evaluated
//! two ways that must agree: in memory against a [`SessionRecord`], and as a
//! parameterized [`SqlQuery`] for the SQL client binding. User-supplied text
//! only ever travels as a query parameter.

use chrono::{DateTime, Local, Utc};
use regex::Regex;
use serde::Serialize;
use st_common::{SessionId, SessionRecord};
use std::fmt::Write as _;
use std::time::Duration;
use thiserror::Error;

/// Session metadata view queried by the SQL binding.
pub const SESSION_VIEW: &str = "_V_SESSION_DETAIL";

/// Columns selected from [`SESSION_VIEW`], in row order.
pub const SESSION_COLUMNS: [&str; 9] = [
    "ID",
    "USERNAME",
    "DBNAME",
    "IPADDR",
    "CONNTIME",
    "STATUS",
    "PID",
    "CLIENT_OS_USERNAME",
    "CLIENT_APPLICATION_NAME",
];

/// Clause excluding the connection that runs the statement.
///
/// Every client invocation opens its own connection, so the querying session
/// can only be excluded inside the statement that would list it.
pub const EXCLUDE_QUERYING_SESSION: &str = "ID <> CURRENT_SID";

/// Timestamp layout used by the appliance for CONNTIME.
pub const APPLIANCE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Malformed filter input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("{field} must not be empty")]
    EmptyValue { field: &'static str },

    #[error("{field} contains a control character")]
    ControlCharacter { field: &'static str },

    #[error("session id must be a positive integer")]
    ZeroSessionId,

    #[error("query parameter ${index} cannot be rendered safely: {reason}")]
    Unrenderable { index: usize, reason: &'static str },

    #[error("query references parameter ${0} which was not supplied")]
    MissingParameter(usize),
}

/// One predicate of a filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum Predicate {
    /// Username contains the fragment (LIKE `%fragment%`, case-insensitive).
    UsernameLike(String),
    /// Database equals the name (case-insensitive).
    Database(String),
    /// Client OS user contains the fragment (LIKE, case-insensitive).
    ClientUserLike(String),
    /// Status label equals the value (case-insensitive).
    Status(String),
    /// Connected at least this long ago.
    MinAge(#[serde(with = "duration_secs")] Duration),
    /// Exactly this session.
    SessionId(SessionId),
}

impl Predicate {
    fn validate(&self) -> Result<(), FilterError> {
        let (field, text) = match self {
            Predicate::UsernameLike(s) => ("username pattern", s),
            Predicate::Database(s) => ("database", s),
            Predicate::ClientUserLike(s) => ("client user pattern", s),
            Predicate::Status(s) => ("status", s),
            Predicate::SessionId(id) if id.0 == 0 => return Err(FilterError::ZeroSessionId),
            Predicate::SessionId(_) | Predicate::MinAge(_) => return Ok(()),
        };
        if text.trim().is_empty() {
            return Err(FilterError::EmptyValue { field });
        }
        if text.chars().any(char::is_control) {
            return Err(FilterError::ControlCharacter { field });
        }
        Ok(())
    }

    /// Evaluate against one record.
    pub fn matches(&self, record: &SessionRecord, now: DateTime<Utc>) -> bool {
        match self {
            Predicate::UsernameLike(frag) => like_contains(frag, &record.username),
            Predicate::Database(name) => eq_ignore_case(name, &record.database),
            Predicate::ClientUserLike(frag) => record
                .client_os_user
                .as_deref()
                .is_some_and(|u| like_contains(frag, u)),
            Predicate::Status(status) => eq_ignore_case(status, &record.status),
            Predicate::MinAge(age) => {
                record.age_seconds(now) >= i64::try_from(age.as_secs()).unwrap_or(i64::MAX)
            }
            Predicate::SessionId(id) => record.id == *id,
        }
    }
}

/// A validated conjunction of predicates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SessionFilter {
    predicates: Vec<Predicate>,
}

impl SessionFilter {
    /// Build a filter, rejecting empty text and zero ids.
    pub fn new(predicates: Vec<Predicate>) -> Result<Self, FilterError> {
        for predicate in &predicates {
            predicate.validate()?;
        }
        Ok(Self { predicates })
    }

    /// Filter matching every session.
    pub fn all() -> Self {
        Self::default()
    }

    /// Filter matching exactly one session id.
    pub fn session(id: SessionId) -> Result<Self, FilterError> {
        Self::new(vec![Predicate::SessionId(id)])
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// All predicates hold for the record.
    pub fn matches(&self, record: &SessionRecord, now: DateTime<Utc>) -> bool {
        self.predicates.iter().all(|p| p.matches(record, now))
    }

    /// Resolve to a parameterized query with `$n` placeholders.
    pub fn to_query(&self, now: DateTime<Utc>) -> SqlQuery {
        let mut query = SqlQuery {
            text: format!(
                "SELECT {} FROM {}",
                SESSION_COLUMNS.join(", "),
                SESSION_VIEW
            ),
            params: Vec::new(),
        };

        let mut clauses = Vec::with_capacity(self.predicates.len() + 1);
        clauses.push(EXCLUDE_QUERYING_SESSION.to_string());
        for predicate in &self.predicates {
            let clause = match predicate {
                Predicate::UsernameLike(frag) => {
                    let n = query.push(SqlParam::Text(like_param(frag)));
                    format!("UPPER(USERNAME) LIKE UPPER(${n})")
                }
                Predicate::Database(name) => {
                    let n = query.push(SqlParam::Text(name.trim().to_string()));
                    format!("UPPER(DBNAME) = UPPER(${n})")
                }
                Predicate::ClientUserLike(frag) => {
                    let n = query.push(SqlParam::Text(like_param(frag)));
                    format!("UPPER(CLIENT_OS_USERNAME) LIKE UPPER(${n})")
                }
                Predicate::Status(status) => {
                    let n = query.push(SqlParam::Text(status.trim().to_string()));
                    format!("UPPER(STATUS) = UPPER(${n})")
                }
                Predicate::MinAge(age) => {
                    let cutoff = chrono::Duration::from_std(*age)
                        .ok()
                        .and_then(|d| now.checked_sub_signed(d))
                        .unwrap_or(DateTime::<Utc>::MIN_UTC);
                    let n = query.push(SqlParam::Timestamp(cutoff));
                    format!("CONNTIME <= ${n}")
                }
                Predicate::SessionId(id) => {
                    let n = query.push(SqlParam::Int(id.0));
                    format!("ID = ${n}")
                }
            };
            clauses.push(clause);
        }

        query.text.push_str(" WHERE ");
        query.text.push_str(&clauses.join(" AND "));
        query.text.push_str(" ORDER BY CONNTIME DESC");
        query
    }
}

/// A typed query parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlParam {
    Text(String),
    Int(u64),
    Timestamp(DateTime<Utc>),
}

/// Query text with `$n` placeholders and its parameters (1-based).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SqlQuery {
    pub text: String,
    pub params: Vec<SqlParam>,
}

impl SqlQuery {
    fn push(&mut self, param: SqlParam) -> usize {
        self.params.push(param);
        self.params.len()
    }

    /// Render to a literal statement for clients without bind support.
    ///
    /// This is the only place parameters become SQL text. Every text value
    /// is single-quoted with embedded quotes doubled; backslashes and control
    /// characters are refused.
    pub fn render_literal(&self) -> Result<String, FilterError> {
        let mut out = String::with_capacity(self.text.len() + 32);
        let mut chars = self.text.char_indices().peekable();

        while let Some((_, c)) = chars.next() {
            if c != '$' {
                out.push(c);
                continue;
            }
            let mut digits = String::new();
            while let Some(&(_, d)) = chars.peek() {
                if d.is_ascii_digit() {
                    digits.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            if digits.is_empty() {
                out.push('$');
                continue;
            }
            let index: usize = digits
                .parse()
                .map_err(|_| FilterError::MissingParameter(0))?;
            let param = index
                .checked_sub(1)
                .and_then(|i| self.params.get(i))
                .ok_or(FilterError::MissingParameter(index))?;
            render_param(&mut out, index, param)?;
        }

        Ok(out)
    }
}

fn render_param(out: &mut String, index: usize, param: &SqlParam) -> Result<(), FilterError> {
    match param {
        SqlParam::Int(v) => {
            let _ = write!(out, "{}", v);
        }
        SqlParam::Timestamp(ts) => {
            let local = ts.with_timezone(&Local).format(APPLIANCE_TIME_FORMAT);
            let _ = write!(out, "CAST('{}' AS TIMESTAMP)", local);
        }
        SqlParam::Text(s) => {
            if s.contains('\\') {
                return Err(FilterError::Unrenderable {
                    index,
                    reason: "backslash",
                });
            }
            if s.chars().any(char::is_control) {
                return Err(FilterError::Unrenderable {
                    index,
                    reason: "control character",
                });
            }
            out.push('\'');
            out.push_str(&s.replace('\'', "''"));
            out.push('\'');
        }
    }
    Ok(())
}

/// LIKE parameter for a fragment: `%fragment%`.
///
/// Backslashes become `_` so the pattern never needs escaping; the
/// in-memory re-check restores exact semantics.
fn like_param(fragment: &str) -> String {
    format!("%{}%", fragment.trim().replace('\\', "_"))
}

/// Case-insensitive equality after trimming the filter value.
fn eq_ignore_case(expected: &str, actual: &str) -> bool {
    expected.trim().to_lowercase() == actual.trim().to_lowercase()
}

/// `actual LIKE '%fragment%'`, case-insensitive.
pub fn like_contains(fragment: &str, actual: &str) -> bool {
    match Regex::new(&like_to_regex(&format!("%{}%", fragment.trim()))) {
        Ok(re) => re.is_match(actual),
        Err(_) => false,
    }
}

/// Translate a LIKE pattern to an anchored, case-insensitive regex.
///
/// `%` matches any run and `_` any single character; everything else is literal.
fn like_to_regex(pattern: &str) -> String {
    let mut out = String::from("(?is)^");
    let mut literal = String::new();
    for c in pattern.chars() {
        match c {
            '%' | '_' => {
                out.push_str(&regex::escape(&literal));
                literal.clear();
                out.push_str(if c == '%' { ".*" } else { "." });
            }
            other => literal.push(other),
        }
    }
    out.push_str(&regex::escape(&literal));
    out.push('$');
    out
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(id: u64, user: &str) -> SessionRecord {
        SessionRecord {
            id: SessionId(id),
            username: user.to_string(),
            database: "SALES".to_string(),
            client_ip: "10.1.2.3".to_string(),
            connected_at: Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap(),
            status: "active".to_string(),
            pid: None,
            client_os_user: Some("jdoe".to_string()),
            application: None,
        }
    }

    #[test]
    fn like_wraps_fragment_on_both_sides() {
        assert!(like_contains("etl", "NIGHTLY_ETL_LOADER"));
        assert!(like_contains("ETL%", "ETL_BATCH"));
        assert!(like_contains("E_L", "xxETLxx"));
        assert!(!like_contains("etl", "EXTRACT"));
        assert!(like_contains("%", ""));
    }

    #[test]
    fn exact_predicates_ignore_case() {
        let r = record(1, "ETL_USER");
        let now = Utc::now();
        assert!(Predicate::Database("sales".into()).matches(&r, now));
        assert!(Predicate::Status("ACTIVE".into()).matches(&r, now));
        assert!(!Predicate::Database("SALE".into()).matches(&r, now));
    }

    #[test]
    fn missing_client_user_never_matches_pattern() {
        let mut r = record(1, "ETL_USER");
        r.client_os_user = None;
        assert!(!Predicate::ClientUserLike("j".into()).matches(&r, Utc::now()));
    }

    #[test]
    fn min_age_compares_against_now() {
        let r = record(1, "ETL_USER");
        let now = r.connected_at + chrono::Duration::seconds(600);
        assert!(Predicate::MinAge(Duration::from_secs(600)).matches(&r, now));
        assert!(!Predicate::MinAge(Duration::from_secs(601)).matches(&r, now));
    }

    #[test]
    fn blank_fragment_and_zero_id_are_rejected() {
        assert_eq!(
            SessionFilter::new(vec![Predicate::UsernameLike("  ".into())]),
            Err(FilterError::EmptyValue {
                field: "username pattern"
            })
        );
        assert_eq!(
            SessionFilter::session(SessionId(0)),
            Err(FilterError::ZeroSessionId)
        );
        assert!(matches!(
            SessionFilter::new(vec![Predicate::Status("act\nive".into())]),
            Err(FilterError::ControlCharacter { .. })
        ));
    }

    #[test]
    fn query_uses_placeholders_in_predicate_order() {
        let filter = SessionFilter::new(vec![
            Predicate::UsernameLike("ETL".into()),
            Predicate::Database("SALES".into()),
            Predicate::SessionId(SessionId(42)),
        ])
        .unwrap();
        let query = filter.to_query(Utc::now());
        assert!(query.text.contains("UPPER(USERNAME) LIKE UPPER($1)"));
        assert!(query.text.contains("UPPER(DBNAME) = UPPER($2)"));
        assert!(query.text.contains("ID = $3"));
        assert!(query.text.ends_with("ORDER BY CONNTIME DESC"));
        assert_eq!(
            query.params,
            vec![
                SqlParam::Text("%ETL%".into()),
                SqlParam::Text("SALES".into()),
                SqlParam::Int(42),
            ]
        );
    }

    #[test]
    fn rendering_quotes_user_text() {
        let filter =
            SessionFilter::new(vec![Predicate::UsernameLike("x' OR '1'='1".into())]).unwrap();
        let sql = filter.to_query(Utc::now()).render_literal().unwrap();
        assert!(sql.contains("LIKE UPPER('%x'' OR ''1''=''1%')"));
    }

    #[test]
    fn rendering_does_not_rescan_substituted_text() {
        let filter = SessionFilter::new(vec![
            Predicate::UsernameLike("$2".into()),
            Predicate::Status("idle".into()),
        ])
        .unwrap();
        let sql = filter.to_query(Utc::now()).render_literal().unwrap();
        assert!(sql.contains("LIKE UPPER('%$2%')"));
        assert!(sql.contains("= UPPER('idle')"));
    }

    #[test]
    fn backslash_in_equality_parameter_is_refused() {
        let filter = SessionFilter::new(vec![Predicate::Database("A\\B".into())]).unwrap();
        assert!(matches!(
            filter.to_query(Utc::now()).render_literal(),
            Err(FilterError::Unrenderable { index: 1, .. })
        ));
        let filter = SessionFilter::new(vec![Predicate::ClientUserLike("CORP\\jdoe".into())])
            .unwrap();
        let sql = filter.to_query(Utc::now()).render_literal().unwrap();
        assert!(sql.contains("'%CORP_jdoe%'"));
    }

    #[test]
    fn like_metacharacters_of_regex_stay_literal() {
        assert!(like_contains("a.b", "XA.BX"));
        assert!(!like_contains("a.b", "AXB"));
        assert!(like_contains("(etl)+", "job(ETL)+1"));
        assert_eq!(like_to_regex("E_L%"), "(?is)^E.L.*$");
    }

    #[test]
    fn every_query_excludes_the_querying_session() {
        let query = SessionFilter::all().to_query(Utc::now());
        assert!(query
            .text
            .contains(&format!("WHERE {EXCLUDE_QUERYING_SESSION} ORDER BY")));
        assert!(query.params.is_empty());

        let filter = SessionFilter::session(SessionId(7)).unwrap();
        let sql = filter.to_query(Utc::now()).render_literal().unwrap();
        assert!(sql.contains("WHERE ID <> CURRENT_SID AND ID = 7"));
    }
}
