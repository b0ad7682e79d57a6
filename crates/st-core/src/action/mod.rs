//! Session termination.

pub mod abort;
pub mod executor;

pub use abort::{
    AbortError, AbortMechanism, AbortOutput, FallbackAborter, ScriptedAborter, SessionAborter,
    SqlAborter, UtilityAborter,
};
pub use executor::{
    AttemptResult, AttemptStatus, ExecutionResult, ExecutionSummary, SessionDetails,
    TerminationExecutor,
};

use crate::collect::source::NzsqlClient;
use st_config::ExecutorSettings;

/// Build the abort mechanism described by the executor settings.
///
/// With `sql_fallback` set and a SQL client available, `DROP SESSION` backs
/// up the privileged utility, or stands in for it when no utility is found.
pub fn aborter_from_settings(
    settings: &ExecutorSettings,
    sql_client: Option<NzsqlClient>,
) -> Result<Box<dyn SessionAborter>, AbortError> {
    let utility = UtilityAborter::locate(settings);
    let fallback = if settings.sql_fallback {
        sql_client.map(SqlAborter::new)
    } else {
        None
    };
    match (utility, fallback) {
        (Ok(primary), Some(secondary)) => Ok(Box::new(FallbackAborter::new(
            Box::new(primary),
            Box::new(secondary),
        ))),
        (Ok(primary), None) => Ok(Box::new(primary)),
        (Err(_), Some(secondary)) => Ok(Box::new(secondary)),
        (Err(e), None) => Err(e),
    }
}
