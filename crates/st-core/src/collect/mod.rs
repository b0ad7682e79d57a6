//! Session and process discovery.
//!
//! - [`filter`]: structured predicates and their parameterized SQL form
//! - [`source`]: metadata source bindings (SQL client, in-memory)
//! - [`inspector`]: the candidate-producing Session Inspector
//! - [`process`]: optional OS process inspection
//! - [`tool_runner`]: guarded execution of external utilities

pub mod filter;
pub mod inspector;
pub mod process;
pub mod source;
pub mod tool_runner;

pub use filter::{FilterError, Predicate, SessionFilter, SqlParam, SqlQuery};
pub use inspector::{InspectError, InspectOutcome, Inspection, SessionInspector};
pub use process::{
    inspector_for_host, LiveProcessInspector, ProcessInspector, ProcessUnavailable, StaticProcessInspector,
    UnavailableProcessInspector,
};
pub use source::{NzsqlClient, NzsqlSource, SessionSource, SourceError, StaticSessionSource};
pub use tool_runner::{ToolConfig, ToolError, ToolOutput, ToolRunner, ToolRunnerBuilder, ToolSpec};
