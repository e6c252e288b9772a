//! Subagent dispatch: request validation, execution modes, and reports.

mod dispatcher;
pub mod report;
pub mod request;

pub use dispatcher::{SUBAGENT_TOOL_NAME, SubagentDispatcher};
pub use request::{DispatchParams, DispatchRequest, DispatchValidationError, TaskSpec};
