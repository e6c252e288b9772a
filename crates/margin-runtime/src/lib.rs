//! # margin-runtime
//!
//! Agent orchestration for the Margin chat sidebar.
//!
//! - **Registry**: [`SessionRegistry`] owns one [`AgentSession`] per
//!   conversation, with atomic get-or-create, abort with a synthesized
//!   `agent_end` fallback, and exactly-once teardown
//! - **Dispatch**: [`SubagentDispatcher`] is the `subagent` tool. It runs named
//!   agents in single, parallel, or chain mode
//! - **Executor**: [`map_bounded`] caps concurrent work and keeps input order
//! - **Cancellation**: [`CancellationScope`] merges caller, timeout, and
//!   turn-limit stops for one invocation
//! - **Relay**: [`attach_primary`] and [`attach_subagent`] route session
//!   events to transcript and activity sinks

#![deny(unsafe_code)]

pub mod cancellation;
pub mod dispatch;
pub mod errors;
pub mod executor;
pub mod factory;
pub mod invocation;
pub mod registry;
pub mod relay;
pub mod session;
pub mod tool;

#[cfg(test)]
mod testing;

pub use cancellation::{CancellationScope, InvocationPolicy, TerminationReason};
pub use dispatch::{
    DispatchParams, DispatchRequest, DispatchValidationError, SUBAGENT_TOOL_NAME,
    SubagentDispatcher, TaskSpec,
};
pub use errors::RuntimeError;
pub use executor::{ExecutorError, map_bounded};
pub use factory::{ConversationSessionFactory, SessionFactory};
pub use invocation::{InvocationContext, SubagentResult, run_invocation};
pub use registry::{ConversationSession, SessionRegistry};
pub use relay::{
    ActivitySink, BroadcastSink, ChannelSink, NullSink, TranscriptSink, attach_primary,
    attach_subagent,
};
pub use session::{
    AgentRuntime, AgentSession, CreateSessionOptions, Credentials, ModelResolver, PromptOptions,
    PromptOutcome, ResolvedModel, ResourceLoader, RuntimeSession, SessionState,
    StaticResourceLoader, ToolSelection,
};
pub use tool::{CustomTool, ToolContext, ToolDefinition, ToolOutput};
