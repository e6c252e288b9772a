//! Agent sessions and the runtime collaborator interfaces they wrap.

mod agent_session;
pub mod runtime;

pub use agent_session::{AgentSession, SessionState};
pub use runtime::{
    AgentRuntime, CreateSessionOptions, Credentials, ModelResolver, PromptOptions, PromptOutcome,
    ResolvedModel, ResourceLoader, RuntimeSession, StaticResourceLoader, ToolSelection,
};
