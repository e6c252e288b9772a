//! # margin-core
//!
//! Foundation types shared by every Margin crate.
//!
//! - **Branded IDs**: `ConversationId`, `InvocationId` as newtypes for type safety
//! - **Events**: [`AgentEvent`](events::AgentEvent) emitted by a runtime session,
//!   [`TranscriptEvent`](events::TranscriptEvent) consumed by the host UI, and
//!   [`SubagentActivity`](events::SubagentActivity) for the subagent side panel
//! - **Listeners**: [`ListenerSet`](listeners::ListenerSet) with explicit
//!   [`Subscription`](listeners::Subscription) handles
//! - **Text**: UTF-8 safe truncation helpers
//! - **Logging**: `tracing` subscriber initialisation

#![deny(unsafe_code)]

pub mod events;
pub mod ids;
pub mod listeners;
pub mod logging;
pub mod text;

pub use events::{
    AgentEvent, BaseEvent, MessageRole, SubagentActivity, TokenStats, TranscriptEvent,
    synthesized_agent_end,
};
pub use ids::{ConversationId, InvocationId};
pub use listeners::{Listener, ListenerSet, Subscription};
pub use logging::{LogFormat, init_subscriber};
