//! Event types for agent sessions.
//!
//! Three event families:
//!
//! - **[`AgentEvent`]**: raw lifecycle events emitted by a runtime session
//!   (agent start/end, message streaming, tool execution, turn boundaries).
//! - **[`TranscriptEvent`]**: what the host chat sidebar consumes for one
//!   conversation. Tool events are relabelled `tool_start` / `tool_end`.
//! - **[`SubagentActivity`]**: tool activity of subordinate agents, tagged with
//!   the owning agent's name. Message chatter is never part of this stream.
//!
//! Only `AgentEvent` crosses the runtime boundary. The other two are produced
//! by the relay in `margin-runtime`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─────────────────────────────────────────────────────────────────────────────
// Shared payload types
// ─────────────────────────────────────────────────────────────────────────────

/// Author of a streamed message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// The user prompt echoed back by the runtime.
    User,
    /// Model output.
    Assistant,
}

/// Token counters reported by a runtime session.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenStats {
    /// Input tokens.
    pub input_tokens: u64,
    /// Output tokens.
    pub output_tokens: u64,
    /// Tokens read from prompt cache.
    #[serde(default)]
    pub cache_read_tokens: u64,
    /// Tokens written to prompt cache.
    #[serde(default)]
    pub cache_write_tokens: u64,
}

impl TokenStats {
    /// Sum of every counter.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens + self.cache_read_tokens + self.cache_write_tokens
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// AgentEvent: runtime session events
// ─────────────────────────────────────────────────────────────────────────────

/// Events emitted by a runtime session while a prompt runs.
///
/// Per prompt: `agent_start`, then any number of messages
/// (`message_start` → `message_update`* → `message_end`) interleaved with
/// tool execution pairs, a `turn_end` after each model round-trip, and a
/// final `agent_end`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentEvent {
    /// Prompt accepted, agent loop running.
    #[serde(rename = "agent_start")]
    AgentStart,

    /// A message began streaming.
    #[serde(rename = "message_start")]
    MessageStart {
        /// Message author.
        role: MessageRole,
    },

    /// Incremental message text.
    #[serde(rename = "message_update")]
    MessageUpdate {
        /// Text fragment.
        delta: String,
    },

    /// A message finished streaming.
    #[serde(rename = "message_end")]
    MessageEnd {
        /// Message author.
        role: MessageRole,
        /// Full message text.
        text: String,
    },

    /// A tool call started executing.
    #[serde(rename = "tool_execution_start")]
    ToolExecutionStart {
        /// Tool call ID.
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        /// Tool name.
        #[serde(rename = "toolName")]
        tool_name: String,
        /// Tool arguments.
        #[serde(default)]
        arguments: Value,
    },

    /// A tool call finished executing.
    #[serde(rename = "tool_execution_end")]
    ToolExecutionEnd {
        /// Tool call ID.
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        /// Tool name.
        #[serde(rename = "toolName")]
        tool_name: String,
        /// Whether the tool reported an error.
        #[serde(rename = "isError")]
        is_error: bool,
        /// Tool output text.
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<String>,
    },

    /// One model round-trip (plus its tool calls) completed.
    #[serde(rename = "turn_end")]
    TurnEnd {
        /// 1-based turn number within the prompt.
        turn: u32,
    },

    /// The agent loop stopped.
    #[serde(rename = "agent_end")]
    AgentEnd {
        /// Whether the loop stopped because of `abort()`.
        #[serde(default)]
        aborted: bool,
        /// Error message if the loop ended with an error.
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl AgentEvent {
    /// Event type string (for logging and type discrimination).
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::AgentStart => "agent_start",
            Self::MessageStart { .. } => "message_start",
            Self::MessageUpdate { .. } => "message_update",
            Self::MessageEnd { .. } => "message_end",
            Self::ToolExecutionStart { .. } => "tool_execution_start",
            Self::ToolExecutionEnd { .. } => "tool_execution_end",
            Self::TurnEnd { .. } => "turn_end",
            Self::AgentEnd { .. } => "agent_end",
        }
    }

    /// Whether this is a tool execution event.
    #[must_use]
    pub fn is_tool_execution(&self) -> bool {
        matches!(
            self,
            Self::ToolExecutionStart { .. } | Self::ToolExecutionEnd { .. }
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// TranscriptEvent: per-conversation outbound stream
// ─────────────────────────────────────────────────────────────────────────────

/// Common fields for transcript events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseEvent {
    /// Conversation this event belongs to.
    pub conversation_id: String,
    /// ISO 8601 timestamp.
    pub timestamp: String,
}

impl BaseEvent {
    /// Create a new base event with the current UTC timestamp.
    #[must_use]
    pub fn now(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Events streamed to the host for one conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TranscriptEvent {
    /// Agent started processing a prompt.
    #[serde(rename = "agent_start")]
    AgentStart {
        /// Base fields.
        #[serde(flatten)]
        base: BaseEvent,
    },

    /// Message started streaming.
    #[serde(rename = "message_start")]
    MessageStart {
        /// Base fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// Message author.
        role: MessageRole,
    },

    /// Message content delta.
    #[serde(rename = "message_update")]
    MessageUpdate {
        /// Base fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// Text fragment.
        delta: String,
    },

    /// Message finished streaming.
    #[serde(rename = "message_end")]
    MessageEnd {
        /// Base fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// Message author.
        role: MessageRole,
        /// Full message text.
        text: String,
    },

    /// Tool started.
    #[serde(rename = "tool_start")]
    ToolStart {
        /// Base fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// Tool call ID.
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        /// Tool name.
        #[serde(rename = "toolName")]
        tool_name: String,
        /// Tool arguments.
        arguments: Value,
    },

    /// Tool finished.
    #[serde(rename = "tool_end")]
    ToolEnd {
        /// Base fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// Tool call ID.
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        /// Tool name.
        #[serde(rename = "toolName")]
        tool_name: String,
        /// Whether the tool reported an error.
        #[serde(rename = "isError")]
        is_error: bool,
        /// Tool output text.
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<String>,
    },

    /// Agent finished processing.
    #[serde(rename = "agent_end")]
    AgentEnd {
        /// Base fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// Token totals, when the runtime could report them.
        #[serde(rename = "tokenStats", skip_serializing_if = "Option::is_none")]
        token_stats: Option<TokenStats>,
        /// Whether the prompt was aborted.
        #[serde(default)]
        aborted: bool,
        /// Whether this event was produced by the registry rather than the runtime.
        #[serde(default)]
        synthesized: bool,
        /// Error message if the prompt ended with an error.
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl TranscriptEvent {
    /// Get the base event fields.
    #[must_use]
    pub fn base(&self) -> &BaseEvent {
        match self {
            Self::AgentStart { base }
            | Self::MessageStart { base, .. }
            | Self::MessageUpdate { base, .. }
            | Self::MessageEnd { base, .. }
            | Self::ToolStart { base, .. }
            | Self::ToolEnd { base, .. }
            | Self::AgentEnd { base, .. } => base,
        }
    }

    /// Get the conversation ID.
    #[must_use]
    pub fn conversation_id(&self) -> &str {
        &self.base().conversation_id
    }

    /// Get the event type string.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::AgentStart { .. } => "agent_start",
            Self::MessageStart { .. } => "message_start",
            Self::MessageUpdate { .. } => "message_update",
            Self::MessageEnd { .. } => "message_end",
            Self::ToolStart { .. } => "tool_start",
            Self::ToolEnd { .. } => "tool_end",
            Self::AgentEnd { .. } => "agent_end",
        }
    }
}

/// Terminal `agent_end` emitted when the runtime never confirmed an abort.
#[must_use]
pub fn synthesized_agent_end(conversation_id: impl Into<String>) -> TranscriptEvent {
    TranscriptEvent::AgentEnd {
        base: BaseEvent::now(conversation_id),
        token_stats: None,
        aborted: true,
        synthesized: true,
        error: None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SubagentActivity: subordinate tool activity
// ─────────────────────────────────────────────────────────────────────────────

/// Tool activity of a subordinate agent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SubagentActivity {
    /// Subagent started a tool.
    #[serde(rename = "tool_start")]
    ToolStart {
        /// Owning agent name.
        agent: String,
        /// ISO 8601 timestamp.
        timestamp: String,
        /// Tool call ID.
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        /// Tool name.
        #[serde(rename = "toolName")]
        tool_name: String,
        /// Tool arguments.
        arguments: Value,
    },

    /// Subagent finished a tool.
    #[serde(rename = "tool_end")]
    ToolEnd {
        /// Owning agent name.
        agent: String,
        /// ISO 8601 timestamp.
        timestamp: String,
        /// Tool call ID.
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        /// Tool name.
        #[serde(rename = "toolName")]
        tool_name: String,
        /// Whether the tool reported an error.
        #[serde(rename = "isError")]
        is_error: bool,
    },
}

impl SubagentActivity {
    /// Name of the agent that produced this activity.
    #[must_use]
    pub fn agent(&self) -> &str {
        match self {
            Self::ToolStart { agent, .. } | Self::ToolEnd { agent, .. } => agent,
        }
    }

    /// Tool name.
    #[must_use]
    pub fn tool_name(&self) -> &str {
        match self {
            Self::ToolStart { tool_name, .. } | Self::ToolEnd { tool_name, .. } => tool_name,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
