//! Custom tools injected into a runtime session.
//!
//! The runtime owns its built-in tools (read, search, edit, ...). Anything
//! the core adds on top, such as the subagent dispatcher, implements
//! [`CustomTool`].

use std::path::PathBuf;

use async_trait::async_trait;
use margin_core::ConversationId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::errors::RuntimeError;

/// Execution context passed to every custom tool call.
#[derive(Clone, Debug)]
pub struct ToolContext {
    /// Unique ID of this tool call.
    pub tool_call_id: String,
    /// Conversation the calling session belongs to, if top-level.
    pub conversation_id: Option<ConversationId>,
    /// Working directory of the calling session.
    pub working_directory: PathBuf,
    /// Cancellation of the prompt that issued this call.
    pub cancellation: CancellationToken,
}

/// Schema sent to the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// Tool name.
    pub name: String,
    /// What the tool does, in the model's terms.
    pub description: String,
    /// JSON schema of the parameters.
    pub parameters: Value,
}

/// Result handed back to the runtime.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOutput {
    /// Text the model sees.
    pub content: String,
    /// Whether the call failed.
    pub is_error: bool,
    /// Structured metadata for the host UI.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ToolOutput {
    /// Successful output.
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
            details: None,
        }
    }

    /// Failed output.
    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
            details: None,
        }
    }

    /// Attach structured details.
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// A tool the core injects into a runtime session.
#[async_trait]
pub trait CustomTool: Send + Sync {
    /// Tool name, the exact string the model calls.
    fn name(&self) -> &str;

    /// Schema for the model.
    fn definition(&self) -> ToolDefinition;

    /// Execute the tool with JSON arguments.
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutput, RuntimeError>;
}
