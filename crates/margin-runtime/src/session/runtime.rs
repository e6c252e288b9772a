//! Collaborator interfaces for the external agent runtime.
//!
//! The core never talks to a model directly. It builds sessions through an
//! [`AgentRuntime`], resolves models through a [`ModelResolver`], and feeds
//! extra prompt material through a [`ResourceLoader`].

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use margin_core::{AgentEvent, Listener, Subscription, TokenStats};
use tokio_util::sync::CancellationToken;

use crate::errors::RuntimeError;
use crate::tool::CustomTool;

// ─────────────────────────────────────────────────────────────────────────────
// Model resolution
// ─────────────────────────────────────────────────────────────────────────────

/// Opaque credential handle. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials(String);

impl Credentials {
    /// Wrap a credential value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Raw credential value.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credentials(***)")
    }
}

/// A model descriptor plus the credentials needed to call it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedModel {
    /// Provider name (e.g. `anthropic`).
    pub provider: String,
    /// Provider model ID.
    pub model_id: String,
    /// Credentials for the provider.
    pub credentials: Credentials,
}

/// Resolves a model override (or the default) into a [`ResolvedModel`].
#[async_trait]
pub trait ModelResolver: Send + Sync {
    /// Resolve `model`, or the default model when `None`.
    ///
    /// Missing credentials or unknown models are
    /// [`RuntimeError::Configuration`].
    async fn resolve(&self, model: Option<&str>) -> Result<ResolvedModel, RuntimeError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Resources
// ─────────────────────────────────────────────────────────────────────────────

/// Extra prompt material handed to each new session.
pub trait ResourceLoader: Send + Sync {
    /// Text appended to the system prompt.
    fn system_prompt_append(&self) -> Option<String>;

    /// Files the runtime should load as context.
    fn context_files(&self) -> Vec<PathBuf>;
}

/// Fixed resources.
#[derive(Clone, Debug, Default)]
pub struct StaticResourceLoader {
    append: Option<String>,
    context_files: Vec<PathBuf>,
}

impl StaticResourceLoader {
    /// Resources with the given system prompt suffix.
    pub fn new(append: Option<String>) -> Self {
        Self {
            append,
            context_files: Vec::new(),
        }
    }

    /// Add context files.
    #[must_use]
    pub fn with_context_files(mut self, files: impl IntoIterator<Item = PathBuf>) -> Self {
        self.context_files.extend(files);
        self
    }
}

impl ResourceLoader for StaticResourceLoader {
    fn system_prompt_append(&self) -> Option<String> {
        self.append.clone()
    }

    fn context_files(&self) -> Vec<PathBuf> {
        self.context_files.clone()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sessions
// ─────────────────────────────────────────────────────────────────────────────

/// Which built-in tools a session gets.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ToolSelection {
    /// The runtime's default tool set.
    #[default]
    Default,
    /// Only the named tools.
    Only(Vec<String>),
}

impl ToolSelection {
    /// `Only(list)` for `Some`, `Default` for `None`.
    pub fn from_allow_list(list: Option<&[String]>) -> Self {
        list.map_or(Self::Default, |l| Self::Only(l.to_vec()))
    }
}

/// Everything needed to create one runtime session.
#[derive(Clone)]
pub struct CreateSessionOptions {
    /// Working directory for tools.
    pub work_dir: PathBuf,
    /// Resolved model and credentials.
    pub model: ResolvedModel,
    /// Built-in tool selection.
    pub tools: ToolSelection,
    /// Tools injected by the core.
    pub custom_tools: Vec<Arc<dyn CustomTool>>,
    /// Extra prompt material.
    pub resources: Arc<dyn ResourceLoader>,
    /// Reasoning effort.
    pub thinking_level: String,
    /// System prompt body (agent definitions supply this).
    pub system_prompt: Option<String>,
}

impl fmt::Debug for CreateSessionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let custom: Vec<&str> = self.custom_tools.iter().map(|t| t.name()).collect();
        f.debug_struct("CreateSessionOptions")
            .field("work_dir", &self.work_dir)
            .field("model", &self.model)
            .field("tools", &self.tools)
            .field("custom_tools", &custom)
            .field("thinking_level", &self.thinking_level)
            .field("system_prompt", &self.system_prompt.as_ref().map(String::len))
            .finish_non_exhaustive()
    }
}

/// Options for one prompt.
#[derive(Clone, Debug, Default)]
pub struct PromptOptions {
    /// Cancelling this token asks the runtime to stop. Custom tools called
    /// during the prompt receive it in their [`ToolContext`](crate::tool::ToolContext).
    pub cancellation: CancellationToken,
}

/// How a prompt ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PromptOutcome {
    /// The agent loop finished on its own.
    Completed,
    /// The agent loop stopped because of an abort.
    Aborted,
}

/// Creates runtime sessions.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Create a session.
    async fn create_session(
        &self,
        options: CreateSessionOptions,
    ) -> Result<Arc<dyn RuntimeSession>, RuntimeError>;
}

/// A live session inside the external runtime.
#[async_trait]
pub trait RuntimeSession: Send + Sync {
    /// Run one prompt to completion, emitting [`AgentEvent`]s to subscribers.
    async fn prompt(&self, text: &str, options: PromptOptions)
    -> Result<PromptOutcome, RuntimeError>;

    /// Ask the in-flight prompt to stop. Best-effort.
    fn abort(&self);

    /// Release runtime resources.
    fn dispose(&self);

    /// Register an event listener.
    fn subscribe(&self, listener: Listener<AgentEvent>) -> Subscription;

    /// Token counters. `None` while the runtime cannot report them.
    fn stats(&self) -> Option<TokenStats>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_are_redacted() {
        let c = Credentials::new("sk-secret");
        assert_eq!(format!("{c:?}"), "Credentials(***)");
        assert_eq!(c.expose(), "sk-secret");
    }

    #[test]
    fn tool_selection_from_allow_list() {
        assert_eq!(ToolSelection::from_allow_list(None), ToolSelection::Default);
        let list = vec!["read".to_string()];
        assert_eq!(
            ToolSelection::from_allow_list(Some(&list)),
            ToolSelection::Only(vec!["read".into()])
        );
    }

    #[test]
    fn static_resources() {
        let r = StaticResourceLoader::new(Some("Be brief.".into()))
            .with_context_files([PathBuf::from("AGENTS.md")]);
        assert_eq!(r.system_prompt_append().as_deref(), Some("Be brief."));
        assert_eq!(r.context_files().len(), 1);
    }
}
