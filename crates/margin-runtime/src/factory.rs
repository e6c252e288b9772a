//! Top-level session construction.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use margin_core::ConversationId;
use margin_settings::SessionSettings;
use tracing::debug;

use crate::dispatch::SubagentDispatcher;
use crate::errors::RuntimeError;
use crate::session::{
    AgentRuntime, AgentSession, CreateSessionOptions, ModelResolver, ResourceLoader,
    StaticResourceLoader, ToolSelection,
};
use crate::tool::CustomTool;

/// Builds the session behind a conversation.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Create a session for `conversation_id`. Configuration problems such
    /// as missing credentials surface here.
    async fn create(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Arc<AgentSession>, RuntimeError>;
}

/// Factory for chat-sidebar conversations: default model, vault working
/// directory, and the `subagent` tool when a dispatcher is attached.
pub struct ConversationSessionFactory {
    runtime: Arc<dyn AgentRuntime>,
    resolver: Arc<dyn ModelResolver>,
    resources: Arc<dyn ResourceLoader>,
    work_dir: PathBuf,
    tools: ToolSelection,
    model: Option<String>,
    thinking_level: String,
    system_prompt: Option<String>,
    dispatcher: Option<Arc<SubagentDispatcher>>,
}

impl ConversationSessionFactory {
    /// Factory rooted at `work_dir`.
    pub fn new(
        runtime: Arc<dyn AgentRuntime>,
        resolver: Arc<dyn ModelResolver>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        let session = SessionSettings::default();
        Self {
            runtime,
            resolver,
            resources: Arc::new(StaticResourceLoader::default()),
            work_dir: work_dir.into(),
            tools: ToolSelection::Default,
            model: session.default_model,
            thinking_level: session.thinking_level,
            system_prompt: None,
            dispatcher: None,
        }
    }

    /// Take model and reasoning defaults from settings.
    #[must_use]
    pub fn with_session_settings(mut self, settings: &SessionSettings) -> Self {
        self.model.clone_from(&settings.default_model);
        self.thinking_level.clone_from(&settings.thinking_level);
        self
    }

    /// Expose `dispatcher` as the `subagent` tool.
    #[must_use]
    pub fn with_dispatcher(mut self, dispatcher: Arc<SubagentDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Extra prompt material.
    #[must_use]
    pub fn with_resources(mut self, resources: Arc<dyn ResourceLoader>) -> Self {
        self.resources = resources;
        self
    }

    /// Built-in tool selection.
    #[must_use]
    pub fn with_tools(mut self, tools: ToolSelection) -> Self {
        self.tools = tools;
        self
    }

    /// System prompt body.
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }
}

#[async_trait]
impl SessionFactory for ConversationSessionFactory {
    async fn create(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Arc<AgentSession>, RuntimeError> {
        let model = self.resolver.resolve(self.model.as_deref()).await?;
        let custom_tools: Vec<Arc<dyn CustomTool>> = self
            .dispatcher
            .iter()
            .map(|d| Arc::clone(d) as Arc<dyn CustomTool>)
            .collect();
        debug!(
            conversation_id = %conversation_id,
            model = %model.model_id,
            custom_tools = custom_tools.len(),
            "building conversation session"
        );
        let options = CreateSessionOptions {
            work_dir: self.work_dir.clone(),
            model,
            tools: self.tools.clone(),
            custom_tools,
            resources: Arc::clone(&self.resources),
            thinking_level: self.thinking_level.clone(),
            system_prompt: self.system_prompt.clone(),
        };
        AgentSession::construct(self.runtime.as_ref(), options).await
    }
}
