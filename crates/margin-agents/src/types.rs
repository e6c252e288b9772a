//! Agent definition types.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use margin_settings::AgentScope;

/// Where an agent definition was found.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentSource {
    /// `~/.margin/agents`.
    User,
    /// `<cwd>/.margin/agents`.
    Project,
}

impl AgentSource {
    /// Whether agents from this source are visible under `scope`.
    pub fn in_scope(self, scope: AgentScope) -> bool {
        match self {
            Self::User => scope.includes_user(),
            Self::Project => scope.includes_project(),
        }
    }
}

impl fmt::Display for AgentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => f.write_str("user"),
            Self::Project => f.write_str("project"),
        }
    }
}

/// A named, reusable subordinate agent definition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    /// Unique name used by dispatch requests.
    pub name: String,
    /// One-line summary shown to the dispatching model.
    pub description: String,
    /// Tool allow-list. `None` grants the runtime's default tool set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<String>>,
    /// Model override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Stop after this many turns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<u32>,
    /// Stop after this many milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Markdown body, appended to the system prompt.
    pub system_prompt: String,
    /// Where the definition came from.
    pub source: AgentSource,
    /// Definition file path.
    pub path: PathBuf,
}

impl AgentConfig {
    /// Minimal config for callers that build agents in code.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            tools: None,
            model: None,
            max_turns: None,
            timeout_ms: None,
            system_prompt: String::new(),
            source: AgentSource::User,
            path: PathBuf::new(),
        }
    }

    /// Set the system prompt body.
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Set the tool allow-list.
    #[must_use]
    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools = Some(tools.into_iter().map(Into::into).collect());
        self
    }

    /// Set the model override.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the turn limit.
    #[must_use]
    pub fn with_max_turns(mut self, turns: u32) -> Self {
        self.max_turns = Some(turns);
        self
    }

    /// Set the wall-clock limit.
    #[must_use]
    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    /// Set the source.
    #[must_use]
    pub fn with_source(mut self, source: AgentSource) -> Self {
        self.source = source;
        self
    }
}

/// Frontmatter fields recognised in an agent file.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AgentFrontmatter {
    /// `name`
    pub name: Option<String>,
    /// `description`
    pub description: Option<String>,
    /// `tools`: comma list, inline array, or block list.
    pub tools: Option<Vec<String>>,
    /// `model`
    pub model: Option<String>,
    /// `maxTurns`
    pub max_turns: Option<u32>,
    /// `timeoutMs`
    pub timeout_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_scope_filter() {
        assert!(AgentSource::User.in_scope(AgentScope::User));
        assert!(!AgentSource::User.in_scope(AgentScope::Project));
        assert!(AgentSource::Project.in_scope(AgentScope::Both));
    }

    #[test]
    fn builder_sets_fields() {
        let c = AgentConfig::new("planner", "Plans work")
            .with_tools(["read", "grep"])
            .with_max_turns(3)
            .with_timeout_ms(1000);
        assert_eq!(c.tools.as_deref(), Some(&["read".to_string(), "grep".to_string()][..]));
        assert_eq!(c.max_turns, Some(3));
        assert_eq!(c.timeout_ms, Some(1000));
        assert!(c.model.is_none());
    }

    #[test]
    fn serializes_camel_case() {
        let c = AgentConfig::new("a", "b").with_max_turns(2);
        let v = serde_json::to_value(&c).unwrap();
        assert_eq!(v["maxTurns"], 2);
        assert_eq!(v["source"], "user");
        assert!(v.get("timeoutMs").is_none());
    }
}
