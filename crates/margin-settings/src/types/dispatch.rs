//! Dispatch and agent discovery settings.

use serde::{Deserialize, Serialize};

/// Which agent directories are consulted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentScope {
    /// Only `~/.margin/agents`.
    #[default]
    User,
    /// Only `<cwd>/.margin/agents`.
    Project,
    /// Both; project definitions win on name collision.
    Both,
}

impl AgentScope {
    /// Parse a scope name (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Some(Self::User),
            "project" => Some(Self::Project),
            "both" => Some(Self::Both),
            _ => None,
        }
    }

    /// Whether user-level agents are included.
    pub fn includes_user(self) -> bool {
        matches!(self, Self::User | Self::Both)
    }

    /// Whether project-level agents are included.
    pub fn includes_project(self) -> bool {
        matches!(self, Self::Project | Self::Both)
    }
}

/// Subagent dispatch limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DispatchSettings {
    /// Maximum subagents running at once in parallel mode.
    pub parallel_concurrency: usize,
    /// Maximum tasks accepted in one parallel request.
    pub max_parallel_tasks: usize,
    /// Literal token replaced with the previous step's output in chain mode.
    pub chain_placeholder: String,
    /// Scope used when a dispatch call does not name one.
    pub default_scope: AgentScope,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            parallel_concurrency: 4,
            max_parallel_tasks: 8,
            chain_placeholder: "{previous}".to_string(),
            default_scope: AgentScope::User,
        }
    }
}

/// Agent definition discovery.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentDiscoverySettings {
    /// User agent directory, relative to the Margin home (`~/.margin`).
    pub user_dir: String,
    /// Project agent directory, relative to the working directory.
    pub project_dir: String,
    /// Agent files larger than this are skipped.
    pub max_file_bytes: u64,
}

impl Default for AgentDiscoverySettings {
    fn default() -> Self {
        Self {
            user_dir: "agents".to_string(),
            project_dir: ".margin/agents".to_string(),
            max_file_bytes: 256 * 1024,
        }
    }
}
