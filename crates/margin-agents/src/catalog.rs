//! Agent catalogs.
//!
//! The dispatcher asks its catalog for the visible agents on every call, so
//! edits to agent files (or to an in-memory catalog) are picked up without a
//! restart.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use margin_settings::AgentDiscoverySettings;
use parking_lot::RwLock;

use crate::loader::discover;
use crate::types::{AgentConfig, AgentScope};

/// Source of agent definitions.
pub trait AgentCatalog: Send + Sync {
    /// All agents visible under `scope`, keyed by name. `cwd` anchors the
    /// project directory.
    fn discover_agents(&self, scope: AgentScope, cwd: &Path) -> BTreeMap<String, AgentConfig>;
}

/// Catalog backed by agent files on disk.
#[derive(Clone, Debug)]
pub struct FsAgentCatalog {
    user_dir: PathBuf,
    project_dir: PathBuf,
    max_file_bytes: u64,
}

impl FsAgentCatalog {
    /// Build a catalog with explicit directories. `project_dir` is joined
    /// onto the dispatch working directory unless it is absolute.
    pub fn new(user_dir: impl Into<PathBuf>, project_dir: impl Into<PathBuf>) -> Self {
        Self {
            user_dir: user_dir.into(),
            project_dir: project_dir.into(),
            max_file_bytes: AgentDiscoverySettings::default().max_file_bytes,
        }
    }

    /// Build a catalog from settings, resolving the user directory under
    /// `margin_home`.
    pub fn from_settings(settings: &AgentDiscoverySettings, margin_home: &Path) -> Self {
        Self {
            user_dir: margin_home.join(&settings.user_dir),
            project_dir: PathBuf::from(&settings.project_dir),
            max_file_bytes: settings.max_file_bytes,
        }
    }

    /// Override the per-file size limit.
    #[must_use]
    pub fn with_max_file_bytes(mut self, max: u64) -> Self {
        self.max_file_bytes = max;
        self
    }

    /// The user agent directory.
    pub fn user_dir(&self) -> &Path {
        &self.user_dir
    }

    /// The project agent directory for `cwd`.
    pub fn project_dir(&self, cwd: &Path) -> PathBuf {
        cwd.join(&self.project_dir)
    }
}

impl AgentCatalog for FsAgentCatalog {
    fn discover_agents(&self, scope: AgentScope, cwd: &Path) -> BTreeMap<String, AgentConfig> {
        discover(&self.user_dir, &self.project_dir(cwd), scope, self.max_file_bytes).agents
    }
}

/// In-memory catalog whose contents can change between dispatch calls.
#[derive(Debug, Default)]
pub struct StaticAgentCatalog {
    agents: RwLock<BTreeMap<String, AgentConfig>>,
}

impl StaticAgentCatalog {
    /// Create a catalog holding `agents`.
    pub fn new(agents: impl IntoIterator<Item = AgentConfig>) -> Self {
        Self {
            agents: RwLock::new(agents.into_iter().map(|a| (a.name.clone(), a)).collect()),
        }
    }

    /// Add or replace an agent.
    pub fn insert(&self, agent: AgentConfig) -> Option<AgentConfig> {
        self.agents.write().insert(agent.name.clone(), agent)
    }

    /// Remove an agent by name.
    pub fn remove(&self, name: &str) -> Option<AgentConfig> {
        self.agents.write().remove(name)
    }

    /// Number of agents held.
    pub fn len(&self) -> usize {
        self.agents.read().len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.agents.read().is_empty()
    }
}

impl AgentCatalog for StaticAgentCatalog {
    fn discover_agents(&self, scope: AgentScope, _cwd: &Path) -> BTreeMap<String, AgentConfig> {
        self.agents
            .read()
            .iter()
            .filter(|(_, a)| a.source.in_scope(scope))
            .map(|(k, a)| (k.clone(), a.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AgentSource;
    use tempfile::TempDir;

    #[test]
    fn fs_catalog_rereads_on_every_call() {
        let tmp = TempDir::new().unwrap();
        let home = tmp.path().join("home");
        let cwd = tmp.path().join("vault");
        let catalog = FsAgentCatalog::from_settings(&AgentDiscoverySettings::default(), &home);

        assert!(catalog.discover_agents(AgentScope::Both, &cwd).is_empty());

        let project = catalog.project_dir(&cwd);
        std::fs::create_dir_all(&project).unwrap();
        std::fs::write(project.join("scout.md"), "---\ndescription: Scout\n---\n").unwrap();

        let agents = catalog.discover_agents(AgentScope::Both, &cwd);
        assert_eq!(agents.keys().collect::<Vec<_>>(), vec!["scout"]);
        assert!(catalog.discover_agents(AgentScope::User, &cwd).is_empty());
    }

    #[test]
    fn static_catalog_live_edits_and_scope() {
        let catalog = StaticAgentCatalog::new([AgentConfig::new("planner", "p")]);
        let _ = catalog.insert(AgentConfig::new("local", "l").with_source(AgentSource::Project));
        let cwd = Path::new(".");

        assert_eq!(catalog.discover_agents(AgentScope::User, cwd).len(), 1);
        assert_eq!(catalog.discover_agents(AgentScope::Both, cwd).len(), 2);

        let _ = catalog.remove("planner");
        assert!(catalog.discover_agents(AgentScope::User, cwd).is_empty());
        assert_eq!(catalog.len(), 1);
    }
}
