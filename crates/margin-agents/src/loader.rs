//! Filesystem agent scanner.
//!
//! Each `*.md` file directly inside an agent directory is one agent
//! definition. Non-existent directories yield empty results.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::errors::AgentScanError;
use crate::parser::parse_agent_md;
use crate::types::{AgentConfig, AgentScope, AgentSource};

/// Agents and errors from scanning one or more directories.
#[derive(Clone, Debug, Default)]
pub struct AgentScanResult {
    /// Successfully loaded agents, sorted by file name.
    pub agents: Vec<AgentConfig>,
    /// Files that could not be loaded.
    pub errors: Vec<AgentScanError>,
}

/// Merged discovery output, keyed by agent name.
#[derive(Clone, Debug, Default)]
pub struct AgentDiscovery {
    /// Visible agents. Project definitions replace user definitions of the
    /// same name.
    pub agents: BTreeMap<String, AgentConfig>,
    /// Files that could not be loaded.
    pub errors: Vec<AgentScanError>,
}

/// Scan one directory for agent files.
pub fn scan_directory(dir: &Path, source: AgentSource, max_file_bytes: u64) -> AgentScanResult {
    let mut result = AgentScanResult::default();

    if !dir.is_dir() {
        return result;
    }

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "failed to read agents directory");
            return result;
        }
    };

    let mut paths: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "md"))
        .collect();
    paths.sort();

    for path in paths {
        match load_agent(&path, source, max_file_bytes) {
            Ok(agent) => {
                debug!(name = %agent.name, %source, "loaded agent");
                result.agents.push(agent);
            }
            Err(error) => {
                warn!(%error, "skipping agent file");
                result.errors.push(error);
            }
        }
    }

    result
}

/// Scan the directories selected by `scope` and merge them by name.
pub fn discover(
    user_dir: &Path,
    project_dir: &Path,
    scope: AgentScope,
    max_file_bytes: u64,
) -> AgentDiscovery {
    let mut discovery = AgentDiscovery::default();

    let mut scans = Vec::with_capacity(2);
    if scope.includes_user() {
        scans.push(scan_directory(user_dir, AgentSource::User, max_file_bytes));
    }
    if scope.includes_project() {
        scans.push(scan_directory(project_dir, AgentSource::Project, max_file_bytes));
    }

    // Later scans overwrite earlier ones, so project beats user.
    for scan in scans {
        for agent in scan.agents {
            if let Some(prev) = discovery.agents.insert(agent.name.clone(), agent) {
                debug!(name = %prev.name, shadowed = %prev.source, "agent definition overridden");
            }
        }
        discovery.errors.extend(scan.errors);
    }

    discovery
}

/// Load a single agent file.
pub fn load_agent(
    path: &Path,
    source: AgentSource,
    max_file_bytes: u64,
) -> Result<AgentConfig, AgentScanError> {
    let path_str = path.to_string_lossy().into_owned();

    let size = std::fs::metadata(path)
        .map_err(|e| AgentScanError::new(&path_str, format!("Failed to read metadata: {e}")))?
        .len();
    if size > max_file_bytes {
        return Err(AgentScanError::new(
            path_str,
            format!("File too large: {size} bytes (max {max_file_bytes} bytes)"),
        ));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| AgentScanError::new(&path_str, format!("Failed to read file: {e}")))?;
    let parsed = parse_agent_md(&content);
    let fm = parsed.frontmatter;

    let name = match fm.name {
        Some(name) => name,
        None => path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_string)
            .ok_or_else(|| AgentScanError::new(&path_str, "Cannot derive agent name"))?,
    };
    let description = fm
        .description
        .or_else(|| first_text_line(&parsed.body))
        .ok_or_else(|| AgentScanError::new(&path_str, "Missing description"))?;

    Ok(AgentConfig {
        name,
        description,
        tools: fm.tools,
        model: fm.model,
        max_turns: fm.max_turns,
        timeout_ms: fm.timeout_ms,
        system_prompt: parsed.body,
        source,
        path: path.to_path_buf(),
    })
}

fn first_text_line(body: &str) -> Option<String> {
    body.lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
}
