//! # margin-agents
//!
//! Discovery of named subordinate agent definitions.
//!
//! Agents are markdown files with a `---` frontmatter header (`name`,
//! `description`, `tools`, `model`, `maxTurns`, `timeoutMs`); the body is the
//! agent's system prompt. They live in two places:
//!
//! - **User**: `~/.margin/agents/*.md`
//! - **Project**: `<cwd>/.margin/agents/*.md`, overriding user agents of the
//!   same name
//!
//! The [`AgentCatalog`] trait is what the dispatcher consumes.

#![deny(unsafe_code)]

pub mod catalog;
pub mod errors;
pub mod loader;
pub mod parser;
pub mod types;

pub use catalog::{AgentCatalog, FsAgentCatalog, StaticAgentCatalog};
pub use errors::AgentScanError;
pub use loader::{AgentDiscovery, AgentScanResult, discover, load_agent, scan_directory};
pub use parser::{ParsedAgentMd, parse_agent_md};
pub use types::{AgentConfig, AgentFrontmatter, AgentScope, AgentSource};
