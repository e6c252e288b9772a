//! Error types for agent discovery.

use thiserror::Error;

/// A single agent file that could not be loaded.
///
/// Scan errors never abort discovery; they are collected next to the agents
/// that did load.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{path}: {message}")]
pub struct AgentScanError {
    /// File that failed.
    pub path: String,
    /// What went wrong.
    pub message: String,
}

impl AgentScanError {
    pub(crate) fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_path() {
        let e = AgentScanError::new("/a/b.md", "File too large");
        assert_eq!(e.to_string(), "/a/b.md: File too large");
    }
}
