//! Settings errors.

use thiserror::Error;

/// Why settings could not be loaded.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("settings file unreadable: {0}")]
    Io(#[from] std::io::Error),
    /// The settings file is not JSON, or does not match the schema.
    #[error("settings file malformed: {0}")]
    Json(#[from] serde_json::Error),
    /// A value the dispatcher cannot work with.
    #[error("setting `{key}` {problem}")]
    Rejected {
        /// camelCase path of the offending key.
        key: &'static str,
        /// What is wrong with it.
        problem: &'static str,
    },
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
