//! Runtime error types.

/// Errors raised by sessions and the registry.
///
/// Dispatch never surfaces these as faults: the dispatcher converts them to
/// per-invocation error results.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Model or credentials could not be resolved.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The runtime failed while running a prompt.
    #[error("Prompt failed: {0}")]
    Prompt(String),

    /// Another prompt is already in flight on this session.
    #[error("Session busy: {0}")]
    SessionBusy(String),

    /// The session was disposed.
    #[error("Session disposed: {0}")]
    SessionDisposed(String),

    /// The conversation was reset while its session was being built.
    #[error("Session reset during construction: {0}")]
    SessionReset(String),
}

impl RuntimeError {
    /// Short category for structured log fields.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Prompt(_) => "prompt",
            Self::SessionBusy(_) => "session_busy",
            Self::SessionDisposed(_) => "session_disposed",
            Self::SessionReset(_) => "session_reset",
        }
    }
}
