//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and implement
//! [`Default`] with production values. `#[serde(default)]` lets a partial
//! JSON file fill in only the fields it cares about.

mod dispatch;

pub use dispatch::*;

use serde::{Deserialize, Serialize};

/// Root settings type for the Margin agent core.
///
/// ```json
/// {
///   "dispatch": { "parallelConcurrency": 2 },
///   "session": { "abortGraceMs": 1000 }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MarginSettings {
    /// Logging configuration.
    pub logging: LoggingSettings,
    /// Subagent dispatch limits.
    pub dispatch: DispatchSettings,
    /// Top-level conversation session behavior.
    pub session: SessionSettings,
    /// Agent definition discovery.
    pub agents: AgentDiscoverySettings,
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level (`trace` .. `error`). `RUST_LOG` takes precedence.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            json: false,
        }
    }
}

/// Top-level conversation session behavior.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// How long `abort` waits for the runtime to settle before emitting a
    /// synthesized `agent_end`.
    pub abort_grace_ms: u64,
    /// Reasoning effort passed to the runtime.
    pub thinking_level: String,
    /// Model used when neither the caller nor an agent file names one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            abort_grace_ms: 500,
            thinking_level: "medium".to_string(),
            default_model: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = MarginSettings::default();
        assert_eq!(s.logging.level, "warn");
        assert_eq!(s.session.abort_grace_ms, 500);
        assert_eq!(s.dispatch.parallel_concurrency, 4);
        assert_eq!(s.dispatch.max_parallel_tasks, 8);
        assert_eq!(s.dispatch.chain_placeholder, "{previous}");
        assert_eq!(s.dispatch.default_scope, AgentScope::User);
    }

    #[test]
    fn serializes_camel_case() {
        let v = serde_json::to_value(MarginSettings::default()).unwrap();
        assert_eq!(v["session"]["abortGraceMs"], 500);
        assert_eq!(v["dispatch"]["parallelConcurrency"], 4);
        assert_eq!(v["agents"]["projectDir"], ".margin/agents");
        assert!(v["session"].get("defaultModel").is_none());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s: MarginSettings =
            serde_json::from_str(r#"{"dispatch": {"maxParallelTasks": 3}}"#).unwrap();
        assert_eq!(s.dispatch.max_parallel_tasks, 3);
        assert_eq!(s.dispatch.parallel_concurrency, 4);
        assert_eq!(s.session.thinking_level, "medium");
    }
}
