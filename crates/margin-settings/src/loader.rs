//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`MarginSettings::default()`]
//! 2. If `~/.margin/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `MARGIN_*` environment variable overrides (highest priority)
//! 4. Validate limits
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::{AgentScope, MarginSettings};

/// Resolve the Margin home directory.
///
/// `MARGIN_HOME` wins; otherwise `$HOME/.margin`.
pub fn margin_home() -> PathBuf {
    if let Some(dir) = read_env_string("MARGIN_HOME") {
        return PathBuf::from(dir);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".margin")
}

/// Resolve the path to the settings file (`~/.margin/settings.json`).
pub fn settings_path() -> PathBuf {
    margin_home().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<MarginSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or out-of-range limits are
/// errors.
pub fn load_settings_from_path(path: &Path) -> Result<MarginSettings> {
    let mut settings = read_settings_file(path)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

fn read_settings_file(path: &Path) -> Result<MarginSettings> {
    let defaults = serde_json::to_value(MarginSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Reject limits the dispatcher cannot honor.
pub fn validate(settings: &MarginSettings) -> Result<()> {
    let d = &settings.dispatch;
    let rejected = |key, problem| Err(SettingsError::Rejected { key, problem });
    if d.parallel_concurrency == 0 {
        return rejected("dispatch.parallelConcurrency", "must be at least 1");
    }
    if d.max_parallel_tasks == 0 {
        return rejected("dispatch.maxParallelTasks", "must be at least 1");
    }
    if d.chain_placeholder.is_empty() {
        return rejected("dispatch.chainPlaceholder", "must not be empty");
    }
    Ok(())
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are ignored with a warning (file/default value is kept).
pub fn apply_env_overrides(settings: &mut MarginSettings) {
    apply_overrides_from(settings, |key| std::env::var(key).ok());
}

/// Apply overrides read through `lookup` (keyed by env var name).
pub fn apply_overrides_from(
    settings: &mut MarginSettings,
    lookup: impl Fn(&str) -> Option<String>,
) {
    let string = |key: &str| lookup(key).filter(|v| !v.is_empty());
    let ranged_usize = |key: &str, min: usize, max: usize| {
        let val = lookup(key)?;
        let parsed = parse_usize_range(&val, min, max);
        if parsed.is_none() {
            tracing::warn!(key, value = %val, "invalid usize env var, ignoring");
        }
        parsed
    };

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = string("MARGIN_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = lookup("MARGIN_LOG_JSON") {
        match parse_bool(&v) {
            Some(b) => settings.logging.json = b,
            None => {
                tracing::warn!(
                    key = "MARGIN_LOG_JSON",
                    value = %v,
                    "invalid boolean env var, ignoring"
                );
            }
        }
    }

    // ── Dispatch ────────────────────────────────────────────────────
    if let Some(v) = ranged_usize("MARGIN_PARALLEL_CONCURRENCY", 1, 64) {
        settings.dispatch.parallel_concurrency = v;
    }
    if let Some(v) = ranged_usize("MARGIN_MAX_PARALLEL_TASKS", 1, 256) {
        settings.dispatch.max_parallel_tasks = v;
    }
    if let Some(v) = string("MARGIN_AGENT_SCOPE") {
        match AgentScope::parse(&v) {
            Some(scope) => settings.dispatch.default_scope = scope,
            None => {
                tracing::warn!(
                    key = "MARGIN_AGENT_SCOPE",
                    value = %v,
                    "unknown agent scope, ignoring"
                );
            }
        }
    }

    // ── Session ─────────────────────────────────────────────────────
    if let Some(v) = lookup("MARGIN_ABORT_GRACE_MS") {
        match parse_u64_range(&v, 0, 60_000) {
            Some(ms) => settings.session.abort_grace_ms = ms,
            None => {
                tracing::warn!(
                    key = "MARGIN_ABORT_GRACE_MS",
                    value = %v,
                    "invalid u64 env var, ignoring"
                );
            }
        }
    }
    if let Some(v) = string("MARGIN_DEFAULT_MODEL") {
        settings.session.default_model = Some(v);
    }
    if let Some(v) = string("MARGIN_THINKING_LEVEL") {
        settings.session.thinking_level = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}
