//! # margin-settings
//!
//! Layered configuration for the Margin agent core.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`MarginSettings::default()`]
//! 2. **User file**: `~/.margin/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `MARGIN_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, margin_home, settings_path};
pub use types::*;

use std::sync::OnceLock;

static SETTINGS: OnceLock<MarginSettings> = OnceLock::new();

/// Get the global settings instance.
///
/// Loads on first call and caches the result. Falls back to compiled
/// defaults if loading fails.
pub fn get_settings() -> &'static MarginSettings {
    SETTINGS.get_or_init(|| {
        load_settings().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load settings, using defaults");
            MarginSettings::default()
        })
    })
}

/// Initialize the global settings with a specific value.
///
/// Returns the settings back if the global was already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: MarginSettings) -> std::result::Result<(), MarginSettings> {
    SETTINGS.set(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = MarginSettings::default();
        assert!(settings_path().ends_with("settings.json"));
    }

    #[test]
    fn global_settings_are_cached() {
        let a: *const MarginSettings = get_settings();
        let b: *const MarginSettings = get_settings();
        assert_eq!(a, b);
        assert!(init_settings(MarginSettings::default()).is_err());
    }
}
