//! # parley-settings
//!
//! Layered configuration for a Parley node.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`ParleySettings::default()`]
//! 2. **Settings file**: `~/.parley/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `PARLEY_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, expand_home, load_settings, load_settings_from_path, settings_path};
pub use types::*;

use std::sync::OnceLock;

/// Global settings singleton.
static SETTINGS: OnceLock<ParleySettings> = OnceLock::new();

/// Get the global settings instance.
///
/// On first call, loads settings from the default path; falls back to
/// compiled defaults if loading fails.
pub fn get_settings() -> &'static ParleySettings {
    SETTINGS.get_or_init(|| load_settings().unwrap_or_default())
}

/// Initialize the global settings with a specific value.
///
/// Returns the value back if the global was already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: ParleySettings) -> std::result::Result<(), ParleySettings> {
    SETTINGS.set(settings)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
