//! # sling-settings
//!
//! Configuration for the sling relay, loaded from three layers (in priority
//! order):
//! 1. **Compiled defaults**: [`SlingSettings::default()`]
//! 2. **Settings file**: `$SLING_SETTINGS` or `~/.sling/settings.json`
//!    (deep-merged over defaults)
//! 3. **Environment variables**: `SLING_*` overrides (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use sling_settings::get_settings;
//!
//! let relay = &get_settings().relay;
//! println!("ping every {:?}", relay.ping_interval());
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_overrides_from, deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::{LoggingSettings, RelaySettings, SlingSettings};

use std::sync::OnceLock;

static SETTINGS: OnceLock<SlingSettings> = OnceLock::new();

/// Get the global settings instance.
///
/// Loads on first call; falls back to compiled defaults if loading fails.
pub fn get_settings() -> &'static SlingSettings {
    SETTINGS.get_or_init(|| {
        load_settings().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load settings, using defaults");
            SlingSettings::default()
        })
    })
}

/// Initialize the global settings with a specific value.
///
/// Returns the provided settings back if the global was already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: SlingSettings) -> std::result::Result<(), SlingSettings> {
    SETTINGS.set(settings)
}
