//! # filedeck-settings
//!
//! Configuration management with layered sources for filedeck.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`FiledeckSettings::default()`]
//! 2. **User file**: `~/.filedeck/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `FILEDECK_*` overrides (highest priority)
//!
//! Command-line flags in the `filedeck` binary are applied on top.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::{FiledeckSettings, FilesSettings, LoggingSettings, ServerSettings};
