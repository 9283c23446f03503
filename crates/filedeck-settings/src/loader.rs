//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`FiledeckSettings::default()`]
//! 2. If `~/.filedeck/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `FILEDECK_*` environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use filedeck_core::logging::LogFormat;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::FiledeckSettings;

/// Resolve the path to the settings file (`~/.filedeck/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".filedeck").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<FiledeckSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<FiledeckSettings> {
    let defaults = serde_json::to_value(FiledeckSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: FiledeckSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
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

/// Apply `FILEDECK_*` overrides from the process environment.
pub fn apply_env_overrides(settings: &mut FiledeckSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Invalid values are ignored with a warning (falling back to file/default).
pub fn apply_overrides(settings: &mut FiledeckSettings, lookup: impl Fn(&str) -> Option<String>) {
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());
    let invalid = |name: &str, value: &str| warn!(key = name, value, "invalid env var, ignoring");

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read("FILEDECK_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read("FILEDECK_PORT") {
        match parse_u16_range(&v, 0, u16::MAX) {
            Some(n) => settings.server.port = n,
            None => invalid("FILEDECK_PORT", &v),
        }
    }
    if let Some(v) = read("FILEDECK_MAX_CONNECTIONS") {
        match parse_usize_range(&v, 1, 100_000) {
            Some(n) => settings.server.max_connections = n,
            None => invalid("FILEDECK_MAX_CONNECTIONS", &v),
        }
    }
    if let Some(v) = read("FILEDECK_HEARTBEAT_INTERVAL_MS") {
        match parse_u64_range(&v, 100, 600_000) {
            Some(n) => settings.server.heartbeat_interval_ms = n,
            None => invalid("FILEDECK_HEARTBEAT_INTERVAL_MS", &v),
        }
    }

    // ── Files ───────────────────────────────────────────────────────
    if let Some(v) = read("FILEDECK_ROOT") {
        settings.files.root = v;
    }
    if let Some(v) = read("FILEDECK_WATCH_PATH") {
        settings.files.watch_path = Some(v);
    }
    if let Some(v) = read("FILEDECK_LIST_LIMIT") {
        match parse_usize_range(&v, 1, 10_000) {
            Some(n) => settings.files.list_limit = n,
            None => invalid("FILEDECK_LIST_LIMIT", &v),
        }
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read("FILEDECK_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read("FILEDECK_LOG_FORMAT") {
        match LogFormat::parse(&v) {
            Some(f) => settings.logging.format = f,
            None => invalid("FILEDECK_LOG_FORMAT", &v),
        }
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
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
