//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`SlingSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `SLING_*` environment overrides (highest priority)
//! 4. Validate the relay section
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::SlingSettings;

/// Env var naming an explicit settings file.
pub const SETTINGS_PATH_ENV: &str = "SLING_SETTINGS";

/// Resolve the settings file path.
///
/// `$SLING_SETTINGS` wins; otherwise `~/.sling/settings.json`.
pub fn settings_path() -> PathBuf {
    if let Some(explicit) = read_env_string(SETTINGS_PATH_ENV) {
        return PathBuf::from(explicit);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".sling").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<SlingSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or an invalid relay section
/// is an error.
pub fn load_settings_from_path(path: &Path) -> Result<SlingSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    settings.relay.validate()?;
    Ok(settings)
}

fn load_file_layer(path: &Path) -> Result<SlingSettings> {
    let defaults = serde_json::to_value(SlingSettings::default())?;

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

/// Apply `SLING_*` overrides from the process environment.
pub fn apply_env_overrides(settings: &mut SlingSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides using `lookup` as the variable source.
///
/// Invalid values are logged and ignored (fall back to file/default).
pub fn apply_overrides_from<F>(settings: &mut SlingSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = read_ranged(&read, "SLING_QUEUE_CAPACITY", 1, 1_000_000, parse_usize_range) {
        settings.relay.queue_capacity = v;
    }
    if let Some(v) = read_ranged(&read, "SLING_PING_INTERVAL_MS", 10, 600_000, parse_u64_range) {
        settings.relay.ping_interval_ms = v;
    }
    if let Some(v) = read_ranged(&read, "SLING_READ_TIMEOUT_MS", 10, 3_600_000, parse_u64_range) {
        settings.relay.read_timeout_ms = v;
    }
    if let Some(v) = read_ranged(&read, "SLING_WRITE_TIMEOUT_MS", 10, 600_000, parse_u64_range) {
        settings.relay.write_timeout_ms = v;
    }
    if let Some(v) = read_ranged(&read, "SLING_SHUTDOWN_GRACE_MS", 10, 600_000, parse_u64_range) {
        settings.relay.shutdown_grace_ms = v;
    }

    if let Some(v) = read("SLING_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(val) = read("SLING_LOG_JSON") {
        match parse_bool(&val) {
            Some(b) => settings.logging.json = b,
            None => tracing::warn!(key = "SLING_LOG_JSON", value = %val, "invalid boolean env var, ignoring"),
        }
    }
}

fn read_ranged<R, T, P>(read: &R, name: &str, min: T, max: T, parse: P) -> Option<T>
where
    R: Fn(&str) -> Option<String>,
    P: Fn(&str, T, T) -> Option<T>,
{
    let val = read(name)?;
    let result = parse(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "out-of-range or invalid env var, ignoring");
    }
    result
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

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

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
