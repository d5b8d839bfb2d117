//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`ParleySettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `PARLEY_*` environment overrides (highest priority)
//! 4. Validate cross-field constraints
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::ParleySettings;

/// Resolve the parley home directory (`~/.parley`).
pub fn parley_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".parley")
}

/// Resolve the default settings file path (`~/.parley/settings.json`).
pub fn settings_path() -> PathBuf {
    parley_home().join("settings.json")
}

/// Expand a leading `~/` against `HOME`.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(rest)
        }
        None => PathBuf::from(path),
    }
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<ParleySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; a malformed one is an error.
pub fn load_settings_from_path(path: &Path) -> Result<ParleySettings> {
    let defaults = serde_json::to_value(ParleySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: ParleySettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
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

/// Reject combinations that individually parse but cannot work together.
pub fn validate(settings: &ParleySettings) -> Result<()> {
    if settings.history.max_limit == 0 {
        return Err(SettingsError::InvalidValue(
            "history.maxLimit must be at least 1".into(),
        ));
    }
    if settings.history.default_limit > settings.history.max_limit {
        return Err(SettingsError::InvalidValue(format!(
            "history.defaultLimit ({}) exceeds history.maxLimit ({})",
            settings.history.default_limit, settings.history.max_limit
        )));
    }
    if settings.bus.dedup_capacity == 0 {
        return Err(SettingsError::InvalidValue(
            "bus.dedupCapacity must be at least 1".into(),
        ));
    }
    if settings.server.send_queue_capacity == 0 {
        return Err(SettingsError::InvalidValue(
            "server.sendQueueCapacity must be at least 1".into(),
        ));
    }
    Ok(())
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are ignored with a warning and the file/default value is kept.
pub fn apply_env_overrides(settings: &mut ParleySettings) {
    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read_env_string("PARLEY_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_u16("PARLEY_PORT", 0, 65535) {
        settings.server.port = v;
    }

    // ── Node / backends ─────────────────────────────────────────────
    if let Some(v) = read_env_string("PARLEY_PROCESS_ID") {
        settings.node.process_id = Some(v);
    }
    if let Some(v) = read_env_string("PARLEY_REDIS_URL") {
        settings.redis.url = Some(v);
    }
    if let Some(v) = read_env_string("PARLEY_DB_PATH") {
        settings.store.path = v;
    }

    // ── Bus / history ───────────────────────────────────────────────
    if let Some(v) = read_env_u64("PARLEY_DEDUP_RETENTION_MS", 1_000, 3_600_000) {
        settings.bus.dedup_retention_ms = v;
    }
    if let Some(v) = read_env_usize("PARLEY_DEDUP_CAPACITY", 1, 10_000_000) {
        settings.bus.dedup_capacity = v;
    }
    if let Some(v) = read_env_u32("PARLEY_HISTORY_MAX_LIMIT", 1, 10_000) {
        settings.history.max_limit = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read_env_string("PARLEY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_bool("PARLEY_LOG_JSON") {
        settings.logging.json = v;
    }
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

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u32` within a range.
pub fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    let n: u32 = val.parse().ok()?;
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

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn read_env_u32(name: &str, min: u32, max: u32) -> Option<u32> {
    let val = std::env::var(name).ok()?;
    let result = parse_u32_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid u32 env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
