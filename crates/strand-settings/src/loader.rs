//! Settings loading: defaults → user file → environment.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::errors::{Result, SettingsError};
use crate::types::StrandSettings;

/// Directory holding strand's user-level state (`~/.strand`).
pub fn strand_home() -> PathBuf {
    std::env::var_os("STRAND_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".strand")))
        .unwrap_or_else(|| PathBuf::from(".strand"))
}

/// Default settings file path (`~/.strand/settings.json`).
pub fn settings_path() -> PathBuf {
    strand_home().join("settings.json")
}

/// Recursively merge `overlay` into `base`. Objects merge key by key;
/// every other value in `overlay` replaces the one in `base`.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_val) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_val) => deep_merge(base_val, overlay_val),
                    None => overlay_val,
                };
                let _ = base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (_, overlay) => overlay,
    }
}

/// Load settings from the default path.
pub fn load_settings() -> Result<StrandSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from `path`. A missing file yields defaults (plus env
/// overrides); an unreadable or malformed file is an error.
pub fn load_settings_from_path(path: &Path) -> Result<StrandSettings> {
    let defaults = serde_json::to_value(StrandSettings::default())?;
    let merged = match std::fs::read_to_string(path) {
        Ok(raw) => {
            let user: Value = serde_json::from_str(&raw)?;
            deep_merge(defaults, user)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => defaults,
        Err(source) => {
            return Err(SettingsError::Io {
                path: path.display().to_string(),
                source,
            });
        }
    };
    let mut settings: StrandSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings, |var| std::env::var(var).ok())?;
    settings.validate();
    Ok(settings)
}

fn parse_env<T: std::str::FromStr>(var: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| SettingsError::InvalidEnv {
        var: var.to_owned(),
        value: value.to_owned(),
    })
}

/// Apply `STRAND_*` overrides using `lookup` to read variables.
pub fn apply_env_overrides(
    settings: &mut StrandSettings,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    if let Some(v) = lookup("STRAND_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = lookup("STRAND_LOG_JSON") {
        settings.logging.json = parse_env("STRAND_LOG_JSON", &v)?;
    }
    if let Some(v) = lookup("STRAND_PARTIAL_WRITE_INTERVAL_MS") {
        settings.engine.partial_write_interval_ms =
            parse_env("STRAND_PARTIAL_WRITE_INTERVAL_MS", &v)?;
    }
    if let Some(v) = lookup("STRAND_METADATA_TIMEOUT_MS") {
        settings.engine.metadata_timeout_ms = parse_env("STRAND_METADATA_TIMEOUT_MS", &v)?;
    }
    if let Some(v) = lookup("STRAND_MAX_STEPS") {
        settings.engine.max_steps = parse_env("STRAND_MAX_STEPS", &v)?;
    }
    if let Some(v) = lookup("STRAND_SCRATCH_ROOT") {
        settings.engine.scratch_root = Some(v);
    }
    if let Some(v) = lookup("STRAND_HISTORY_ROOT") {
        settings.history.root = Some(v);
    }
    Ok(())
}
