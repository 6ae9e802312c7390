//! # strand-settings
//!
//! Configuration management with layered sources for the strand session engine.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`StrandSettings::default()`]
//! 2. **User file**: `~/.strand/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `STRAND_*` overrides (highest priority)
//!
//! The global snapshot is reloadable: [`reload_settings_from_path`] swaps the
//! cached value so all subsequent [`get_settings`] calls return fresh data,
//! while callers holding an older `Arc` keep a consistent view.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path,
    strand_home,
};
pub use types::*;

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;

/// Global settings snapshot.
static SETTINGS: RwLock<Option<Arc<StrandSettings>>> = RwLock::new(None);

/// Get the global settings instance.
///
/// On first call, loads settings from `~/.strand/settings.json` with env var
/// overrides. If loading fails, returns compiled defaults.
pub fn get_settings() -> Arc<StrandSettings> {
    if let Some(s) = SETTINGS.read().as_ref() {
        return Arc::clone(s);
    }

    let mut guard = SETTINGS.write();
    // Another thread may have initialized while we waited for the write lock.
    if let Some(s) = guard.as_ref() {
        return Arc::clone(s);
    }

    let settings = Arc::new(load_settings().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load settings, using defaults");
        StrandSettings::default()
    }));
    *guard = Some(Arc::clone(&settings));
    settings
}

/// Replace the global settings with a specific value.
pub fn init_settings(settings: StrandSettings) {
    *SETTINGS.write() = Some(Arc::new(settings));
}

/// Reload settings from `path` and swap the global snapshot.
///
/// Falls back to defaults when the file cannot be loaded.
pub fn reload_settings_from_path(path: &Path) {
    let new = Arc::new(load_settings_from_path(path).unwrap_or_else(|e| {
        tracing::warn!(error = %e, ?path, "failed to reload settings, falling back to defaults");
        StrandSettings::default()
    }));
    *SETTINGS.write() = Some(new);
    tracing::info!(?path, "settings reloaded from disk");
}

#[cfg(test)]
pub(crate) fn reset_settings() {
    *SETTINGS.write() = None;
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
