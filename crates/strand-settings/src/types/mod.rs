//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` to match the JSON
//! settings file. Each type implements [`Default`] with production default
//! values, and `#[serde(default)]` lets a partial file fill in the rest.

mod engine;

pub use engine::*;

use serde::{Deserialize, Serialize};

/// Root settings type.
///
/// Loaded from `~/.strand/settings.json` with defaults applied for missing
/// fields. Environment variables can override specific values.
///
/// # JSON Format
///
/// ```json
/// {
///   "engine": { "partialWriteIntervalMs": 250 },
///   "logging": { "level": "debug" }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StrandSettings {
    /// Settings schema version.
    pub version: String,
    /// Session engine tuning.
    pub engine: EngineSettings,
    /// History persistence.
    pub history: HistorySettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl Default for StrandSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            engine: EngineSettings::default(),
            history: HistorySettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl StrandSettings {
    /// Correct out-of-range values in place.
    ///
    /// Called automatically during loading. Invalid values are replaced with
    /// a warning rather than rejected.
    pub fn validate(&mut self) {
        let engine = &mut self.engine;
        if engine.partial_write_interval_ms == 0 {
            tracing::warn!("partialWriteIntervalMs must be positive, using 1");
            engine.partial_write_interval_ms = 1;
        }
        if engine.metadata_timeout_ms == 0 {
            tracing::warn!("metadataTimeoutMs must be positive, using default");
            engine.metadata_timeout_ms = EngineSettings::default().metadata_timeout_ms;
        }
        if engine.max_steps == 0 {
            tracing::warn!("maxSteps must be positive, using 1");
            engine.max_steps = 1;
        }
        if self.logging.level.trim().is_empty() {
            tracing::warn!("empty logging.level, using info");
            self.logging.level = "info".into();
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Filter directive (e.g. `info`, `strand_runtime=debug`).
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

/// History store settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HistorySettings {
    /// Root directory of the file history store. `None` = `~/.strand/sessions`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
}
