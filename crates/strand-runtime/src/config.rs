//! Engine configuration derived from settings.

use std::time::Duration;

use strand_settings::{EngineSettings, StrandSettings};

/// Tunables the session engine reads at runtime.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Minimum spacing between throttled partial writes.
    pub partial_write_interval: Duration,
    /// Orphan tool results logged at `warn` per session.
    pub orphan_warning_cap: u32,
    /// Guard on each provider usage/metadata fetch.
    pub metadata_timeout: Duration,
    /// Step cap per session.
    pub max_steps: u32,
    /// Tools whose invocation is flushed immediately.
    pub blocking_tools: Vec<String>,
}

impl EngineConfig {
    /// Build from loaded settings.
    pub fn from_settings(settings: &StrandSettings) -> Self {
        Self::from_engine(&settings.engine)
    }

    fn from_engine(engine: &EngineSettings) -> Self {
        Self {
            partial_write_interval: Duration::from_millis(engine.partial_write_interval_ms.max(1)),
            orphan_warning_cap: engine.orphan_warning_cap,
            metadata_timeout: Duration::from_millis(engine.metadata_timeout_ms.max(1)),
            max_steps: engine.max_steps.max(1),
            blocking_tools: engine.blocking_tools.clone(),
        }
    }

    /// Whether `tool` blocks on user input.
    pub fn is_blocking_tool(&self, tool: &str) -> bool {
        self.blocking_tools.iter().any(|t| t == tool)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_engine(&EngineSettings::default())
    }
}
