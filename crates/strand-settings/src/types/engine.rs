use serde::{Deserialize, Serialize};

/// Session engine tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSettings {
    /// Minimum spacing between throttled partial writes.
    pub partial_write_interval_ms: u64,
    /// Orphan tool results logged at `warn` per session before dropping to `debug`.
    pub orphan_warning_cap: u32,
    /// Timeout for each provider usage/metadata fetch during finalization.
    pub metadata_timeout_ms: u64,
    /// Step cap for one session. Large enough to be effectively unbounded.
    pub max_steps: u32,
    /// Tools that block on user input; their invocation is flushed immediately.
    pub blocking_tools: Vec<String>,
    /// Scratch directory root. `None` = `~/.strand/scratch`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scratch_root: Option<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            partial_write_interval_ms: 500,
            orphan_warning_cap: 3,
            metadata_timeout_ms: 1_000,
            max_steps: 100_000,
            blocking_tools: vec!["ask_user_question".into(), "propose_plan".into()],
            scratch_root: None,
        }
    }
}
