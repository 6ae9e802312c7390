//! Provider-specific option adjustments applied before a call.

use tracing::debug;

use crate::request::{StreamOptions, ThinkingLevel};

/// Anthropic rejects extended thinking combined with a forced tool choice.
/// Turns thinking off in that case. Returns `true` if anything changed.
pub fn apply_provider_compat(provider: &str, options: &mut StreamOptions) -> bool {
    if provider == "anthropic"
        && options.tool_choice.is_forced()
        && options.thinking != ThinkingLevel::Off
    {
        debug!(
            provider,
            thinking = ?options.thinking,
            "forced tool choice, disabling extended thinking"
        );
        options.thinking = ThinkingLevel::Off;
        return true;
    }
    false
}
