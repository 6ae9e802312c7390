//! Step metadata extraction.
//!
//! Some counters arrive only in provider-specific step metadata and are
//! scoped to that step. These helpers lift them into [`TokenUsage`].

use serde_json::Value;
use strand_core::usage::TokenUsage;

/// Cache-creation token count reported in a step's provider metadata.
///
/// Reads `anthropic.cacheCreationInputTokens` (or the snake_case form).
pub fn cache_creation_tokens(provider_metadata: &Value) -> Option<u64> {
    let anthropic = provider_metadata.get("anthropic")?;
    anthropic
        .get("cacheCreationInputTokens")
        .or_else(|| anthropic.get("cache_creation_input_tokens"))
        .and_then(Value::as_u64)
}

/// Step usage with metadata-only counters filled in.
///
/// A non-zero counter already on `usage` wins over the metadata value.
pub fn step_usage(usage: TokenUsage, provider_metadata: Option<&Value>) -> TokenUsage {
    let mut usage = usage;
    if usage.cache_creation_tokens == 0
        && let Some(created) = provider_metadata.and_then(cache_creation_tokens)
    {
        usage.cache_creation_tokens = created;
    }
    usage
}

/// Sum cache-creation counts across a provider's step list.
pub fn total_cache_creation(steps: &[Value]) -> u64 {
    steps
        .iter()
        .filter_map(|step| {
            let meta = step.get("providerMetadata").unwrap_or(step);
            cache_creation_tokens(meta)
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_camel_and_snake_case() {
        let camel = json!({"anthropic": {"cacheCreationInputTokens": 120}});
        let snake = json!({"anthropic": {"cache_creation_input_tokens": 7}});
        assert_eq!(cache_creation_tokens(&camel), Some(120));
        assert_eq!(cache_creation_tokens(&snake), Some(7));
        assert_eq!(cache_creation_tokens(&json!({"openai": {}})), None);
    }

    #[test]
    fn step_usage_fills_missing_counter_only() {
        let meta = json!({"anthropic": {"cacheCreationInputTokens": 50}});
        let filled = step_usage(TokenUsage::new(10, 5), Some(&meta));
        assert_eq!(filled.cache_creation_tokens, 50);

        let mut reported = TokenUsage::new(10, 5);
        reported.cache_creation_tokens = 3;
        assert_eq!(step_usage(reported, Some(&meta)).cache_creation_tokens, 3);
        assert_eq!(step_usage(TokenUsage::new(1, 1), None).cache_creation_tokens, 0);
    }

    #[test]
    fn total_sums_every_step() {
        let steps = vec![
            json!({"providerMetadata": {"anthropic": {"cacheCreationInputTokens": 100}}}),
            json!({"anthropic": {"cacheCreationInputTokens": 20}}),
            json!({"providerMetadata": {}}),
        ];
        assert_eq!(total_cache_creation(&steps), 120);
    }
}
