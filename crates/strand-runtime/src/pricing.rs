//! Cost calculation: pricing tables and per-step cost computation.
//!
//! Pricing tiers are per-million tokens with cache multipliers.

use strand_core::usage::TokenUsage;

/// Pricing tier per million tokens.
struct PricingTier {
    input_per_million: f64,
    output_per_million: f64,
    cache_write_multiplier: f64,
    cache_read_multiplier: f64,
}

// ─── Anthropic ───────────────────────────────────────────────────────────────

const OPUS_4_5: PricingTier = PricingTier {
    input_per_million: 5.0,
    output_per_million: 25.0,
    cache_write_multiplier: 1.25,
    cache_read_multiplier: 0.1,
};

const OPUS_4: PricingTier = PricingTier {
    input_per_million: 15.0,
    output_per_million: 75.0,
    cache_write_multiplier: 1.25,
    cache_read_multiplier: 0.1,
};

const SONNET_4: PricingTier = PricingTier {
    input_per_million: 3.0,
    output_per_million: 15.0,
    cache_write_multiplier: 1.25,
    cache_read_multiplier: 0.1,
};

const HAIKU_4_5: PricingTier = PricingTier {
    input_per_million: 1.0,
    output_per_million: 5.0,
    cache_write_multiplier: 1.25,
    cache_read_multiplier: 0.1,
};

const HAIKU_3: PricingTier = PricingTier {
    input_per_million: 0.25,
    output_per_million: 1.25,
    cache_write_multiplier: 1.25,
    cache_read_multiplier: 0.1,
};

// ─── OpenAI ──────────────────────────────────────────────────────────────────

const GPT_5: PricingTier = PricingTier {
    input_per_million: 1.25,
    output_per_million: 10.0,
    cache_write_multiplier: 1.0,
    cache_read_multiplier: 0.1,
};

const GPT_5_MINI: PricingTier = PricingTier {
    input_per_million: 0.25,
    output_per_million: 2.0,
    cache_write_multiplier: 1.0,
    cache_read_multiplier: 0.1,
};

// ─── Google ──────────────────────────────────────────────────────────────────

const GEMINI_PRO: PricingTier = PricingTier {
    input_per_million: 1.25,
    output_per_million: 5.0,
    cache_write_multiplier: 1.0,
    cache_read_multiplier: 0.25,
};

const GEMINI_FLASH: PricingTier = PricingTier {
    input_per_million: 0.075,
    output_per_million: 0.3,
    cache_write_multiplier: 1.0,
    cache_read_multiplier: 0.25,
};

/// Look up the pricing tier for a model by family substring.
///
/// Returns `None` for unknown models (no implicit fallback pricing).
fn get_pricing_tier(model: &str) -> Option<&'static PricingTier> {
    let lower = model.to_lowercase();

    if lower.contains("opus-4-5") || lower.contains("opus-4.5") || lower.contains("opus-4-6") {
        return Some(&OPUS_4_5);
    }
    if lower.contains("opus") {
        return Some(&OPUS_4);
    }
    if lower.contains("sonnet") {
        return Some(&SONNET_4);
    }
    if lower.contains("haiku-4-5") || lower.contains("haiku-4.5") {
        return Some(&HAIKU_4_5);
    }
    if lower.contains("haiku") {
        return Some(&HAIKU_3);
    }
    if lower.contains("gpt-5-mini") || lower.contains("gpt-5-nano") {
        return Some(&GPT_5_MINI);
    }
    if lower.contains("gpt-5") {
        return Some(&GPT_5);
    }
    if lower.contains("gemini") && lower.contains("pro") {
        return Some(&GEMINI_PRO);
    }
    if lower.contains("gemini") {
        return Some(&GEMINI_FLASH);
    }

    None
}

/// Cost in USD of one step's usage, or `None` when pricing is unavailable.
///
/// `input_tokens` is uncached input; cache reads and writes are billed
/// separately at their multipliers.
pub fn calculate_cost(model: &str, usage: &TokenUsage) -> Option<f64> {
    let pricing = get_pricing_tier(model)?;
    let per_million = |tokens: u64| tokens as f64 / 1_000_000.0;

    let input_cost = per_million(usage.input_tokens) * pricing.input_per_million;
    let cache_write_cost = per_million(usage.cache_creation_tokens)
        * pricing.input_per_million
        * pricing.cache_write_multiplier;
    let cache_read_cost = per_million(usage.cache_read_tokens)
        * pricing.input_per_million
        * pricing.cache_read_multiplier;
    let output_cost = per_million(usage.output_tokens) * pricing.output_per_million;

    Some(input_cost + cache_write_cost + cache_read_cost + output_cost)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
