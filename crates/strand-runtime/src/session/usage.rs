//! Usage aggregation across the steps of one session.

use serde_json::Value;
use strand_core::usage::TokenUsage;
use strand_llm::metadata;

use crate::pricing::calculate_cost;

/// Result of recording one step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepUsage {
    /// 1-based step number.
    pub step: u32,
    /// This step's usage.
    pub usage: TokenUsage,
    /// Sum over all steps so far.
    pub cumulative: TokenUsage,
    /// Summed cost, when the model is priced.
    pub cumulative_cost: Option<f64>,
}

/// Final usage figures for a session.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FinalUsage {
    /// Billing total.
    pub usage: TokenUsage,
    /// Last step's usage (current context size).
    pub context_usage: Option<TokenUsage>,
    /// Cost in USD, when the model is priced.
    pub cost: Option<f64>,
}

/// Per-session usage accumulator.
///
/// Keeps a cumulative sum for billing and the last step's figures for
/// context size. The session's own snapshots are authoritative whenever the
/// provider's totals are missing, zero, or reflect only a retried sub-call.
#[derive(Clone, Debug)]
pub struct UsageAggregator {
    model: String,
    steps: u32,
    cumulative: TokenUsage,
    last_step: Option<TokenUsage>,
    cumulative_cost: Option<f64>,
    retried: bool,
}

impl UsageAggregator {
    /// Aggregator pricing steps for `model`.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            steps: 0,
            cumulative: TokenUsage::default(),
            last_step: None,
            cumulative_cost: None,
            retried: false,
        }
    }

    /// Record a step boundary.
    pub fn record_step(&mut self, usage: TokenUsage, provider_metadata: Option<&Value>) -> StepUsage {
        let usage = metadata::step_usage(usage, provider_metadata);
        self.steps += 1;
        self.cumulative += usage;
        self.last_step = Some(usage);
        if let Some(cost) = calculate_cost(&self.model, &usage) {
            self.cumulative_cost = Some(self.cumulative_cost.unwrap_or(0.0) + cost);
        }
        StepUsage {
            step: self.steps,
            usage,
            cumulative: self.cumulative,
            cumulative_cost: self.cumulative_cost,
        }
    }

    /// Note that the provider call was restarted.
    pub fn mark_retried(&mut self) {
        self.retried = true;
    }

    /// Whether the provider call was restarted.
    pub fn retried(&self) -> bool {
        self.retried
    }

    /// Steps recorded.
    pub fn steps(&self) -> u32 {
        self.steps
    }

    /// Sum over all steps.
    pub fn cumulative(&self) -> TokenUsage {
        self.cumulative
    }

    /// Last step's usage.
    pub fn last_step(&self) -> Option<TokenUsage> {
        self.last_step
    }

    /// Summed cost.
    pub fn cumulative_cost(&self) -> Option<f64> {
        self.cumulative_cost
    }

    /// Figures from the session's own snapshots only.
    pub fn snapshot(&self) -> FinalUsage {
        FinalUsage {
            usage: self.cumulative,
            context_usage: self.last_step,
            cost: self.cumulative_cost,
        }
    }

    /// Reconcile with the provider's own total at clean completion.
    ///
    /// The provider total is used only when the call was never restarted and
    /// the total is non-zero. Step-scoped counters (cache creation) are
    /// always taken from the session's sum, or from `provider_steps` when
    /// that sum is larger.
    pub fn resolve(&self, provider_total: Option<TokenUsage>, provider_steps: &[Value]) -> FinalUsage {
        let total = match provider_total {
            Some(total) if !self.retried && !total.is_zero() => total,
            _ => return self.snapshot(),
        };
        let mut usage = total;
        usage.cache_creation_tokens = self
            .cumulative
            .cache_creation_tokens
            .max(metadata::total_cache_creation(provider_steps));
        let cost = if usage == self.cumulative {
            self.cumulative_cost
        } else {
            calculate_cost(&self.model, &usage)
        };
        FinalUsage {
            usage,
            context_usage: self.last_step,
            cost,
        }
    }
}
