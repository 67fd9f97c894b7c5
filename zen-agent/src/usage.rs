//! Token usage accounting and per-model pricing.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Token usage reported by a model call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    /// Number of tokens in the prompt.
    pub prompt_tokens: u32,
    /// Number of tokens in the completion.
    pub completion_tokens: u32,
    /// Total token count.
    pub total_tokens: u32,
}

impl TokenUsage {
    /// Create new token usage with specified counts.
    #[must_use]
    pub const fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

impl std::ops::Add for TokenUsage {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            prompt_tokens: self.prompt_tokens + rhs.prompt_tokens,
            completion_tokens: self.completion_tokens + rhs.completion_tokens,
            total_tokens: self.total_tokens + rhs.total_tokens,
        }
    }
}

impl std::ops::AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.prompt_tokens += rhs.prompt_tokens;
        self.completion_tokens += rhs.completion_tokens;
        self.total_tokens += rhs.total_tokens;
    }
}

/// USD price per 1k tokens for one model.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelRate {
    /// Dollars per 1k prompt tokens.
    pub input_per_1k: f64,
    /// Dollars per 1k completion tokens.
    pub output_per_1k: f64,
}

/// Per-model price table used for cost accounting.
///
/// Unknown models cost nothing; the miss is logged at debug level so a
/// misconfigured table is visible without breaking the run.
#[derive(Debug, Clone, Default)]
pub struct CostTable {
    rates: HashMap<String, ModelRate>,
}

impl CostTable {
    /// Create an empty cost table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the rate for a model.
    #[must_use]
    pub fn with_rate(mut self, model: impl Into<String>, rate: ModelRate) -> Self {
        self.rates.insert(model.into(), rate);
        self
    }

    /// Get the rate for a model, if configured.
    #[must_use]
    pub fn rate(&self, model: &str) -> Option<ModelRate> {
        self.rates.get(model).copied()
    }

    /// Cost in USD of one call's usage under this table.
    #[must_use]
    pub fn cost_of(&self, model: &str, usage: TokenUsage) -> f64 {
        let Some(rate) = self.rates.get(model) else {
            tracing::debug!(model, "no rate configured, counting zero cost");
            return 0.0;
        };
        f64::from(usage.prompt_tokens) / 1000.0 * rate.input_per_1k
            + f64::from(usage.completion_tokens) / 1000.0 * rate.output_per_1k
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_computes_total() {
        let usage = TokenUsage::new(100, 50);
        assert_eq!(usage.total_tokens, 150);
    }

    #[test]
    fn add_accumulates_all_fields() {
        let total = TokenUsage::new(100, 50) + TokenUsage::new(200, 100);
        assert_eq!(total.prompt_tokens, 300);
        assert_eq!(total.completion_tokens, 150);
        assert_eq!(total.total_tokens, 450);
    }

    #[test]
    fn add_assign_accumulates() {
        let mut usage = TokenUsage::default();
        usage += TokenUsage::new(10, 5);
        usage += TokenUsage::new(1, 2);
        assert_eq!(usage.total_tokens, 18);
    }

    #[test]
    fn cost_uses_configured_rate() {
        let table = CostTable::new().with_rate(
            "test-model",
            ModelRate { input_per_1k: 1.0, output_per_1k: 2.0 },
        );
        let cost = table.cost_of("test-model", TokenUsage::new(1000, 500));
        assert!((cost - 2.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_model_costs_zero() {
        let table = CostTable::new();
        assert_eq!(table.cost_of("mystery", TokenUsage::new(1000, 1000)), 0.0);
    }
}
