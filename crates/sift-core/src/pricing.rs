//! Model pricing and cost calculation.
//!
//! Prices are USD per million tokens. Costs are rounded to 6 decimal places.
//! Cost calculation never fails: an unknown model is billed at the default
//! tier, and an unusable price yields `0.0` with a warning.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::TokenUsage;

/// Tier used when the configured default model is missing from the table.
const BUILTIN_DEFAULT_PRICE: ModelPrice = ModelPrice {
    input: 1.10,
    output: 4.40,
};

/// Price of one model, USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    pub input: f64,
    pub output: f64,
}

impl ModelPrice {
    pub fn new(input: f64, output: f64) -> Self {
        Self { input, output }
    }

    fn is_valid(&self) -> bool {
        self.input.is_finite() && self.output.is_finite() && self.input >= 0.0 && self.output >= 0.0
    }
}

/// Per-model pricing with a designated default tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingTable {
    pub models: BTreeMap<String, ModelPrice>,

    /// Model whose price applies to unknown models
    pub default_model: String,
}

impl Default for PricingTable {
    fn default() -> Self {
        let models = [
            ("gpt-4", ModelPrice::new(15.0, 60.0)),
            ("gpt-4o", ModelPrice::new(15.0, 60.0)),
            ("o1", ModelPrice::new(15.0, 60.0)),
            ("o3-mini", ModelPrice::new(1.10, 4.40)),
            ("text-embedding-3-large", ModelPrice::new(1.10, 1.10)),
        ]
        .into_iter()
        .map(|(name, price)| (name.to_string(), price))
        .collect();

        Self {
            models,
            default_model: "o3-mini".to_string(),
        }
    }
}

impl PricingTable {
    /// Price for a model, falling back to the default tier.
    pub fn price_for(&self, model: &str) -> ModelPrice {
        if let Some(price) = self.models.get(model) {
            return *price;
        }

        tracing::debug!(
            model,
            default = %self.default_model,
            "Unknown model, using default pricing"
        );
        self.models
            .get(&self.default_model)
            .copied()
            .unwrap_or(BUILTIN_DEFAULT_PRICE)
    }

    /// Cost in USD for the given token counts.
    pub fn calculate_cost(&self, prompt_tokens: u32, completion_tokens: u32, model: &str) -> f64 {
        let price = self.price_for(model);
        if !price.is_valid() {
            tracing::warn!(model, ?price, "Invalid model price, recording zero cost");
            return 0.0;
        }

        let input_cost = (f64::from(prompt_tokens) / 1_000_000.0) * price.input;
        let output_cost = (f64::from(completion_tokens) / 1_000_000.0) * price.output;
        let cost = input_cost + output_cost;

        if !cost.is_finite() {
            tracing::warn!(model, "Cost calculation overflowed, recording zero cost");
            return 0.0;
        }

        round_cost(cost)
    }

    /// Names of entries with unusable prices.
    pub fn invalid_entries(&self) -> Vec<&str> {
        self.models
            .iter()
            .filter(|(_, price)| !price.is_valid())
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

fn round_cost(cost: f64) -> f64 {
    (cost * 1_000_000.0).round() / 1_000_000.0
}

/// Share of a task's tokens attributed to the prompt side.
///
/// Chat-style tasks are completion heavy; retrieval-style tasks are prompt
/// heavy. Everything else splits evenly.
pub fn prompt_ratio(task_type: &str) -> f64 {
    match task_type {
        "chat" | "completion" => 0.3,
        "embedding" | "search" => 0.8,
        _ => 0.5,
    }
}

/// Split a locally counted total into prompt and completion tokens.
pub fn split_usage(total_tokens: u32, task_type: &str) -> TokenUsage {
    // floor keeps prompt + completion == total
    let prompt = (f64::from(total_tokens) * prompt_ratio(task_type)).floor() as u32;
    TokenUsage::new(prompt, total_tokens - prompt)
}
