//! Cost tracking for model calls.
//!
//! Every billable step of the pipeline reports here. Usage is re-estimated
//! from the produced text, priced, appended to the ledger and folded into a
//! running [`UsageSummary`]. Nothing in this path returns an error: a failed
//! ledger write is logged and the pipeline carries on.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use sift_core::{split_usage, PricingTable, TokenCounter, TokenUsage, UsageRecord};

use super::ledger::UsageLedger;

/// Accumulated usage across tracked calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    /// Number of tracked calls
    pub records: u32,

    pub prompt_tokens: u64,

    pub completion_tokens: u64,

    pub total_tokens: u64,

    /// Cost in USD
    pub cost: f64,

    /// Ledger writes that failed
    pub ledger_failures: u32,
}

impl UsageSummary {
    fn add(&mut self, usage: &TokenUsage, cost: f64) {
        self.records += 1;
        self.prompt_tokens += u64::from(usage.prompt_tokens);
        self.completion_tokens += u64::from(usage.completion_tokens);
        self.total_tokens += u64::from(usage.total_tokens);
        self.cost += cost;
    }
}

pub struct CostTracker {
    counter: Arc<TokenCounter>,
    pricing: PricingTable,
    ledger: UsageLedger,
    summary: RwLock<UsageSummary>,
}

impl CostTracker {
    pub fn new(counter: Arc<TokenCounter>, pricing: PricingTable, ledger: UsageLedger) -> Self {
        Self {
            counter,
            pricing,
            ledger,
            summary: RwLock::new(UsageSummary::default()),
        }
    }

    /// Cost in USD for a prompt/completion split on `model`. Never fails.
    pub fn calculate_cost(&self, prompt_tokens: u32, completion_tokens: u32, model: &str) -> f64 {
        self.pricing
            .calculate_cost(prompt_tokens, completion_tokens, model)
    }

    pub fn ledger(&self) -> &UsageLedger {
        &self.ledger
    }

    /// Record usage for one piece of model output.
    ///
    /// The token total is recounted from `content`; `token_usage` is only
    /// consulted when the recount is zero. The total is split into prompt and
    /// completion by the ratio for `task_type` and priced for `model`.
    ///
    /// Returns the written record, or `None` when the ledger write failed.
    pub async fn track_usage(
        &self,
        content: &str,
        token_usage: Option<&TokenUsage>,
        model: &str,
        session_id: &str,
        task_type: &str,
        thinking_time: Option<f64>,
    ) -> Option<UsageRecord> {
        let mut total = self.counter.count(content, model);
        if total == 0 {
            total = token_usage.map(|u| u.total_tokens).unwrap_or(0);
        }

        let mut usage = split_usage(total, task_type);
        usage.reasoning_tokens = token_usage.and_then(|u| u.reasoning_tokens);
        let cost = self.calculate_cost(usage.prompt_tokens, usage.completion_tokens, model);

        self.summary.write().add(&usage, cost);

        let record = UsageRecord {
            timestamp: Utc::now(),
            session_id: session_id.to_string(),
            model: model.to_string(),
            task_type: task_type.to_string(),
            token_usage: usage,
            cost,
            thinking_time: thinking_time.unwrap_or(0.0),
            content: content.to_string(),
        };

        match self.ledger.append(record).await {
            Ok(written) => {
                tracing::debug!(
                    session_id = %session_id,
                    task_type = %task_type,
                    model = %model,
                    total_tokens = total,
                    cost,
                    "Usage recorded"
                );
                Some(written)
            }
            Err(e) => {
                self.summary.write().ledger_failures += 1;
                tracing::warn!(
                    session_id = %session_id,
                    task_type = %task_type,
                    error = %e,
                    "Failed to write usage record"
                );
                None
            }
        }
    }

    /// Usage accumulated since creation or the last reset.
    pub fn summary(&self) -> UsageSummary {
        self.summary.read().clone()
    }

    pub fn reset_summary(&self) {
        *self.summary.write() = UsageSummary::default();
    }
}
