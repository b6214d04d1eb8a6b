//! Answer evaluation with a web-search fallback round.
//!
//! The evaluator asks a judge model to score an answer against its context.
//! When the verdict is weak it runs exactly one fallback round:
//!
//! ```text
//! InitialEval ──(good)──────────────────────────────────────────▶ Done
//!      │
//!      └─(score < 0.7 or hallucination_risk > 0.3)─▶ FallbackSearch
//!                                                       │
//!                                   Regenerate ◀────────┘
//!                                       │
//!                                    ReEval ──────────────────────▶ Done
//! ```
//!
//! The regenerated answer is returned even when its own verdict is weak.
//! Judge failures never propagate: they become a fixed low-quality verdict.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use sift_core::{parse_verdict, EvaluatorConfig, JudgeVerdict, TokenCounter, TokenUsage};

use crate::cache::{VerdictCache, VerdictKey};
use crate::prompts;
use crate::providers::{ChatMessage, CompletionConfig, LlmProvider, ProviderError};
use crate::search::FallbackSearch;

/// Default acceptance threshold for [`ResultEvaluator::evaluate`].
pub const DEFAULT_THRESHOLD: f64 = 0.7;

/// Below this score the fallback round runs.
pub const FALLBACK_MIN_SCORE: f64 = 0.7;

/// Above this hallucination risk the fallback round runs.
pub const FALLBACK_MAX_HALLUCINATION_RISK: f64 = 0.3;

const FAILED_EVALUATION_ISSUE: &str = "Evaluation failed, no valid verdict was produced";

/// Judge verdict plus the usage it cost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub score: f64,
    pub hallucination_risk: f64,
    pub confidence: f64,
    pub issues: Vec<String>,
    #[serde(default)]
    pub token_usage: TokenUsage,
}

impl Evaluation {
    /// The fixed verdict for an evaluation that could not be completed.
    pub fn failed(issue: impl Into<String>) -> Self {
        Self {
            score: 0.1,
            hallucination_risk: 0.9,
            confidence: 0.1,
            issues: vec![issue.into()],
            token_usage: TokenUsage::default(),
        }
    }

    fn from_verdict(verdict: JudgeVerdict, token_usage: TokenUsage) -> Self {
        Self {
            score: verdict.score,
            hallucination_risk: verdict.hallucination_risk,
            confidence: verdict.confidence,
            issues: verdict.issues,
            token_usage,
        }
    }

    /// Whether this verdict triggers the fallback round.
    pub fn needs_fallback(&self) -> bool {
        self.score < FALLBACK_MIN_SCORE || self.hallucination_risk > FALLBACK_MAX_HALLUCINATION_RISK
    }
}

/// Result of [`AnswerEvaluator::evaluate_with_fallback`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackOutcome {
    /// The original answer, or the regenerated one after a fallback round
    pub answer: String,

    /// Verdict on `answer`
    pub evaluation: Evaluation,

    pub used_fallback: bool,

    /// URLs of the search hits used for regeneration
    pub web_sources: Vec<String>,

    /// Usage summed over every judge and regeneration call
    #[serde(default)]
    pub token_usage: TokenUsage,
}

impl FallbackOutcome {
    /// Keeps `token_usage` so calls made before the failure are still billed.
    fn degraded(answer: &str, error: &dyn std::fmt::Display, token_usage: TokenUsage) -> Self {
        Self {
            answer: answer.to_string(),
            evaluation: Evaluation::failed(format!("Evaluation error: {error}")),
            used_fallback: false,
            web_sources: Vec::new(),
            token_usage,
        }
    }
}

/// Errors an evaluator may surface to the pipeline.
#[derive(Error, Debug)]
pub enum EvaluationError {
    #[error("Judge unavailable: {0}")]
    Unavailable(String),

    #[error("Evaluation cancelled")]
    Cancelled,
}

/// Scores an answer and, when it is weak, tries to improve it.
#[async_trait]
pub trait AnswerEvaluator: Send + Sync {
    async fn evaluate_with_fallback(
        &self,
        answer: &str,
        query: &str,
        context: Option<&[String]>,
    ) -> Result<FallbackOutcome, EvaluationError>;

    /// Model billed for evaluation usage.
    fn model(&self) -> &str;
}

/// Default [`AnswerEvaluator`] backed by a judge model and a web search.
pub struct ResultEvaluator {
    provider: Arc<dyn LlmProvider>,
    search: Arc<dyn FallbackSearch>,
    counter: Arc<TokenCounter>,
    config: EvaluatorConfig,
    completion: CompletionConfig,
    cache: Option<VerdictCache>,
}

impl ResultEvaluator {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        search: Arc<dyn FallbackSearch>,
        counter: Arc<TokenCounter>,
        config: EvaluatorConfig,
    ) -> Self {
        let cache = config
            .cache_verdicts
            .then(|| VerdictCache::new(config.cache_capacity));
        Self {
            provider,
            search,
            counter,
            completion: CompletionConfig::for_judge(&config),
            config,
            cache,
        }
    }

    /// Judge `answer` against `context`.
    ///
    /// Context passages are admitted in order while their cumulative token
    /// count fits the configured limit. `threshold` only affects logging;
    /// the verdict is returned either way.
    pub async fn evaluate(&self, answer: &str, context: &[String], threshold: f64) -> Evaluation {
        let context = self.truncate_context(context);

        let key = VerdictKey::new(answer, &context);
        if let Some(cache) = &self.cache {
            if let Some(verdict) = cache.get(&key).await {
                tracing::debug!(score = verdict.score, "Verdict cache hit");
                return Evaluation::from_verdict(verdict, TokenUsage::default());
            }
        }

        let user_prompt = prompts::judge_user_prompt(answer, &context);
        let reply = self
            .call_llm(prompts::JUDGE_SYSTEM_PROMPT, &user_prompt)
            .await;
        let (content, usage) = match reply {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "Judge call failed");
                return Evaluation::failed(FAILED_EVALUATION_ISSUE);
            }
        };

        let verdict = match parse_verdict(&content) {
            Ok(verdict) => verdict,
            Err(e) => {
                tracing::warn!(error = %e, raw = %content, "Judge verdict rejected");
                return Evaluation::failed(FAILED_EVALUATION_ISSUE);
            }
        };

        if verdict.score < threshold {
            tracing::debug!(score = verdict.score, threshold, "Answer below threshold");
        }

        if let Some(cache) = &self.cache {
            cache.insert(key, verdict.clone()).await;
        }

        Evaluation::from_verdict(verdict, usage)
    }

    /// Keep leading passages while their cumulative token count fits.
    fn truncate_context(&self, context: &[String]) -> Vec<String> {
        let limit = u64::from(self.config.context_token_limit);
        let mut used = 0u64;
        let mut kept = Vec::new();

        for passage in context {
            let tokens = u64::from(self.counter.count(passage, &self.config.judge_model));
            if used + tokens > limit {
                tracing::debug!(
                    kept = kept.len(),
                    dropped = context.len() - kept.len(),
                    "Judge context truncated"
                );
                break;
            }
            used += tokens;
            kept.push(passage.clone());
        }

        kept
    }

    /// One judge-model call. Usage falls back to a local count when the
    /// provider reports none.
    async fn call_llm(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<(String, TokenUsage), ProviderError> {
        let response = self
            .provider
            .complete(
                vec![ChatMessage::system(system_prompt), ChatMessage::user(user_prompt)],
                &self.completion,
            )
            .await?;

        let usage = if response.usage.is_empty() {
            let model = &self.config.judge_model;
            let mut prompt = String::with_capacity(system_prompt.len() + user_prompt.len());
            prompt.push_str(system_prompt);
            prompt.push_str(user_prompt);
            TokenUsage::new(
                self.counter.count(&prompt, model),
                self.counter.count(&response.content, model),
            )
        } else {
            response.usage
        };

        Ok((response.content, usage))
    }

    async fn fallback_round(
        &self,
        query: &str,
        mut context: Vec<String>,
        mut token_usage: TokenUsage,
    ) -> Result<FallbackOutcome, ProviderError> {
        let hits = self
            .search
            .search(
                query,
                self.config.fallback_max_results,
                self.config.fallback_min_relevance,
            )
            .await;
        let web_sources: Vec<String> = hits.iter().filter_map(|hit| hit.url.clone()).collect();
        context.extend(hits.into_iter().map(|hit| hit.content));

        let user_prompt = prompts::regenerate_user_prompt(query, &context);
        let (answer, regen_usage) = self
            .call_llm(prompts::REGENERATE_SYSTEM_PROMPT, &user_prompt)
            .await?;
        token_usage += regen_usage;

        let evaluation = self.evaluate(&answer, &context, DEFAULT_THRESHOLD).await;
        token_usage += evaluation.token_usage;

        tracing::info!(
            sources = web_sources.len(),
            score = evaluation.score,
            "Answer regenerated with web context"
        );

        Ok(FallbackOutcome {
            answer,
            evaluation,
            used_fallback: true,
            web_sources,
            token_usage,
        })
    }
}

#[async_trait]
impl AnswerEvaluator for ResultEvaluator {
    async fn evaluate_with_fallback(
        &self,
        answer: &str,
        query: &str,
        context: Option<&[String]>,
    ) -> Result<FallbackOutcome, EvaluationError> {
        let context = context.map(<[String]>::to_vec).unwrap_or_default();

        let first = self.evaluate(answer, &context, DEFAULT_THRESHOLD).await;
        if !first.needs_fallback() {
            let token_usage = first.token_usage;
            return Ok(FallbackOutcome {
                answer: answer.to_string(),
                evaluation: first,
                used_fallback: false,
                web_sources: Vec::new(),
                token_usage,
            });
        }

        tracing::info!(
            score = first.score,
            hallucination_risk = first.hallucination_risk,
            "Answer below quality bar, running fallback search"
        );

        let spent = first.token_usage;
        match self.fallback_round(query, context, spent).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                tracing::warn!(error = %e, "Fallback round failed, keeping original answer");
                Ok(FallbackOutcome::degraded(answer, &e, spent))
            }
        }
    }

    fn model(&self) -> &str {
        &self.config.judge_model
    }
}
