//! Workflow coordinator: the query pipeline.
//!
//! A query moves through six stages, strictly in order:
//!
//! 1. Validate the query
//! 2. Generate one sub-task per configured aspect
//! 3. Execute the sub-tasks through the [`ToolOrchestrator`]
//! 4. Synthesize an answer from the task results
//! 5. Evaluate the answer (with at most one fallback round)
//! 6. Persist the answer to the conversation store
//!
//! The first failing stage ends the run. [`WorkflowCoordinator::process_query`]
//! never returns an error: failures, panics and cancellations inside a stage
//! all become a [`WorkflowResult`] carrying a fixed user-facing message.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use sift_core::{
    sort_by_priority, ConversationStore, Message, Metadata, SiftConfig, StoreError, SubTask,
    TaskResult, TaskType, TokenCounter, TokenUsage,
};

use crate::accounting::{CostTracker, UsageLedger};
use crate::evaluator::{AnswerEvaluator, FallbackOutcome, ResultEvaluator};
use crate::orchestrator::{
    KnowledgeBase, LlmToolOrchestrator, OrchestratorError, SynthesizedResponse, ToolOrchestrator,
};
use crate::prompts;
use crate::providers::{CompletionConfig, LlmProvider};
use crate::search::FallbackSearch;

/// Default-model key for the tool agent.
const TASK_EXECUTION_TASK_TYPE: &str = "task_execution";

/// Task type used for synthesis cost records.
const RESPONSE_TASK_TYPE: &str = "response_generation";

/// Task type used for judge and regeneration cost records.
const EVALUATION_TASK_TYPE: &str = "evaluation";

/// Why a run failed. The display text is what ends up in `metadata.error`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkflowError {
    #[error("{0}")]
    Validation(String),

    #[error("task generation failed: {0}")]
    TaskGeneration(String),

    /// Verbatim output of a failed task, or the batch failure
    #[error("{0}")]
    UpstreamTask(String),

    #[error("response generation failed: {0}")]
    Synthesis(String),

    #[error("quality evaluation failed: {0}")]
    Evaluation(String),

    #[error("conversation save failed: {0}")]
    Persistence(String),

    #[error("{stage} stage interrupted: {reason}")]
    Interrupted { stage: &'static str, reason: String },
}

/// Errors building a coordinator.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Missing component: {0}")]
    MissingComponent(&'static str),

    #[error("Failed to open conversation store: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to build orchestrator: {0}")]
    Orchestrator(#[from] OrchestratorError),
}

/// The synthesized answer after normalization.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseRecord {
    pub response: String,
    pub model: String,
    pub token_usage: TokenUsage,
}

/// Mutable state of one run. Never shared between runs.
#[derive(Debug, Clone)]
pub struct WorkflowContext {
    pub query: String,
    pub session_id: String,
    pub tasks: Vec<SubTask>,
    pub task_results: Vec<TaskResult>,
    pub response: Option<ResponseRecord>,
    pub evaluation: Option<FallbackOutcome>,
    pub error: Option<WorkflowError>,
    pub metadata: Metadata,
}

impl WorkflowContext {
    pub fn new(query: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            session_id: session_id.into(),
            tasks: Vec::new(),
            task_results: Vec::new(),
            response: None,
            evaluation: None,
            error: None,
            metadata: Metadata::new(),
        }
    }
}

/// Evaluation section of a result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub quality_score: f64,

    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<FallbackOutcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultMetadata {
    pub timestamp: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_fallback: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_sources: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Run details collected by the stages
    #[serde(flatten)]
    pub extra: Metadata,
}

/// What a caller gets back from [`WorkflowCoordinator::process_query`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowResult {
    pub final_answer: String,
    pub subtasks: Vec<SubTask>,
    pub evaluation_result: EvaluationReport,
    pub conversation_id: String,
    pub metadata: ResultMetadata,

    /// Typed cause of a failed run
    #[serde(skip)]
    pub error: Option<WorkflowError>,
}

impl WorkflowResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Runs queries through the pipeline.
pub struct WorkflowCoordinator {
    config: SiftConfig,
    orchestrator: Arc<dyn ToolOrchestrator>,
    evaluator: Arc<dyn AnswerEvaluator>,
    store: Arc<ConversationStore>,
    cost_tracker: Arc<CostTracker>,
}

impl WorkflowCoordinator {
    pub fn builder() -> WorkflowCoordinatorBuilder {
        WorkflowCoordinatorBuilder::new()
    }

    /// Wire the default components from configuration.
    ///
    /// One token counter is shared by the store, the tracker, the
    /// orchestrator and the evaluator.
    pub fn from_config(
        config: SiftConfig,
        provider: Arc<dyn LlmProvider>,
        search: Arc<dyn FallbackSearch>,
        knowledge: Arc<dyn KnowledgeBase>,
    ) -> Result<Self, BuildError> {
        let counter = Arc::new(TokenCounter::new());

        let store = ConversationStore::open(
            &config.storage.conversation_db,
            Arc::clone(&counter),
            config.storage.tokenizer_model.clone(),
        )?;
        let cost_tracker = CostTracker::new(
            Arc::clone(&counter),
            config.pricing.clone(),
            UsageLedger::new(&config.storage.ledger_dir),
        );
        let orchestrator = LlmToolOrchestrator::builder()
            .provider(Arc::clone(&provider))
            .knowledge(knowledge)
            .counter(Arc::clone(&counter))
            .config(CompletionConfig::new(
                config.workflow.model_for(TASK_EXECUTION_TASK_TYPE),
            ))
            .build()?;
        let evaluator = ResultEvaluator::new(provider, search, counter, config.evaluator.clone());

        Self::builder()
            .config(config)
            .orchestrator(Arc::new(orchestrator))
            .evaluator(Arc::new(evaluator))
            .store(Arc::new(store))
            .cost_tracker(Arc::new(cost_tracker))
            .build()
    }

    pub fn config(&self) -> &SiftConfig {
        &self.config
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn cost_tracker(&self) -> &CostTracker {
        &self.cost_tracker
    }

    /// Answer `query` within `session_id`.
    pub async fn process_query(&self, query: &str, session_id: &str) -> WorkflowResult {
        let started = Instant::now();
        let mut ctx = WorkflowContext::new(query, session_id);

        tracing::info!(
            session_id = %session_id,
            query_len = query.chars().count(),
            "Processing query"
        );

        if let Err(e) = self.run_stages(&mut ctx).await {
            tracing::warn!(session_id = %session_id, error = %e, "Query processing failed");
            ctx.error = Some(e);
        }

        ctx.metadata
            .insert("elapsed_ms".to_string(), json!(started.elapsed().as_millis() as u64));

        match ctx.error.take() {
            None => self.success_result(ctx),
            Some(e) => Self::error_result(ctx, e),
        }
    }

    async fn run_stages(&self, ctx: &mut WorkflowContext) -> Result<(), WorkflowError> {
        self.validate_query(ctx)?;
        self.generate_tasks(ctx)?;
        guarded("task execution", self.execute_tasks(ctx)).await?;
        guarded("response generation", self.generate_response(ctx)).await?;
        guarded("quality evaluation", self.evaluate_quality(ctx)).await?;
        self.save_conversation(ctx)
    }

    fn validate_query(&self, ctx: &WorkflowContext) -> Result<(), WorkflowError> {
        if ctx.query.trim().is_empty() {
            return Err(WorkflowError::Validation("query must not be empty".to_string()));
        }

        if ctx.query.chars().count() > self.config.workflow.max_query_length {
            return Err(WorkflowError::Validation("query too long".to_string()));
        }

        Ok(())
    }

    fn generate_tasks(&self, ctx: &mut WorkflowContext) -> Result<(), WorkflowError> {
        let aspects = &self.config.workflow.base_tasks;
        if aspects.is_empty() {
            return Err(WorkflowError::TaskGeneration("no aspects configured".to_string()));
        }

        let count = aspects.len().max(self.config.workflow.min_tasks);
        let tasks = aspects
            .iter()
            .cycle()
            .take(count)
            .enumerate()
            .map(|(i, aspect)| {
                SubTask::new(
                    TaskType::Search,
                    prompts::aspect_task_description(&ctx.query, aspect),
                    i as i32 + 1,
                )
                .with_parameter("depth", "detailed")
                .with_parameter("min_length", 200)
            })
            .collect();

        ctx.tasks = tasks;
        tracing::debug!(session_id = %ctx.session_id, tasks = ctx.tasks.len(), "Tasks generated");
        Ok(())
    }

    async fn execute_tasks(&self, ctx: &mut WorkflowContext) -> Result<(), WorkflowError> {
        sort_by_priority(&mut ctx.tasks);

        let results = self
            .orchestrator
            .execute_tasks(&ctx.tasks)
            .await
            .map_err(|e| WorkflowError::UpstreamTask(format!("task execution failed: {e}")))?;

        if results.len() != ctx.tasks.len() {
            tracing::warn!(
                session_id = %ctx.session_id,
                expected = ctx.tasks.len(),
                received = results.len(),
                "Orchestrator returned a different number of results"
            );
        }

        let mut processed = Vec::with_capacity(results.len());
        for result in results {
            if let Some(marker) = self.config.workflow.failure_marker_in(&result.result) {
                tracing::warn!(session_id = %ctx.session_id, marker, "Task reported failure");
                return Err(WorkflowError::UpstreamTask(result.result));
            }

            let model = match &result.model {
                Some(model) => model.clone(),
                None => self
                    .config
                    .workflow
                    .model_for(result.task_type.as_str())
                    .to_string(),
            };
            self.cost_tracker
                .track_usage(
                    &result.result,
                    Some(&result.token_usage),
                    &model,
                    &ctx.session_id,
                    result.task_type.as_str(),
                    None,
                )
                .await;
            processed.push(result);
        }

        ctx.task_results = processed;
        Ok(())
    }

    async fn generate_response(&self, ctx: &mut WorkflowContext) -> Result<(), WorkflowError> {
        let prompt = prompts::response_instructions(&ctx.query);
        let raw = self
            .orchestrator
            .generate_response(&prompt, &ctx.task_results)
            .await
            .map_err(|e| WorkflowError::Synthesis(e.to_string()))?;

        let record = self.normalize_response(raw, ctx)?;

        self.cost_tracker
            .track_usage(
                &record.response,
                Some(&record.token_usage),
                &record.model,
                &ctx.session_id,
                RESPONSE_TASK_TYPE,
                None,
            )
            .await;

        ctx.metadata
            .insert("response_model".to_string(), json!(record.model));
        ctx.response = Some(record);
        Ok(())
    }

    /// Collapse either synthesis shape into one record.
    fn normalize_response(
        &self,
        raw: SynthesizedResponse,
        ctx: &WorkflowContext,
    ) -> Result<ResponseRecord, WorkflowError> {
        let (response, token_usage, model) = match raw {
            SynthesizedResponse::TextOnly(text) => (text, TokenUsage::default(), None),
            SynthesizedResponse::WithUsage {
                content,
                token_usage,
                model,
            } => (content, token_usage.unwrap_or_default(), model),
        };

        if response.trim().is_empty() {
            return Err(WorkflowError::Synthesis("empty response".to_string()));
        }
        if let Some(marker) = self.config.workflow.failure_marker_in(&response) {
            return Err(WorkflowError::Synthesis(format!(
                "response reports failure ({marker})"
            )));
        }

        Ok(ResponseRecord {
            response,
            model: model.unwrap_or_else(|| self.model_from_context(ctx)),
            token_usage,
        })
    }

    /// Model of the most recent task result that names one.
    fn model_from_context(&self, ctx: &WorkflowContext) -> String {
        ctx.task_results
            .iter()
            .rev()
            .find_map(|result| result.model.clone())
            .unwrap_or_else(|| self.config.workflow.model_for(RESPONSE_TASK_TYPE).to_string())
    }

    async fn evaluate_quality(&self, ctx: &mut WorkflowContext) -> Result<(), WorkflowError> {
        let response = ctx
            .response
            .as_ref()
            .ok_or_else(|| WorkflowError::Evaluation("no response to evaluate".to_string()))?;
        let context: Vec<String> = ctx.task_results.iter().map(|r| r.result.clone()).collect();

        let outcome = self
            .evaluator
            .evaluate_with_fallback(&response.response, &ctx.query, Some(&context))
            .await
            .map_err(|e| WorkflowError::Evaluation(e.to_string()))?;

        if !outcome.token_usage.is_empty() {
            self.cost_tracker
                .track_usage(
                    &outcome.answer,
                    Some(&outcome.token_usage),
                    self.evaluator.model(),
                    &ctx.session_id,
                    EVALUATION_TASK_TYPE,
                    None,
                )
                .await;
        }

        tracing::info!(
            session_id = %ctx.session_id,
            score = outcome.evaluation.score,
            used_fallback = outcome.used_fallback,
            "Answer evaluated"
        );
        ctx.evaluation = Some(outcome);
        Ok(())
    }

    fn save_conversation(&self, ctx: &WorkflowContext) -> Result<(), WorkflowError> {
        let outcome = ctx
            .evaluation
            .as_ref()
            .ok_or_else(|| WorkflowError::Persistence("no evaluated answer".to_string()))?;
        let metadata =
            serde_json::to_value(outcome).map_err(|e| WorkflowError::Persistence(e.to_string()))?;

        let message = Message::assistant(outcome.answer.as_str()).with_metadata(metadata);
        self.store
            .add_message(&ctx.session_id, &message)
            .map_err(|e| WorkflowError::Persistence(e.to_string()))?;

        if let Some(max_tokens) = self.config.storage.max_history_tokens {
            let removed = self
                .store
                .trim_conversation(&ctx.session_id, max_tokens)
                .map_err(|e| WorkflowError::Persistence(e.to_string()))?;
            if removed > 0 {
                tracing::debug!(session_id = %ctx.session_id, removed, "Session history trimmed");
            }
        }

        Ok(())
    }

    fn success_result(&self, ctx: WorkflowContext) -> WorkflowResult {
        let outcome = ctx.evaluation;
        let final_answer = outcome
            .as_ref()
            .map(|o| o.answer.clone())
            .or_else(|| ctx.response.map(|r| r.response))
            .unwrap_or_default();
        let quality_score = outcome.as_ref().map(|o| o.evaluation.score).unwrap_or(0.0);

        WorkflowResult {
            final_answer,
            subtasks: ctx.tasks,
            metadata: ResultMetadata {
                timestamp: Utc::now(),
                used_fallback: Some(outcome.as_ref().is_some_and(|o| o.used_fallback)),
                web_sources: Some(
                    outcome
                        .as_ref()
                        .map(|o| o.web_sources.clone())
                        .unwrap_or_default(),
                ),
                quality_score: Some(quality_score),
                error: None,
                extra: ctx.metadata,
            },
            evaluation_result: EvaluationReport {
                quality_score,
                outcome,
            },
            conversation_id: ctx.session_id,
            error: None,
        }
    }

    fn error_result(ctx: WorkflowContext, error: WorkflowError) -> WorkflowResult {
        let cause = error.to_string();
        WorkflowResult {
            final_answer: prompts::error_message(&cause),
            subtasks: Vec::new(),
            evaluation_result: EvaluationReport {
                quality_score: 0.0,
                outcome: None,
            },
            conversation_id: ctx.session_id,
            metadata: ResultMetadata {
                timestamp: Utc::now(),
                used_fallback: None,
                web_sources: None,
                quality_score: None,
                error: Some(cause),
                // run details are only reported for completed runs
                extra: Metadata::new(),
            },
            error: Some(error),
        }
    }
}

/// Run one stage, turning a panic inside it into a stage failure.
async fn guarded<F>(stage: &'static str, fut: F) -> Result<(), WorkflowError>
where
    F: Future<Output = Result<(), WorkflowError>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(stage, reason = %reason, "Stage panicked");
            Err(WorkflowError::Interrupted { stage, reason })
        }
    }
}

/// Builder for WorkflowCoordinator.
pub struct WorkflowCoordinatorBuilder {
    config: SiftConfig,
    orchestrator: Option<Arc<dyn ToolOrchestrator>>,
    evaluator: Option<Arc<dyn AnswerEvaluator>>,
    store: Option<Arc<ConversationStore>>,
    cost_tracker: Option<Arc<CostTracker>>,
}

impl WorkflowCoordinatorBuilder {
    pub fn new() -> Self {
        Self {
            config: SiftConfig::default(),
            orchestrator: None,
            evaluator: None,
            store: None,
            cost_tracker: None,
        }
    }

    pub fn config(mut self, config: SiftConfig) -> Self {
        self.config = config;
        self
    }

    pub fn orchestrator(mut self, orchestrator: Arc<dyn ToolOrchestrator>) -> Self {
        self.orchestrator = Some(orchestrator);
        self
    }

    pub fn evaluator(mut self, evaluator: Arc<dyn AnswerEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn store(mut self, store: Arc<ConversationStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn cost_tracker(mut self, cost_tracker: Arc<CostTracker>) -> Self {
        self.cost_tracker = Some(cost_tracker);
        self
    }

    pub fn build(self) -> Result<WorkflowCoordinator, BuildError> {
        Ok(WorkflowCoordinator {
            orchestrator: self
                .orchestrator
                .ok_or(BuildError::MissingComponent("orchestrator"))?,
            evaluator: self
                .evaluator
                .ok_or(BuildError::MissingComponent("evaluator"))?,
            store: self.store.ok_or(BuildError::MissingComponent("store"))?,
            cost_tracker: self
                .cost_tracker
                .ok_or(BuildError::MissingComponent("cost tracker"))?,
            config: self.config,
        })
    }
}

impl Default for WorkflowCoordinatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sift_core::PricingTable;

    fn coordinator_with(config: SiftConfig) -> WorkflowCoordinator {
        let counter = Arc::new(TokenCounter::new());
        struct Unused;

        #[async_trait::async_trait]
        impl ToolOrchestrator for Unused {
            async fn execute_tasks(
                &self,
                _: &[SubTask],
            ) -> Result<Vec<TaskResult>, OrchestratorError> {
                unreachable!("not exercised")
            }

            async fn generate_response(
                &self,
                _: &str,
                _: &[TaskResult],
            ) -> Result<SynthesizedResponse, OrchestratorError> {
                unreachable!("not exercised")
            }
        }

        #[async_trait::async_trait]
        impl AnswerEvaluator for Unused {
            async fn evaluate_with_fallback(
                &self,
                _: &str,
                _: &str,
                _: Option<&[String]>,
            ) -> Result<FallbackOutcome, crate::evaluator::EvaluationError> {
                unreachable!("not exercised")
            }

            fn model(&self) -> &str {
                "unused"
            }
        }

        WorkflowCoordinator::builder()
            .config(config)
            .orchestrator(Arc::new(Unused))
            .evaluator(Arc::new(Unused))
            .store(Arc::new(
                ConversationStore::in_memory(Arc::clone(&counter), "gpt-4o").unwrap(),
            ))
            .cost_tracker(Arc::new(CostTracker::new(
                counter,
                PricingTable::default(),
                UsageLedger::new(std::env::temp_dir().join("sift-unused-ledger")),
            )))
            .build()
            .unwrap()
    }

    #[test]
    fn test_generate_tasks_one_per_aspect() {
        let coordinator = coordinator_with(SiftConfig::default());
        let mut ctx = WorkflowContext::new("EV battery costs", "s1");

        coordinator.generate_tasks(&mut ctx).unwrap();

        assert_eq!(ctx.tasks.len(), 5);
        assert_eq!(
            ctx.tasks.iter().map(|t| t.priority).collect::<Vec<_>>(),
            vec![1, 2, 3, 4, 5]
        );
        assert!(ctx.tasks[0].description.contains("EV battery costs"));
        assert!(ctx.tasks[0].description.contains("current situation"));
        assert_eq!(ctx.tasks[0].parameters["depth"], "detailed");
        assert_eq!(ctx.tasks[0].parameters["min_length"], 200);
    }

    #[test]
    fn test_generate_tasks_tops_up_to_minimum() {
        let mut config = SiftConfig::default();
        config.workflow.base_tasks = vec!["background".to_string(), "outlook".to_string()];
        config.workflow.min_tasks = 5;
        let coordinator = coordinator_with(config);
        let mut ctx = WorkflowContext::new("EV battery costs", "s1");

        coordinator.generate_tasks(&mut ctx).unwrap();

        assert_eq!(ctx.tasks.len(), 5);
        assert!(ctx.tasks[2].description.contains("background"));
        assert!(ctx.tasks[3].description.contains("outlook"));
    }

    #[test]
    fn test_validation_counts_characters() {
        let mut config = SiftConfig::default();
        config.workflow.max_query_length = 4;
        let coordinator = coordinator_with(config);

        // four multi-byte characters fit
        assert!(coordinator
            .validate_query(&WorkflowContext::new("电池价格", "s1"))
            .is_ok());
        assert_eq!(
            coordinator.validate_query(&WorkflowContext::new("battery", "s1")),
            Err(WorkflowError::Validation("query too long".to_string()))
        );
        assert!(coordinator
            .validate_query(&WorkflowContext::new("   ", "s1"))
            .is_err());
    }

    #[test]
    fn test_normalize_text_only_uses_task_model() {
        let coordinator = coordinator_with(SiftConfig::default());
        let mut ctx = WorkflowContext::new("q", "s1");
        ctx.task_results = vec![
            TaskResult::new(TaskType::Search, "a").with_model("o1"),
            TaskResult::new(TaskType::Search, "b"),
        ];

        let record = coordinator
            .normalize_response(SynthesizedResponse::TextOnly("An answer".to_string()), &ctx)
            .unwrap();
        assert_eq!(record.model, "o1");
        assert!(record.token_usage.is_empty());
    }

    #[test]
    fn test_normalize_keeps_reported_usage() {
        let coordinator = coordinator_with(SiftConfig::default());
        let ctx = WorkflowContext::new("q", "s1");

        let record = coordinator
            .normalize_response(
                SynthesizedResponse::WithUsage {
                    content: "An answer".to_string(),
                    token_usage: Some(TokenUsage::new(40, 10)),
                    model: None,
                },
                &ctx,
            )
            .unwrap();
        assert_eq!(record.token_usage, TokenUsage::new(40, 10));
        assert_eq!(record.model, "gpt-4o");
    }

    #[test]
    fn test_normalize_rejects_empty_and_failed_text() {
        let coordinator = coordinator_with(SiftConfig::default());
        let ctx = WorkflowContext::new("q", "s1");

        for text in ["", "  ", "execution failed: upstream timeout"] {
            let raw = SynthesizedResponse::TextOnly(text.to_string());
            let result = coordinator.normalize_response(raw, &ctx);
            assert!(matches!(result, Err(WorkflowError::Synthesis(_))), "{text:?}");
        }
    }

    #[test]
    fn test_error_result_metadata_has_timestamp_and_error_only() {
        let mut ctx = WorkflowContext::new("", "s1");
        ctx.metadata.insert("elapsed_ms".to_string(), json!(3));
        ctx.metadata.insert("response_model".to_string(), json!("gpt-4o"));

        let result = WorkflowCoordinator::error_result(
            ctx,
            WorkflowError::Validation("query must not be empty".to_string()),
        );

        let metadata = serde_json::to_value(&result.metadata).unwrap();
        let mut keys: Vec<_> = metadata.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        assert_eq!(keys, vec!["error", "timestamp"]);
        assert_eq!(metadata["error"], "query must not be empty");
    }

    #[test]
    fn test_builder_reports_missing_component() {
        let result = WorkflowCoordinator::builder().build();
        assert!(matches!(result, Err(BuildError::MissingComponent("orchestrator"))));
    }

    async fn exploding_stage() -> Result<(), WorkflowError> {
        panic!("judge exploded")
    }

    #[tokio::test]
    async fn test_panicking_stage_is_interrupted() {
        let result = guarded("quality evaluation", exploding_stage()).await;
        assert_eq!(
            result,
            Err(WorkflowError::Interrupted {
                stage: "quality evaluation",
                reason: "judge exploded".to_string()
            })
        );
    }
}
