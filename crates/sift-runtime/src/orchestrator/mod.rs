//! Tool orchestration: executing sub-tasks and synthesizing the answer.
//!
//! The coordinator depends only on [`ToolOrchestrator`]. The default
//! implementation, [`LlmToolOrchestrator`], runs a bounded tool-using agent
//! per task over an [`LlmProvider`](crate::providers::LlmProvider).

mod agent;

pub use agent::{
    KnowledgeBase, LlmToolOrchestrator, LlmToolOrchestratorBuilder, DOCUMENT_SEARCH_TOOL,
    ITERATION_LIMIT_MESSAGE, MAX_AGENT_ITERATIONS,
};

use async_trait::async_trait;
use thiserror::Error;

use sift_core::{SubTask, TaskResult, TokenUsage};

use crate::providers::ProviderError;

/// Errors from tool orchestration.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Knowledge base error: {0}")]
    Knowledge(String),

    #[error("Invalid orchestrator input: {0}")]
    InvalidInput(String),
}

/// Output of answer synthesis.
///
/// Orchestrators either return plain text or text with usage and model
/// information. The coordinator normalizes both into one record.
#[derive(Debug, Clone, PartialEq)]
pub enum SynthesizedResponse {
    TextOnly(String),

    WithUsage {
        content: String,
        token_usage: Option<TokenUsage>,
        model: Option<String>,
    },
}

impl SynthesizedResponse {
    pub fn content(&self) -> &str {
        match self {
            Self::TextOnly(content) => content,
            Self::WithUsage { content, .. } => content,
        }
    }
}

/// Executes sub-tasks and synthesizes an answer from their results.
#[async_trait]
pub trait ToolOrchestrator: Send + Sync {
    /// Execute tasks and return one result per task in submission order.
    ///
    /// Per-task failures are reported as result entries whose text carries a
    /// failure marker; `Err` is reserved for failures of the whole batch.
    async fn execute_tasks(&self, tasks: &[SubTask]) -> Result<Vec<TaskResult>, OrchestratorError>;

    /// Synthesize an answer to `prompt` from the task results.
    async fn generate_response(
        &self,
        prompt: &str,
        task_results: &[TaskResult],
    ) -> Result<SynthesizedResponse, OrchestratorError>;
}
