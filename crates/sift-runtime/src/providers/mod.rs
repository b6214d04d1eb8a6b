//! LLM provider abstraction for sift-runtime.
//!
//! The pipeline never talks to a model API directly. Judges, generators and
//! the tool-orchestrator agent all go through [`LlmProvider`], so concrete
//! HTTP clients live outside this crate and tests use in-process mocks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use sift_core::{EvaluatorConfig, TokenUsage};

/// Errors from LLM providers.
///
/// Host clients map transport and status failures onto `HttpError`.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    #[error("JSON parse error: {0}")]
    ParseError(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

/// Configuration for a completion request.
#[derive(Debug, Clone)]
pub struct CompletionConfig {
    /// Model to use
    pub model: String,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Temperature (0.0 for deterministic)
    pub temperature: f32,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            model: sift_core::config::DEFAULT_MODEL.to_string(),
            max_tokens: 1000,
            temperature: 0.0,
        }
    }
}

impl CompletionConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    /// Settings used for judging and regeneration.
    pub fn for_judge(config: &EvaluatorConfig) -> Self {
        Self {
            model: config.judge_model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }
}

/// A chat message for LLM completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role: "system", "user", or "assistant"
    pub role: String,

    /// Message content
    pub content: String,
}

impl ChatMessage {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Response from an LLM completion.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Generated content
    pub content: String,

    /// Token usage as reported by the provider; empty when it reports none
    pub usage: TokenUsage,

    /// Model used
    pub model: String,

    /// Stop reason
    pub stop_reason: Option<String>,
}

/// Provider abstraction allows swapping LLM backends.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Execute a chat completion.
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError>;

    /// Get provider name for logs.
    fn name(&self) -> &str;
}
