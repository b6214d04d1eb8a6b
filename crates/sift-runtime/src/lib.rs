//! # sift-runtime
//!
//! Async query pipeline built on sift-core.
//!
//! ## Components
//!
//! - [`WorkflowCoordinator`]: validate, decompose, execute, synthesize,
//!   evaluate and persist, in that order
//! - [`ToolOrchestrator`]: runs sub-tasks; [`LlmToolOrchestrator`] is a
//!   bounded tool-using agent over an [`LlmProvider`]
//! - [`ResultEvaluator`]: judge-model scoring with one web-search fallback round
//! - [`CostTracker`]: prices every model call and appends it to a monthly ledger
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sift_core::SiftConfig;
//! use sift_runtime::{RelevanceFilteredSearch, WorkflowCoordinator};
//!
//! let config = SiftConfig::from_yaml_file("sift.yaml")?;
//! let coordinator = WorkflowCoordinator::from_config(
//!     config,
//!     Arc::new(my_provider),
//!     Arc::new(RelevanceFilteredSearch::new(my_search_api)),
//!     Arc::new(my_document_store),
//! )?;
//!
//! let result = coordinator
//!     .process_query("How did battery prices move in 2024?", "session-1")
//!     .await;
//! println!("{}", result.final_answer);
//! ```

pub mod accounting;
pub mod cache;
pub mod coordinator;
pub mod evaluator;
pub mod orchestrator;
pub mod prompts;
pub mod providers;
pub mod search;

pub use accounting::{CostTracker, LedgerError, UsageLedger, UsageSummary};
pub use cache::{VerdictCache, VerdictKey};
pub use coordinator::{
    BuildError, EvaluationReport, ResponseRecord, ResultMetadata, WorkflowContext,
    WorkflowCoordinator, WorkflowCoordinatorBuilder, WorkflowError, WorkflowResult,
};
pub use evaluator::{
    AnswerEvaluator, Evaluation, EvaluationError, FallbackOutcome, ResultEvaluator,
    DEFAULT_THRESHOLD,
};
pub use orchestrator::{
    KnowledgeBase, LlmToolOrchestrator, LlmToolOrchestratorBuilder, OrchestratorError,
    SynthesizedResponse, ToolOrchestrator,
};
pub use providers::{ChatMessage, CompletionConfig, CompletionResponse, LlmProvider, ProviderError};
pub use search::{
    FallbackSearch, RelevanceFilteredSearch, SearchBackend, SearchError, SearchHit, WebPage,
};
