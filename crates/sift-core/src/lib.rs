//! # sift-core
//!
//! Deterministic building blocks for budgeted query answering.
//!
//! This crate holds everything in the pipeline that does not talk to a model:
//! - Token estimation with per-model cached encoders
//! - Model pricing and the coarse prompt/completion split used for accounting
//! - The token-budgeted conversation store (SQLite)
//! - Strict parsing of judge-model verdicts against a JSON Schema
//! - Configuration loading
//!
//! ## Key Guarantees
//!
//! 1. **No LLM calls**: every function here is local and synchronous
//! 2. **Never fails on accounting**: token counting and cost calculation
//!    degrade to `0` instead of returning errors
//! 3. **Bounded history**: trimming removes the oldest messages one at a time
//!    until the session fits its budget
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sift_core::{ConversationStore, Message, TokenCounter};
//!
//! let counter = Arc::new(TokenCounter::new());
//! let store = ConversationStore::in_memory(counter, "gpt-4o")?;
//!
//! store.add_message("session-1", &Message::user("What changed in 2024?"))?;
//! let recent = store.get_history("session-1", None, Some(2_000))?;
//! ```

pub mod config;
pub mod history;
pub mod pricing;
pub mod tokens;
pub mod types;
pub mod verdict;

// Re-export main types at crate root
pub use config::{ConfigError, EvaluatorConfig, SiftConfig, StorageConfig, WorkflowConfig};
pub use history::{ConversationStore, StoreError};
pub use pricing::{split_usage, ModelPrice, PricingTable};
pub use tokens::TokenCounter;
pub use types::{
    sort_by_priority, Message, Metadata, Role, SubTask, TaskResult, TaskType, TokenUsage,
    UsageRecord,
};
pub use verdict::{parse_verdict, JudgeVerdict, VerdictError};
