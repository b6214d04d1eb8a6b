//! Configuration for the query pipeline.
//!
//! Configuration is an explicit value constructed once and passed down to
//! every component. Every section has defaults, so an empty YAML document is
//! a valid configuration.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pricing::PricingTable;

/// Model used when nothing more specific is configured.
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Errors that can occur when loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Config validation failed: {0}")]
    ValidationError(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SiftConfig {
    pub workflow: WorkflowConfig,
    pub evaluator: EvaluatorConfig,
    pub storage: StorageConfig,
    pub pricing: PricingTable,
}

impl SiftConfig {
    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: SiftConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workflow.max_query_length == 0 {
            return Err(ConfigError::ValidationError(
                "workflow.max_query_length must be positive".to_string(),
            ));
        }

        if self.workflow.base_tasks.is_empty() {
            return Err(ConfigError::ValidationError(
                "workflow.base_tasks must name at least one aspect".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.evaluator.fallback_min_relevance) {
            return Err(ConfigError::ValidationError(format!(
                "evaluator.fallback_min_relevance must be within [0, 1], got {}",
                self.evaluator.fallback_min_relevance
            )));
        }

        let invalid = self.pricing.invalid_entries();
        if !invalid.is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "pricing has invalid entries: {}",
                invalid.join(", ")
            )));
        }

        Ok(())
    }
}

/// Pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Longest accepted query, in characters
    pub max_query_length: usize,

    /// Lower bound on generated sub-tasks
    pub min_tasks: usize,

    /// Aspects the query is analysed from, one sub-task each
    pub base_tasks: Vec<String>,

    /// Default model per task type, used for cost accounting
    pub default_models: BTreeMap<String, String>,

    /// Substrings that mark a task or response as failed
    pub failure_markers: Vec<String>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        let default_models = [
            ("search", "text-embedding-3-large"),
            ("query_parsing", DEFAULT_MODEL),
            ("task_execution", DEFAULT_MODEL),
            ("response_generation", DEFAULT_MODEL),
            ("text_embedding", "text-embedding-3-large"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            max_query_length: 2000,
            min_tasks: 3,
            base_tasks: vec![
                "current situation".to_string(),
                "historical background".to_string(),
                "future trends".to_string(),
                "wider impact".to_string(),
                "expert opinions".to_string(),
            ],
            default_models,
            failure_markers: vec!["Agent stopped".to_string(), "execution failed".to_string()],
        }
    }
}

impl WorkflowConfig {
    /// Default model for a task type.
    pub fn model_for(&self, task_type: &str) -> &str {
        self.default_models
            .get(task_type)
            .map(String::as_str)
            .unwrap_or(DEFAULT_MODEL)
    }

    /// The marker contained in `text`, if any.
    pub fn failure_marker_in(&self, text: &str) -> Option<&str> {
        self.failure_markers
            .iter()
            .find(|marker| text.contains(marker.as_str()))
            .map(String::as_str)
    }
}

/// Judge and fallback settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    /// Model used for judging and regeneration
    pub judge_model: String,

    pub max_tokens: u32,

    pub temperature: f32,

    /// Token ceiling for the context passed to the judge
    pub context_token_limit: u32,

    pub fallback_max_results: usize,

    pub fallback_min_relevance: f64,

    /// Cache successful verdicts keyed by (answer, context)
    pub cache_verdicts: bool,

    pub cache_capacity: u64,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            judge_model: DEFAULT_MODEL.to_string(),
            max_tokens: 1000,
            temperature: 0.0,
            context_token_limit: 4000,
            fallback_max_results: 5,
            fallback_min_relevance: 0.7,
            cache_verdicts: false,
            cache_capacity: 1_000,
        }
    }
}

/// Where history and usage records live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub conversation_db: PathBuf,

    pub ledger_dir: PathBuf,

    /// Model whose tokenizer is used for history budgets
    pub tokenizer_model: String,

    /// Trim each session to this many tokens after persisting
    pub max_history_tokens: Option<u64>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            conversation_db: PathBuf::from("data/conversations.db"),
            ledger_dir: PathBuf::from("logs/costs"),
            tokenizer_model: DEFAULT_MODEL.to_string(),
            max_history_tokens: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config = SiftConfig::from_yaml("{}").unwrap();
        assert_eq!(config.workflow.max_query_length, 2000);
        assert_eq!(config.workflow.min_tasks, 3);
        assert_eq!(config.workflow.base_tasks.len(), 5);
        assert_eq!(config.evaluator.context_token_limit, 4000);
        assert_eq!(config.pricing.default_model, "o3-mini");
    }

    #[test]
    fn test_partial_override() {
        let yaml = r#"
workflow:
  max_query_length: 500
  base_tasks:
    - "background"
    - "outlook"
storage:
  ledger_dir: "/tmp/sift-costs"
  max_history_tokens: 8000
pricing:
  models:
    local-llm: { input: 0.0, output: 0.0 }
  default_model: local-llm
"#;
        let config = SiftConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.workflow.max_query_length, 500);
        assert_eq!(config.workflow.base_tasks, vec!["background", "outlook"]);
        // untouched fields keep their defaults
        assert_eq!(config.workflow.min_tasks, 3);
        assert_eq!(config.storage.ledger_dir, PathBuf::from("/tmp/sift-costs"));
        assert_eq!(config.storage.max_history_tokens, Some(8000));
        assert_eq!(config.pricing.calculate_cost(1000, 1000, "anything"), 0.0);
    }

    #[test]
    fn test_validation_rejects_empty_aspects() {
        let result = SiftConfig::from_yaml("workflow:\n  base_tasks: []\n");
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_validation_rejects_negative_price() {
        let yaml = "pricing:\n  models:\n    bad: { input: -1.0, output: 2.0 }\n";
        let result = SiftConfig::from_yaml(yaml);
        assert!(matches!(result, Err(ConfigError::ValidationError(msg)) if msg.contains("bad")));
    }

    #[test]
    fn test_model_for_task_type() {
        let config = WorkflowConfig::default();
        assert_eq!(config.model_for("search"), "text-embedding-3-large");
        assert_eq!(config.model_for("calculation"), DEFAULT_MODEL);
    }

    #[test]
    fn test_failure_marker_detection() {
        let config = WorkflowConfig::default();
        assert_eq!(
            config.failure_marker_in("Agent stopped due to iteration limit or time limit."),
            Some("Agent stopped")
        );
        assert_eq!(config.failure_marker_in("A thorough answer."), None);
    }

    #[test]
    fn test_from_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sift.yaml");
        std::fs::write(&path, "workflow:\n  min_tasks: 7\n").unwrap();

        let config = SiftConfig::from_yaml_file(&path).unwrap();
        assert_eq!(config.workflow.min_tasks, 7);
    }
}
