//! Shared data model for the query pipeline.

use std::collections::BTreeMap;
use std::ops::AddAssign;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Kind of work a sub-task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Search,
    DbQuery,
    Calculation,
    Analysis,
    DocQa,
    Unknown,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::DbQuery => "db_query",
            Self::Calculation => "calculation",
            Self::Analysis => "analysis",
            Self::DocQa => "doc_qa",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "search" => Self::Search,
            "db_query" => Self::DbQuery,
            "calculation" => Self::Calculation,
            "analysis" => Self::Analysis,
            "doc_qa" => Self::DocQa,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One decomposed unit of work derived from a user query.
///
/// Sub-tasks are immutable once created. Dispatch order is ascending
/// `priority`; equal priorities keep their creation order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubTask {
    pub task_type: TaskType,

    pub description: String,

    #[serde(default)]
    pub parameters: BTreeMap<String, JsonValue>,

    pub priority: i32,
}

impl SubTask {
    pub fn new(task_type: TaskType, description: impl Into<String>, priority: i32) -> Self {
        Self {
            task_type,
            description: description.into(),
            parameters: BTreeMap::new(),
            priority,
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

/// Sort sub-tasks by ascending priority, keeping creation order for ties.
pub fn sort_by_priority(tasks: &mut [SubTask]) {
    // sort_by_key is stable
    tasks.sort_by_key(|t| t.priority);
}

/// Token usage for a single model interaction.
///
/// `total_tokens == prompt_tokens + completion_tokens` whenever both are
/// known. `reasoning_tokens` is reported by some models only and is not
/// folded into the total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u32,

    #[serde(default)]
    pub completion_tokens: u32,

    #[serde(default)]
    pub total_tokens: u32,

    #[serde(default)]
    pub reasoning_tokens: Option<u32>,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
            reasoning_tokens: None,
        }
    }

    /// Usage where only the completion side and the total are known.
    pub fn completion_only(completion_tokens: u32, total_tokens: u32) -> Self {
        Self {
            prompt_tokens: total_tokens.saturating_sub(completion_tokens),
            completion_tokens,
            total_tokens,
            reasoning_tokens: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total_tokens == 0 && self.prompt_tokens == 0 && self.completion_tokens == 0
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, other: Self) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(other.prompt_tokens);
        self.completion_tokens = self.completion_tokens.saturating_add(other.completion_tokens);
        self.total_tokens = self.total_tokens.saturating_add(other.total_tokens);
        self.reasoning_tokens = match (self.reasoning_tokens, other.reasoning_tokens) {
            (None, None) => None,
            (a, b) => Some(a.unwrap_or(0).saturating_add(b.unwrap_or(0))),
        };
    }
}

/// Output of one executed sub-task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_type: TaskType,

    pub result: String,

    #[serde(default)]
    pub token_usage: TokenUsage,

    /// Model that produced the result, when the orchestrator reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl TaskResult {
    pub fn new(task_type: TaskType, result: impl Into<String>) -> Self {
        Self {
            task_type,
            result: result.into(),
            token_usage: TokenUsage::default(),
            model: None,
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.token_usage = usage;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Author of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

/// A persisted conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,

    pub content: String,

    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub metadata: JsonValue,

    /// Filled in by the store on insertion when absent
    #[serde(default)]
    pub token_count: Option<u32>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: JsonValue::Object(Default::default()),
            token_count: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn with_metadata(mut self, metadata: JsonValue) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_token_count(mut self, tokens: u32) -> Self {
        self.token_count = Some(tokens);
        self
    }
}

/// One ledger entry. Serialized flat: the token usage fields sit next to
/// the cost on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub timestamp: DateTime<Utc>,

    pub session_id: String,

    pub model: String,

    pub task_type: String,

    #[serde(flatten)]
    pub token_usage: TokenUsage,

    /// Cost in USD
    pub cost: f64,

    /// Seconds spent waiting on the model, when known
    #[serde(default)]
    pub thinking_time: f64,

    pub content: String,
}

/// Free-form metadata attached to a pipeline run.
pub type Metadata = BTreeMap<String, JsonValue>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_is_stable_for_equal_priorities() {
        let mut tasks = vec![
            SubTask::new(TaskType::Search, "b", 2),
            SubTask::new(TaskType::Search, "a1", 1),
            SubTask::new(TaskType::Analysis, "c", 2),
            SubTask::new(TaskType::Search, "a2", 1),
        ];
        sort_by_priority(&mut tasks);

        let order: Vec<&str> = tasks.iter().map(|t| t.description.as_str()).collect();
        assert_eq!(order, vec!["a1", "a2", "b", "c"]);
    }

    #[test]
    fn test_token_usage_totals() {
        let usage = TokenUsage::new(120, 30);
        assert_eq!(usage.total_tokens, 150);

        let mut acc = TokenUsage::default();
        acc += usage;
        acc += TokenUsage::new(10, 5);
        assert_eq!(acc.total_tokens, 165);
        assert_eq!(acc.reasoning_tokens, None);
    }

    #[test]
    fn test_reasoning_tokens_accumulate_when_reported() {
        let mut acc = TokenUsage::new(1, 1);
        acc += TokenUsage {
            reasoning_tokens: Some(40),
            ..TokenUsage::new(2, 2)
        };
        assert_eq!(acc.reasoning_tokens, Some(40));
        assert_eq!(acc.total_tokens, 6);
    }

    #[test]
    fn test_usage_record_is_flat_on_disk() {
        let record = UsageRecord {
            timestamp: Utc::now(),
            session_id: "s1".to_string(),
            model: "gpt-4o".to_string(),
            task_type: "search".to_string(),
            token_usage: TokenUsage::new(8, 2),
            cost: 0.00024,
            thinking_time: 0.0,
            content: "hello".to_string(),
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["prompt_tokens"], 8);
        assert_eq!(json["total_tokens"], 10);
        assert!(json["reasoning_tokens"].is_null());

        let back: UsageRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_task_type_strings() {
        assert_eq!(TaskType::DbQuery.as_str(), "db_query");
        assert_eq!(TaskType::parse("analysis"), TaskType::Analysis);
        assert_eq!(TaskType::parse("translate"), TaskType::Unknown);
        assert_eq!(
            serde_json::to_string(&TaskType::DocQa).unwrap(),
            "\"doc_qa\""
        );
    }
}
