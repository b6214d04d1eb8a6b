//! Tool-using agent over an LLM provider.
//!
//! Each sub-task runs a ReAct-style loop: the model either names a tool and
//! its input, or gives a final answer. Tool observations are appended to the
//! scratchpad and the model is asked again. The loop has a hard iteration cap;
//! hitting it yields [`ITERATION_LIMIT_MESSAGE`], which the coordinator
//! treats as a failed task.

use std::sync::Arc;

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;

use sift_core::{sort_by_priority, SubTask, TaskResult, TokenCounter, TokenUsage};

use super::{OrchestratorError, SynthesizedResponse, ToolOrchestrator};
use crate::prompts;
use crate::providers::{ChatMessage, CompletionConfig, LlmProvider, ProviderError};

/// Default cap on agent iterations per task.
pub const MAX_AGENT_ITERATIONS: usize = 3;

/// Agent output when the iteration cap is reached.
pub const ITERATION_LIMIT_MESSAGE: &str = "Agent stopped due to iteration limit or time limit.";

/// Name of the document search tool.
pub const DOCUMENT_SEARCH_TOOL: &str = "document_search";

const DOCUMENT_SEARCH_DESCRIPTION: &str =
    "Search the document knowledge base and return the content of relevant documents";

const DEFAULT_TOP_K: usize = 4;

lazy_static! {
    static ref FINAL_ANSWER_PATTERN: Regex = Regex::new(r"(?s)Final Answer\s*:\s*(.*)").unwrap();
    static ref ACTION_PATTERN: Regex = Regex::new(
        r"(?s)Action\s*\d*\s*:\s*(.*?)\s*Action\s*\d*\s*Input\s*\d*\s*:\s*(.*)"
    )
    .unwrap();
}

/// Document retrieval used by the `document_search` tool.
#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<String>, OrchestratorError>;
}

/// One parsed model reply.
#[derive(Debug, Clone, PartialEq)]
enum AgentStep {
    Finish(String),
    Act { tool: String, input: String },
    Unparsed,
}

/// Agent loop state for one task.
#[derive(Debug)]
enum AgentState {
    Reasoning { iteration: usize },
    Finished(String),
    GaveUp,
}

fn parse_step(reply: &str) -> AgentStep {
    if let Some(caps) = ACTION_PATTERN.captures(reply) {
        let tool = caps[1].trim().to_string();
        // the model sometimes continues past its action with an imagined observation
        let input = caps[2]
            .split("\nObservation")
            .next()
            .unwrap_or_default()
            .trim()
            .trim_matches('"')
            .to_string();
        if !tool.is_empty() && !FINAL_ANSWER_PATTERN.is_match(reply) {
            return AgentStep::Act { tool, input };
        }
    }

    match FINAL_ANSWER_PATTERN.captures(reply) {
        Some(caps) => AgentStep::Finish(caps[1].trim().to_string()),
        None => AgentStep::Unparsed,
    }
}

/// Default [`ToolOrchestrator`]: a bounded ReAct agent per task.
pub struct LlmToolOrchestrator {
    provider: Arc<dyn LlmProvider>,
    knowledge: Arc<dyn KnowledgeBase>,
    counter: Arc<TokenCounter>,
    config: CompletionConfig,
    max_iterations: usize,
    top_k: usize,
}

impl LlmToolOrchestrator {
    pub fn builder() -> LlmToolOrchestratorBuilder {
        LlmToolOrchestratorBuilder::new()
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    async fn run_agent(&self, task: &SubTask) -> Result<String, ProviderError> {
        let tools = [(DOCUMENT_SEARCH_TOOL, DOCUMENT_SEARCH_DESCRIPTION)];
        let mut scratchpad = String::new();
        let mut state = AgentState::Reasoning { iteration: 0 };

        loop {
            state = match state {
                AgentState::Reasoning { iteration } if iteration >= self.max_iterations => {
                    AgentState::GaveUp
                }
                AgentState::Reasoning { iteration } => {
                    let prompt = prompts::agent_prompt(&tools, &task.description, &scratchpad);
                    let reply = self
                        .provider
                        .complete(vec![ChatMessage::user(prompt)], &self.config)
                        .await?;

                    match parse_step(&reply.content) {
                        AgentStep::Finish(answer) => AgentState::Finished(answer),
                        AgentStep::Act { tool, input } => {
                            let observation = self.run_tool(&tool, &input).await;
                            scratchpad.push_str(&format!(
                                "{}\nObservation: {}\nThought: ",
                                reply.content.trim(),
                                observation
                            ));
                            AgentState::Reasoning {
                                iteration: iteration + 1,
                            }
                        }
                        AgentStep::Unparsed => {
                            tracing::debug!(iteration, "Agent reply did not follow the format");
                            scratchpad.push_str(&format!(
                                "{}\nObservation: Invalid format. Reply with an Action and Action Input, or a Final Answer.\nThought: ",
                                reply.content.trim()
                            ));
                            AgentState::Reasoning {
                                iteration: iteration + 1,
                            }
                        }
                    }
                }
                AgentState::Finished(answer) => return Ok(answer),
                AgentState::GaveUp => {
                    tracing::warn!(
                        task = %task.description,
                        max_iterations = self.max_iterations,
                        "Agent hit its iteration limit"
                    );
                    return Ok(ITERATION_LIMIT_MESSAGE.to_string());
                }
            };
        }
    }

    async fn run_tool(&self, tool: &str, input: &str) -> String {
        if tool != DOCUMENT_SEARCH_TOOL {
            return format!("{tool} is not a valid tool, try one of [{DOCUMENT_SEARCH_TOOL}].");
        }

        match self.knowledge.search(input, self.top_k).await {
            Ok(passages) if passages.is_empty() => "No relevant documents found.".to_string(),
            Ok(passages) => passages.join("\n"),
            Err(e) => {
                tracing::warn!(query = %input, error = %e, "Document search failed");
                "No relevant documents found.".to_string()
            }
        }
    }
}

#[async_trait]
impl ToolOrchestrator for LlmToolOrchestrator {
    async fn execute_tasks(&self, tasks: &[SubTask]) -> Result<Vec<TaskResult>, OrchestratorError> {
        let mut ordered = tasks.to_vec();
        sort_by_priority(&mut ordered);

        let mut results = Vec::with_capacity(ordered.len());
        for task in &ordered {
            let result = match self.run_agent(task).await {
                Ok(output) => {
                    let model = &self.config.model;
                    let output_tokens = self.counter.count(&output, model);
                    let input_tokens = self.counter.count(&task.description, model);
                    TaskResult::new(task.task_type, output)
                        .with_usage(TokenUsage::completion_only(
                            output_tokens,
                            input_tokens + output_tokens,
                        ))
                        .with_model(model.clone())
                }
                Err(e) => {
                    tracing::warn!(task = %task.description, error = %e, "Task execution failed");
                    TaskResult::new(task.task_type, format!("execution failed: {e}"))
                }
            };
            results.push(result);
        }

        Ok(results)
    }

    async fn generate_response(
        &self,
        prompt: &str,
        task_results: &[TaskResult],
    ) -> Result<SynthesizedResponse, OrchestratorError> {
        let results_json = serde_json::to_string(task_results)
            .map_err(|e| OrchestratorError::InvalidInput(e.to_string()))?;
        let user_prompt = prompts::synthesis_user_prompt(prompt, &results_json);

        let response = self
            .provider
            .complete(
                vec![
                    ChatMessage::system(prompts::SYNTHESIS_SYSTEM_PROMPT),
                    ChatMessage::user(user_prompt.as_str()),
                ],
                &self.config,
            )
            .await?;

        let token_usage = if response.usage.is_empty() {
            let model = &self.config.model;
            TokenUsage::new(
                self.counter.count(prompts::SYNTHESIS_SYSTEM_PROMPT, model)
                    + self.counter.count(&user_prompt, model),
                self.counter.count(&response.content, model),
            )
        } else {
            response.usage
        };

        Ok(SynthesizedResponse::WithUsage {
            content: response.content,
            token_usage: Some(token_usage),
            model: Some(response.model),
        })
    }
}

/// Builder for LlmToolOrchestrator.
pub struct LlmToolOrchestratorBuilder {
    provider: Option<Arc<dyn LlmProvider>>,
    knowledge: Option<Arc<dyn KnowledgeBase>>,
    counter: Option<Arc<TokenCounter>>,
    config: CompletionConfig,
    max_iterations: usize,
    top_k: usize,
}

impl LlmToolOrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            provider: None,
            knowledge: None,
            counter: None,
            config: CompletionConfig::default(),
            max_iterations: MAX_AGENT_ITERATIONS,
            top_k: DEFAULT_TOP_K,
        }
    }

    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn knowledge(mut self, knowledge: Arc<dyn KnowledgeBase>) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    /// Share a token counter; a fresh one is created otherwise.
    pub fn counter(mut self, counter: Arc<TokenCounter>) -> Self {
        self.counter = Some(counter);
        self
    }

    pub fn config(mut self, config: CompletionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn build(self) -> Result<LlmToolOrchestrator, OrchestratorError> {
        let provider = self.provider.ok_or_else(|| {
            OrchestratorError::Provider(ProviderError::NotConfigured("No provider set".to_string()))
        })?;
        let knowledge = self
            .knowledge
            .ok_or_else(|| OrchestratorError::Knowledge("No knowledge base set".to_string()))?;

        Ok(LlmToolOrchestrator {
            provider,
            knowledge,
            counter: self.counter.unwrap_or_default(),
            config: self.config,
            max_iterations: self.max_iterations,
            top_k: self.top_k,
        })
    }
}

impl Default for LlmToolOrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::CompletionResponse;
    use parking_lot::Mutex;
    use sift_core::TaskType;
    use std::collections::VecDeque;

    /// Replies from a script; errors once the script runs out.
    struct ScriptedProvider {
        replies: Mutex<VecDeque<String>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        fn new(replies: &[&str]) -> Self {
            Self {
                replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn complete(
            &self,
            messages: Vec<ChatMessage>,
            config: &CompletionConfig,
        ) -> Result<CompletionResponse, ProviderError> {
            if let Some(last) = messages.last() {
                self.prompts.lock().push(last.content.clone());
            }
            let content = self
                .replies
                .lock()
                .pop_front()
                .ok_or_else(|| ProviderError::HttpError("connection reset".to_string()))?;
            Ok(CompletionResponse {
                content,
                usage: TokenUsage::default(),
                model: config.model.clone(),
                stop_reason: Some("stop".to_string()),
            })
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    struct StaticKnowledge;

    #[async_trait]
    impl KnowledgeBase for StaticKnowledge {
        async fn search(
            &self,
            query: &str,
            _top_k: usize,
        ) -> Result<Vec<String>, OrchestratorError> {
            Ok(vec![format!("Report excerpt about {query}")])
        }
    }

    fn orchestrator(provider: Arc<ScriptedProvider>) -> LlmToolOrchestrator {
        LlmToolOrchestrator::builder()
            .provider(provider)
            .knowledge(Arc::new(StaticKnowledge))
            .build()
            .unwrap()
    }

    #[test]
    fn test_parse_final_answer() {
        assert_eq!(
            parse_step("Thought: I now know the final answer\nFinal Answer: Prices fell 20%."),
            AgentStep::Finish("Prices fell 20%.".to_string())
        );
    }

    #[test]
    fn test_parse_action() {
        let step = parse_step(
            "Thought: look it up\nAction: document_search\nAction Input: \"battery prices\"\nObservation: made up",
        );
        assert_eq!(
            step,
            AgentStep::Act {
                tool: "document_search".to_string(),
                input: "battery prices".to_string()
            }
        );
    }

    #[test]
    fn test_parse_garbage() {
        assert_eq!(parse_step("I am not sure what to do."), AgentStep::Unparsed);
    }

    #[tokio::test]
    async fn test_direct_final_answer() {
        let provider = Arc::new(ScriptedProvider::new(&["Final Answer: Lithium got cheaper."]));
        let orchestrator = orchestrator(Arc::clone(&provider));

        let tasks = vec![SubTask::new(TaskType::Search, "Analyse lithium prices", 1)];
        let results = orchestrator.execute_tasks(&tasks).await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].result, "Lithium got cheaper.");
        assert_eq!(results[0].model.as_deref(), Some(orchestrator.model()));

        let usage = results[0].token_usage;
        assert!(usage.completion_tokens > 0);
        assert!(usage.total_tokens > usage.completion_tokens);
    }

    #[tokio::test]
    async fn test_tool_observation_reaches_next_prompt() {
        let provider = Arc::new(ScriptedProvider::new(&[
            "Action: document_search\nAction Input: lithium",
            "Final Answer: Prices fell.",
        ]));
        let orchestrator = orchestrator(Arc::clone(&provider));

        let tasks = vec![SubTask::new(TaskType::Search, "Analyse lithium prices", 1)];
        let results = orchestrator.execute_tasks(&tasks).await.unwrap();
        assert_eq!(results[0].result, "Prices fell.");

        let prompts = provider.prompts.lock();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("Observation: Report excerpt about lithium"));
    }

    #[tokio::test]
    async fn test_iteration_cap_gives_up() {
        let provider = Arc::new(ScriptedProvider::new(&[
            "Action: document_search\nAction Input: a",
            "Action: document_search\nAction Input: b",
            "Action: document_search\nAction Input: c",
            "Final Answer: too late",
        ]));
        let orchestrator = orchestrator(Arc::clone(&provider));

        let tasks = vec![SubTask::new(TaskType::Search, "Analyse lithium prices", 1)];
        let results = orchestrator.execute_tasks(&tasks).await.unwrap();

        assert_eq!(results[0].result, ITERATION_LIMIT_MESSAGE);
        assert_eq!(provider.prompts.lock().len(), MAX_AGENT_ITERATIONS);
    }

    #[tokio::test]
    async fn test_provider_error_becomes_failed_entry() {
        let provider = Arc::new(ScriptedProvider::new(&["Final Answer: first"]));
        let orchestrator = orchestrator(provider);

        let tasks = vec![
            SubTask::new(TaskType::Search, "second", 2),
            SubTask::new(TaskType::Search, "first", 1),
        ];
        let results = orchestrator.execute_tasks(&tasks).await.unwrap();

        // dispatched by priority: "first" consumes the only scripted reply
        assert_eq!(results[0].result, "first");
        assert!(results[1].result.starts_with("execution failed: "));
        assert!(results[1].token_usage.is_empty());
    }

    #[tokio::test]
    async fn test_generate_response_counts_usage_locally() {
        let provider = Arc::new(ScriptedProvider::new(&["A synthesized answer."]));
        let orchestrator = orchestrator(Arc::clone(&provider));

        let results = vec![TaskResult::new(TaskType::Search, "Prices fell.")];
        let response = orchestrator
            .generate_response("What happened to prices?", &results)
            .await
            .unwrap();

        match response {
            SynthesizedResponse::WithUsage {
                content,
                token_usage: Some(usage),
                model: Some(model),
            } => {
                assert_eq!(content, "A synthesized answer.");
                assert!(usage.prompt_tokens > 0);
                assert_eq!(model, orchestrator.model());
            }
            other => panic!("unexpected response: {other:?}"),
        }
        assert!(provider.prompts.lock()[0].contains("Prices fell."));
    }

    #[test]
    fn test_builder_requires_provider() {
        let result = LlmToolOrchestrator::builder()
            .knowledge(Arc::new(StaticKnowledge))
            .build();
        assert!(matches!(result, Err(OrchestratorError::Provider(_))));
    }
}
