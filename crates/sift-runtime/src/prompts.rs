//! Prompts for the judge, the generators and the tool agent.
//!
//! Fixed system prompts are constants; prompts that embed run data are built
//! by the functions below so every call site formats them the same way.

/// Rubric for the judge model.
///
/// The judge must answer with a bare JSON object; anything else is rejected
/// by the verdict schema and counts as a failed evaluation.
pub const JUDGE_SYSTEM_PROMPT: &str = r#"You are a strict answer evaluator. Assess the quality of the given answer and reply with a JSON object.

Reply in exactly this format and add nothing else:
{
    "score": 0.9,
    "hallucination_risk": 0.1,
    "confidence": 0.9,
    "issues": ["issue 1", "issue 2"]
}

Rules:
1. All numbers are decimals between 0 and 1
2. score is the overall quality of the answer, higher is better
3. hallucination_risk is the risk that the answer contains invented information, lower is better
4. confidence is how sure you are of this assessment
5. issues is an array of strings naming the concrete problems you found

Assess:
1. Whether the answer contains concrete data and factual support
2. Whether the information is consistent with the context
3. Whether the reasoning is complete and logical
4. Whether it contains unverified claims"#;

/// System prompt for regenerating an answer from an extended context.
pub const REGENERATE_SYSTEM_PROMPT: &str =
    "Using the context provided, write an accurate and complete answer.";

/// System prompt for synthesizing the final answer from sub-task results.
pub const SYNTHESIS_SYSTEM_PROMPT: &str = "Answer the question using the context provided.";

/// Judge request for one answer and its context passages.
pub fn judge_user_prompt(answer: &str, context: &[String]) -> String {
    format!(
        "Evaluate the quality of the following answer:\n\nContext: {}\n\nAnswer: {}",
        context.join("\n"),
        answer
    )
}

/// Regeneration request for a query over an extended context.
pub fn regenerate_user_prompt(query: &str, context: &[String]) -> String {
    format!("Question: {}\n\nContext:\n{}", query, context.join("\n"))
}

/// Synthesis request: the instruction prompt plus the serialized task results.
pub fn synthesis_user_prompt(prompt: &str, results_json: &str) -> String {
    format!("Question: {}\n\nSubtask results: {}", prompt, results_json)
}

/// Instructions for the final answer to a user query.
pub fn response_instructions(query: &str) -> String {
    format!(
        r#"Answer the following question in detail: {query}

Requirements:
1. The answer must exceed 500 words so that the content is complete
2. Support it with concrete data, facts and expert opinions
3. Analyse it from several angles (current situation, history, trends, impact)
4. Use a clear structure: overview, detailed sections, conclusion
5. Keep the language professional yet accessible
6. Where possible, give related recommendations or solutions

Make sure the answer is thorough and in depth."#
    )
}

/// Sub-task description for one aspect of a query.
pub fn aspect_task_description(query: &str, aspect: &str) -> String {
    format!(
        "Analyse the {aspect} of {query} thoroughly and in depth, including concrete data and factual evidence"
    )
}

/// Tool-agent prompt for one task and the agent's scratchpad so far.
pub fn agent_prompt(tools: &[(&str, &str)], input: &str, scratchpad: &str) -> String {
    let tool_lines: Vec<String> = tools
        .iter()
        .map(|(name, description)| format!("{name}: {description}"))
        .collect();
    let tool_names: Vec<&str> = tools.iter().map(|(name, _)| *name).collect();

    // one pass, so text inside `input` is never treated as a placeholder
    format!(
        r#"Answer the following question as best you can. You have access to the following tools:

{tools}

Use the following format:

Question: the input question you must answer
Thought: you should always think about what to do
Action: the action to take, should be one of [{tool_names}]
Action Input: the input to the action
Observation: the result of the action
... (this Thought/Action/Action Input/Observation can repeat N times)
Thought: I now know the final answer
Final Answer: the final answer to the original input question

Begin!

Question: {input}
Thought: {scratchpad}"#,
        tools = tool_lines.join("\n"),
        tool_names = tool_names.join(", "),
        input = input,
        scratchpad = scratchpad,
    )
}

/// User-facing answer for a failed run.
pub fn error_message(error: &str) -> String {
    format!(
        "An error occurred while processing the query: {error}\n\nSuggestions:\n1. Check that the input is appropriate\n2. Try again later\n3. If the problem persists, contact the support team"
    )
}
