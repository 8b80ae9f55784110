pub mod tools;

use crate::config::AgentConfig;
use crate::llm::{ChatMessage, ChatModel, ChatOutcome, LlmError, ToolSpec};
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

use tools::Tool;

#[derive(Debug)]
pub enum AgentError {
    LlmError(LlmError),
    StepLimitExceeded(usize),
    StepTimeout(u64),
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentError::LlmError(err) => write!(f, "Agent LLM error: {}", err),
            AgentError::StepLimitExceeded(steps) => {
                write!(f, "Agent exceeded the step limit of {}", steps)
            }
            AgentError::StepTimeout(secs) => {
                write!(f, "Agent step exceeded the {}s timeout", secs)
            }
        }
    }
}

impl Error for AgentError {}

impl From<LlmError> for AgentError {
    fn from(err: LlmError) -> Self {
        AgentError::LlmError(err)
    }
}

/// The planner's standing instruction: consult retrieved examples first,
/// fall back to schema inspection.
const PLANNER_SUFFIX: &str = "You answer questions by generating and running SQL queries against \
a data warehouse. First get the similar examples you know. If the examples are enough to \
construct the query, build it. Otherwise, look at the tables in the warehouse to see what you \
can query, then query the schema of the most relevant tables.";

/// The fixed instruction block demanding the single-key JSON envelope.
const ENVELOPE_INSTRUCTIONS: &str = r#"For the following query, if it requires drawing a table, reply as follows:
{"table": {"columns": ["column1", "column2", ...], "data": [[value1, value2, ...], [value1, value2, ...], ...]}}

If the query requires creating a bar chart, reply as follows:
{"bar": {"columns": ["A", "B", "C", ...], "data": [25, 24, 10, ...]}}

If the query requires creating a line chart, reply as follows:
{"line": {"columns": ["A", "B", "C", ...], "data": [25, 24, 10, ...]}}

There can only be two types of chart, "bar" and "line".

Do not apply any LIMIT in the query.

If it is just asking a question that requires neither, reply as follows:
{"answer": "answer"}
Example:
{"answer": "The title with the highest rating is 'Gilead'"}

If you do not know the answer, reply as follows:
{"answer": "I do not know."}

Return all output as a string.

All strings in "columns" list and data list, should be in double quotes,

For example: {"columns": ["title", "ratings_count"], "data": [["Gilead", 361], ["Spider's Web", 5164]]}

Lets think step by step.

Please ensure that the response is valid JSON with no surrounding formatting.

Below is the query.
Query: "#;

/// An LLM-driven planner that selects and invokes tools iteratively to
/// answer one query. The observe/act loop is explicit: at most `max_steps`
/// model turns, each bounded by `step_timeout`.
pub struct SqlAgent {
    model: Arc<dyn ChatModel + Send + Sync>,
    toolkit: Vec<Box<dyn Tool + Send + Sync>>,
    specs: Vec<ToolSpec>,
    max_steps: usize,
    step_timeout: Duration,
}

impl SqlAgent {
    pub fn new(
        model: Arc<dyn ChatModel + Send + Sync>,
        toolkit: Vec<Box<dyn Tool + Send + Sync>>,
        config: &AgentConfig,
    ) -> Self {
        let specs = toolkit.iter().map(|tool| tool.spec()).collect();
        Self {
            model,
            toolkit,
            specs,
            max_steps: config.max_steps,
            step_timeout: Duration::from_secs(config.step_timeout_secs),
        }
    }

    /// Runs the full plan/act cycle for one question and returns the model's
    /// final text, expected (but not guaranteed) to be the JSON envelope.
    pub async fn run(&self, question: &str) -> Result<String, AgentError> {
        let mut messages = vec![
            ChatMessage::system(PLANNER_SUFFIX),
            ChatMessage::user(format!("{}{}", ENVELOPE_INSTRUCTIONS, question)),
        ];

        for step in 0..self.max_steps {
            debug!("Agent step {} of {}", step + 1, self.max_steps);

            let outcome = timeout(self.step_timeout, self.model.chat(&messages, &self.specs))
                .await
                .map_err(|_| AgentError::StepTimeout(self.step_timeout.as_secs()))??;

            match outcome {
                ChatOutcome::Message(text) => {
                    info!("Agent finished after {} step(s)", step + 1);
                    return Ok(text);
                }
                ChatOutcome::ToolCalls(calls) => {
                    messages.push(ChatMessage::assistant_tool_calls(calls.clone()));

                    for call in calls {
                        let observation = self.observe(&call.name, &call.arguments).await?;
                        messages.push(ChatMessage::tool_result(call.id, observation));
                    }
                }
            }
        }

        Err(AgentError::StepLimitExceeded(self.max_steps))
    }

    /// Executes one tool call. Tool failures are fed back to the planner as
    /// observations so it can recover; only timeouts abort the run.
    async fn observe(&self, name: &str, arguments: &str) -> Result<String, AgentError> {
        let Some(tool) = self.toolkit.iter().find(|t| t.spec().name == name) else {
            return Ok(format!("Error: no tool named '{}'", name));
        };

        let input = extract_input(arguments);
        debug!("Calling tool '{}' with input: {}", name, input);

        match timeout(self.step_timeout, tool.call(&input)).await {
            Err(_) => Err(AgentError::StepTimeout(self.step_timeout.as_secs())),
            Ok(Err(err)) => Ok(format!("Error: {}", err)),
            Ok(Ok(observation)) => Ok(observation),
        }
    }
}

/// Pulls the single string argument out of the model's JSON arguments,
/// falling back to the raw text if it isn't the expected shape.
fn extract_input(arguments: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(arguments) {
        Ok(serde_json::Value::Object(map)) => map
            .get("input")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| arguments.to_string()),
        Ok(serde_json::Value::String(s)) => s,
        _ => arguments.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::llm::ToolInvocation;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedModel {
        outcomes: Mutex<VecDeque<ChatOutcome>>,
        delay: Option<Duration>,
    }

    impl ScriptedModel {
        fn new(outcomes: Vec<ChatOutcome>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                delay: None,
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                outcomes: Mutex::new(VecDeque::new()),
                delay: Some(delay),
            }
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        async fn chat(
            &self,
            _messages: &[ChatMessage],
            _tools: &[ToolSpec],
        ) -> Result<ChatOutcome, LlmError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| LlmError::ResponseError("script exhausted".to_string()))
        }
    }

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: "echo".to_string(),
                description: "Echoes its input".to_string(),
                parameters: serde_json::json!({"type": "object"}),
            }
        }

        async fn call(&self, input: &str) -> Result<String, tools::ToolError> {
            Ok(format!("echo: {}", input))
        }
    }

    fn agent_config(max_steps: usize, step_timeout_secs: u64) -> crate::config::AgentConfig {
        let mut config = AppConfig::default().agent;
        config.max_steps = max_steps;
        config.step_timeout_secs = step_timeout_secs;
        config
    }

    fn tool_call(name: &str, arguments: &str) -> ToolInvocation {
        ToolInvocation {
            id: "call-1".to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        }
    }

    #[tokio::test]
    async fn returns_final_message_directly() {
        let model = Arc::new(ScriptedModel::new(vec![ChatOutcome::Message(
            r#"{"answer": "42"}"#.to_string(),
        )]));
        let agent = SqlAgent::new(model, vec![], &agent_config(4, 5));

        let response = agent.run("what is the answer?").await.unwrap();
        assert_eq!(response, r#"{"answer": "42"}"#);
    }

    #[tokio::test]
    async fn executes_tool_calls_then_finishes() {
        let model = Arc::new(ScriptedModel::new(vec![
            ChatOutcome::ToolCalls(vec![tool_call("echo", r#"{"input": "hello"}"#)]),
            ChatOutcome::Message(r#"{"answer": "done"}"#.to_string()),
        ]));
        let agent = SqlAgent::new(model, vec![Box::new(EchoTool)], &agent_config(4, 5));

        let response = agent.run("question").await.unwrap();
        assert_eq!(response, r#"{"answer": "done"}"#);
    }

    #[tokio::test]
    async fn unknown_tool_feeds_error_back_to_planner() {
        let model = Arc::new(ScriptedModel::new(vec![
            ChatOutcome::ToolCalls(vec![tool_call("nope", "{}")]),
            ChatOutcome::Message("recovered".to_string()),
        ]));
        let agent = SqlAgent::new(model, vec![Box::new(EchoTool)], &agent_config(4, 5));

        let response = agent.run("question").await.unwrap();
        assert_eq!(response, "recovered");
    }

    #[tokio::test]
    async fn step_limit_produces_typed_error() {
        let model = Arc::new(ScriptedModel::new(vec![
            ChatOutcome::ToolCalls(vec![tool_call("echo", r#"{"input": "a"}"#)]),
            ChatOutcome::ToolCalls(vec![tool_call("echo", r#"{"input": "b"}"#)]),
        ]));
        let agent = SqlAgent::new(model, vec![Box::new(EchoTool)], &agent_config(2, 5));

        let err = agent.run("question").await.unwrap_err();
        assert!(matches!(err, AgentError::StepLimitExceeded(2)));
    }

    #[tokio::test]
    async fn slow_model_step_times_out() {
        let model = Arc::new(ScriptedModel::slow(Duration::from_secs(5)));
        // Zero-second timeout expires before the model answers
        let agent = SqlAgent::new(model, vec![], &agent_config(2, 0));

        let err = agent.run("question").await.unwrap_err();
        assert!(matches!(err, AgentError::StepTimeout(_)));
    }

    #[test]
    fn extracts_string_input_from_arguments() {
        assert_eq!(extract_input(r#"{"input": "SELECT 1"}"#), "SELECT 1");
        assert_eq!(extract_input(r#""bare string""#), "bare string");
        assert_eq!(extract_input("not json"), "not json");
        // Object without the expected key falls back to the raw text
        assert_eq!(extract_input(r#"{"sql": "SELECT 1"}"#), r#"{"sql": "SELECT 1"}"#);
    }
}
