//! Tool-use loop
//!
//! Offer the registry's tools to the model, execute whatever it calls, feed
//! the results back and ask again. The loop ends when the model answers with
//! text or the round cap is hit.

use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::WorkflowConfig;
use crate::ledger::{ContextLedger, ToolInvocation};
use crate::llm::{GenerationError, GenerationResult};
use crate::tools::ToolRegistry;

use super::execution::{ExecutionTrace, StepTrace, WorkflowError, WorkflowResult};
use super::step::{GenerationStep, StepInput, invoke_step};

/// Configuration for the tool loop
#[derive(Debug, Clone)]
pub struct ToolLoopConfig {
    /// Tool-execution rounds allowed before giving up
    pub max_rounds: usize,
    pub step_timeout: Option<Duration>,
}

impl Default for ToolLoopConfig {
    fn default() -> Self {
        Self {
            max_rounds: 10,
            step_timeout: None,
        }
    }
}

impl From<&WorkflowConfig> for ToolLoopConfig {
    fn from(config: &WorkflowConfig) -> Self {
        Self {
            max_rounds: config.tool_loop_max_rounds,
            step_timeout: config.step_timeout,
        }
    }
}

/// Record of one executed tool call
#[derive(Debug, Clone)]
pub struct ToolCallTrace {
    pub round: usize,
    pub call_id: String,
    pub tool: String,
    pub duration_ms: u64,
    /// `None` on success
    pub error: Option<String>,
}

/// Tool loop execution trace
#[derive(Debug, Clone)]
pub struct ToolLoopTrace {
    /// Model calls, in order
    pub model_calls: ExecutionTrace,
    pub tool_calls: Vec<ToolCallTrace>,
    /// Rounds in which tools were executed
    pub rounds: usize,
}

/// Final answer of a tool loop
#[derive(Debug, Clone, PartialEq)]
pub struct ToolLoopOutput {
    pub answer: String,
    pub rounds: usize,
}

/// Generate, execute requested tools, repeat
pub struct ToolLoop {
    name: String,
    step: Arc<dyn GenerationStep>,
    registry: Arc<ToolRegistry>,
    config: ToolLoopConfig,
}

impl std::fmt::Debug for ToolLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolLoop")
            .field("name", &self.name)
            .field("step", &self.step.name())
            .field("tools", &self.registry.names())
            .field("config", &self.config)
            .finish()
    }
}

impl ToolLoop {
    pub fn builder(step: impl GenerationStep + 'static, registry: Arc<ToolRegistry>) -> ToolLoopBuilder {
        ToolLoopBuilder {
            name: "tool_loop".to_string(),
            step: Arc::new(step),
            registry,
            config: ToolLoopConfig::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Drive the loop over `ledger` until the model answers with text.
    ///
    /// Every tool-call turn is followed by one tool-result turn per call, in
    /// call order. Tool failures do not abort the loop; the model receives an
    /// `{"error": ...}` payload instead.
    pub async fn execute(
        &self,
        ledger: &mut ContextLedger,
    ) -> WorkflowResult<(ToolLoopOutput, ToolLoopTrace)> {
        if ledger.is_empty() {
            return Err(WorkflowError::Configuration(format!(
                "tool loop '{}' needs at least one turn of context",
                self.name
            )));
        }

        tracing::info!(
            workflow = %self.name,
            tools = self.registry.len(),
            max_rounds = self.config.max_rounds,
            "Starting tool loop"
        );

        let input = StepInput::default();
        let schemas = self.registry.schemas();
        let mut model_calls = ExecutionTrace::new(&self.name);
        let mut tool_calls = Vec::new();
        let mut rounds = 0;

        loop {
            let index = model_calls.steps.len();
            let request = self
                .step
                .request(ledger.turns(), &input)
                .with_tools(schemas.clone());

            let started = Instant::now();
            let response = invoke_step(self.step.as_ref(), request, self.config.step_timeout).await;
            let response = match response {
                Ok(response) => response,
                Err(source) => {
                    model_calls.add_step(StepTrace::failure(
                        self.step.name(),
                        source.to_string(),
                        started.elapsed(),
                    ));
                    return Err(self.step_failed(index, source));
                }
            };

            match response.result {
                GenerationResult::Text(answer) => {
                    model_calls.add_step(
                        StepTrace::success(self.step.name(), Some(answer.clone()), started.elapsed())
                            .with_token_usage(response.usage),
                    );
                    ledger.append_assistant(answer.clone());

                    tracing::info!(workflow = %self.name, rounds, "Tool loop completed");
                    return Ok((
                        ToolLoopOutput { answer, rounds },
                        ToolLoopTrace {
                            model_calls,
                            tool_calls,
                            rounds,
                        },
                    ));
                }
                GenerationResult::ToolCalls(calls) if calls.is_empty() => {
                    let source = GenerationError::malformed("tool call response with no calls");
                    model_calls.add_step(StepTrace::failure(
                        self.step.name(),
                        source.to_string(),
                        started.elapsed(),
                    ));
                    return Err(self.step_failed(index, source));
                }
                GenerationResult::ToolCalls(calls) => {
                    model_calls.add_step(
                        StepTrace::success(self.step.name(), None, started.elapsed())
                            .with_token_usage(response.usage),
                    );

                    if rounds == self.config.max_rounds {
                        tracing::warn!(
                            workflow = %self.name,
                            limit = self.config.max_rounds,
                            "Model still requesting tools at round cap"
                        );
                        return Err(WorkflowError::ToolRoundLimit {
                            limit: self.config.max_rounds,
                        });
                    }
                    rounds += 1;

                    tracing::debug!(
                        workflow = %self.name,
                        round = rounds,
                        calls = calls.len(),
                        "Executing tool calls"
                    );

                    ledger.append_tool_calls("", calls.clone());
                    for call in &calls {
                        let (content, trace) = self.run_tool(call, rounds).await;
                        ledger.append_tool_result(call.id.clone(), content);
                        tool_calls.push(trace);
                    }
                }
            }
        }
    }

    /// Seed a fresh ledger with `prompt` and run
    pub async fn run(&self, prompt: impl Into<String>) -> WorkflowResult<ToolLoopOutput> {
        let mut ledger = ContextLedger::new();
        ledger.append_user(prompt);
        let (output, _) = self.execute(&mut ledger).await?;
        Ok(output)
    }

    async fn run_tool(&self, call: &ToolInvocation, round: usize) -> (String, ToolCallTrace) {
        let started = Instant::now();
        let (value, error) = match self.registry.invoke(call).await {
            Ok(value) => (value, None),
            Err(err) => {
                tracing::warn!(
                    workflow = %self.name,
                    tool = %call.name,
                    call_id = %call.id,
                    error = %err,
                    "Tool call failed, returning error payload"
                );
                (err.to_placeholder(), Some(err.to_string()))
            }
        };

        let trace = ToolCallTrace {
            round,
            call_id: call.id.clone(),
            tool: call.name.clone(),
            duration_ms: started.elapsed().as_millis() as u64,
            error,
        };
        (render_result(&value), trace)
    }

    fn step_failed(&self, index: usize, source: GenerationError) -> WorkflowError {
        WorkflowError::StepFailed {
            index,
            step: self.step.name().to_string(),
            source,
        }
    }
}

fn render_result(value: &Value) -> String {
    value.to_string()
}

/// Builder for [`ToolLoop`]
pub struct ToolLoopBuilder {
    name: String,
    step: Arc<dyn GenerationStep>,
    registry: Arc<ToolRegistry>,
    config: ToolLoopConfig,
}

impl ToolLoopBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn config(mut self, config: ToolLoopConfig) -> Self {
        self.config = config;
        self
    }

    pub fn max_rounds(mut self, max_rounds: usize) -> Self {
        self.config.max_rounds = max_rounds;
        self
    }

    pub fn step_timeout(mut self, timeout: Duration) -> Self {
        self.config.step_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> WorkflowResult<ToolLoop> {
        if self.config.max_rounds == 0 {
            return Err(WorkflowError::Configuration(
                "tool loop needs at least one round".to_string(),
            ));
        }

        Ok(ToolLoop {
            name: self.name,
            step: self.step,
            registry: self.registry,
            config: self.config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{Role, Turn};
    use crate::llm::{GenerationErrorKind, GenerationRequest, LLMResponse};
    use crate::tools::{FnTool, ToolError, ToolSchema};
    use async_trait::async_trait;
    use serde_json::{Map, json};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedModel {
        replies: Mutex<VecDeque<LLMResponse>>,
        requests: Mutex<Vec<GenerationRequest>>,
    }

    impl ScriptedModel {
        fn new(replies: Vec<LLMResponse>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl GenerationStep for Arc<ScriptedModel> {
        fn name(&self) -> &str {
            "assistant"
        }

        fn request(&self, context: &[Turn], _input: &StepInput) -> GenerationRequest {
            GenerationRequest::new(context.to_vec())
        }

        async fn invoke(&self, request: GenerationRequest) -> Result<LLMResponse, GenerationError> {
            self.requests.lock().unwrap().push(request);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| GenerationError::unavailable("script exhausted"))
        }
    }

    fn call(id: &str, name: &str, args: serde_json::Value) -> ToolInvocation {
        let arguments = match args {
            serde_json::Value::Object(map) => map,
            _ => Map::new(),
        };
        ToolInvocation::new(id, name, arguments)
    }

    fn registry() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry
            .register(Arc::new(FnTool::new(
                ToolSchema::single_string("echo", "Echo the text back", "text", "Text to echo"),
                |args| async move {
                    args.get("text")
                        .map(|t| json!({ "echo": t }))
                        .ok_or_else(|| ToolError::InvalidArguments("missing 'text'".into()))
                },
            )))
            .unwrap();
        Arc::new(registry)
    }

    #[test]
    fn test_zero_rounds_rejected() {
        let model = ScriptedModel::new(vec![]);
        let err = ToolLoop::builder(model, registry())
            .max_rounds(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_empty_ledger_rejected() {
        let model = ScriptedModel::new(vec![LLMResponse::text("hi")]);
        let tool_loop = ToolLoop::builder(model.clone(), registry()).build().unwrap();

        let err = tool_loop.execute(&mut ContextLedger::new()).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Configuration(_)));
        assert!(model.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_direct_answer_skips_tools() {
        let model = ScriptedModel::new(vec![LLMResponse::text("No tools needed.")]);
        let tool_loop = ToolLoop::builder(model.clone(), registry()).build().unwrap();

        let output = tool_loop.run("Say hi").await.unwrap();
        assert_eq!(output.answer, "No tools needed.");
        assert_eq!(output.rounds, 0);

        let requests = model.requests.lock().unwrap();
        assert_eq!(requests[0].parameters().tools.len(), 1);
        assert_eq!(requests[0].parameters().tools[0].name, "echo");
    }

    #[tokio::test]
    async fn test_bad_arguments_become_error_payload() {
        let model = ScriptedModel::new(vec![
            LLMResponse::tool_calls(vec![call("c1", "echo", json!({}))]),
            LLMResponse::text("Sorry, the tool failed."),
        ]);
        let tool_loop = ToolLoop::builder(model, registry()).build().unwrap();

        let mut ledger = ContextLedger::new();
        ledger.append_user("echo nothing");
        let (_, trace) = tool_loop.execute(&mut ledger).await.unwrap();

        let result = &ledger.turns()[2];
        assert_eq!(result.role, Role::Tool);
        let payload: serde_json::Value = serde_json::from_str(&result.content).unwrap();
        assert!(payload["error"].as_str().unwrap().contains("missing 'text'"));
        assert!(trace.tool_calls[0].error.is_some());
    }

    #[tokio::test]
    async fn test_round_cap() {
        let model = ScriptedModel::new(vec![
            LLMResponse::tool_calls(vec![call("c1", "echo", json!({"text": "a"}))]),
            LLMResponse::tool_calls(vec![call("c2", "echo", json!({"text": "b"}))]),
            LLMResponse::tool_calls(vec![call("c3", "echo", json!({"text": "c"}))]),
        ]);
        let tool_loop = ToolLoop::builder(model.clone(), registry())
            .max_rounds(2)
            .build()
            .unwrap();

        let err = tool_loop.run("loop forever").await.unwrap_err();
        assert!(matches!(err, WorkflowError::ToolRoundLimit { limit: 2 }));
        assert_eq!(model.requests.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_empty_tool_call_list_is_malformed() {
        let model = ScriptedModel::new(vec![LLMResponse::tool_calls(vec![])]);
        let tool_loop = ToolLoop::builder(model, registry()).build().unwrap();

        let err = tool_loop.run("x").await.unwrap_err();
        match err {
            WorkflowError::StepFailed { index, source, .. } => {
                assert_eq!(index, 0);
                assert_eq!(source.kind, GenerationErrorKind::Malformed);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
