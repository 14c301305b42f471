//! Generation steps
//!
//! A [`GenerationStep`] is one bounded call to the generation capability. It
//! knows how to turn the accumulated context plus named inputs into a
//! [`GenerationRequest`], and how to perform the call. Runners never look
//! inside a step; they only sequence, branch and repeat them.

use async_trait::async_trait;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use crate::ledger::Turn;
use crate::llm::{
    GenerationError, GenerationParameters, GenerationRequest, GenerationResult, LLMProvider,
    LLMResponse,
};
use crate::parsing::{JsonParser, OutputParser};

use super::execution::StepTrace;

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{([\w\-]+)\}\}").unwrap());

/// Name of the variable holding a step's primary input
pub const INPUT_VAR: &str = "input";

/// Named template variables for a step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepInput {
    vars: BTreeMap<String, String>,
}

impl StepInput {
    /// Input with `{{input}}` bound to `primary`
    pub fn new(primary: impl Into<String>) -> Self {
        Self::default().with(INPUT_VAR, primary)
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn primary(&self) -> Option<&str> {
        self.get(INPUT_VAR)
    }

    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    /// Replace every `{{name}}` with its value; unknown placeholders are left as-is
    ///
    /// Substitution is single-pass: placeholders inside substituted values stay literal.
    pub fn render(&self, template: &str) -> String {
        PLACEHOLDER_RE
            .replace_all(template, |caps: &Captures<'_>| match self.vars.get(&caps[1]) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            })
            .into_owned()
    }
}

/// One call to the generation capability
#[async_trait]
pub trait GenerationStep: Send + Sync {
    /// Name used in traces and errors
    fn name(&self) -> &str;

    /// Build a fresh request from prior turns and named inputs
    fn request(&self, context: &[Turn], input: &StepInput) -> GenerationRequest;

    /// Perform the call
    async fn invoke(&self, request: GenerationRequest) -> Result<LLMResponse, GenerationError>;
}

/// Invoke `step`, failing with `Timeout` if it runs past `timeout`
pub async fn invoke_step(
    step: &dyn GenerationStep,
    request: GenerationRequest,
    timeout: Option<Duration>,
) -> Result<LLMResponse, GenerationError> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, step.invoke(request))
            .await
            .map_err(|_| {
                GenerationError::timeout(format!("step '{}' exceeded {:?}", step.name(), limit))
            })?,
        None => step.invoke(request).await,
    }
}

/// Build, invoke and trace a step that must answer with text
pub async fn run_text_step(
    step: &dyn GenerationStep,
    context: &[Turn],
    input: &StepInput,
    timeout: Option<Duration>,
) -> (Result<String, GenerationError>, StepTrace) {
    let started = Instant::now();
    let request = step.request(context, input);

    tracing::debug!(step = step.name(), turns = request.context().len(), "Invoking step");

    let outcome = invoke_step(step, request, timeout).await.and_then(|response| {
        let usage = response.usage;
        response.result.into_text().map(|text| (text, usage))
    });

    match outcome {
        Ok((text, usage)) => {
            let trace = StepTrace::success(step.name(), Some(text.clone()), started.elapsed())
                .with_token_usage(usage);
            (Ok(text), trace)
        }
        Err(err) => {
            tracing::debug!(step = step.name(), error = %err, "Step failed");
            let trace = StepTrace::failure(step.name(), err.to_string(), started.elapsed());
            (Err(err), trace)
        }
    }
}

/// Prompt-template step backed by an [`LLMProvider`]
pub struct LlmStep {
    name: String,
    system_prompt: Option<String>,
    prompt_template: Option<String>,
    provider: Arc<dyn LLMProvider>,
    parameters: GenerationParameters,
    expect_json: bool,
}

impl std::fmt::Debug for LlmStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmStep")
            .field("name", &self.name)
            .field("system_prompt", &self.system_prompt)
            .field("prompt_template", &self.prompt_template)
            .field("provider", &self.provider.model_info().provider)
            .field("expect_json", &self.expect_json)
            .finish()
    }
}

impl LlmStep {
    pub fn builder(name: impl Into<String>, provider: Arc<dyn LLMProvider>) -> LlmStepBuilder {
        LlmStepBuilder {
            name: name.into(),
            system_prompt: None,
            prompt_template: None,
            provider,
            parameters: GenerationParameters::default(),
            expect_json: false,
        }
    }

    pub fn expects_json(&self) -> bool {
        self.expect_json
    }
}

#[async_trait]
impl GenerationStep for LlmStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn request(&self, context: &[Turn], input: &StepInput) -> GenerationRequest {
        let mut turns = Vec::with_capacity(context.len() + 2);
        if let Some(system) = &self.system_prompt {
            turns.push(Turn::system(input.render(system)));
        }
        turns.extend_from_slice(context);
        if let Some(template) = &self.prompt_template {
            turns.push(Turn::user(input.render(template)));
        }

        GenerationRequest::new(turns).with_parameters(self.parameters.clone())
    }

    async fn invoke(&self, request: GenerationRequest) -> Result<LLMResponse, GenerationError> {
        let mut response = self.provider.generate(&request).await?;

        if self.expect_json {
            if let GenerationResult::Text(text) = &response.result {
                let value = JsonParser::new().parse(text)?;
                response.result = GenerationResult::Text(value.to_string());
            }
        }

        Ok(response)
    }
}

/// Builder for [`LlmStep`]
pub struct LlmStepBuilder {
    name: String,
    system_prompt: Option<String>,
    prompt_template: Option<String>,
    provider: Arc<dyn LLMProvider>,
    parameters: GenerationParameters,
    expect_json: bool,
}

impl LlmStepBuilder {
    /// System prompt placed before the context; may use `{{name}}` placeholders
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// User prompt placed after the context; may use `{{name}}` placeholders
    pub fn prompt(mut self, template: impl Into<String>) -> Self {
        self.prompt_template = Some(template.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.parameters.model = Some(model.into());
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.parameters.temperature = Some(temperature.clamp(0.0, 2.0));
        self
    }

    pub fn max_tokens(mut self, max_tokens: usize) -> Self {
        self.parameters.max_tokens = Some(max_tokens);
        self
    }

    /// Require the output to be JSON; unparseable output becomes `Malformed`
    pub fn expect_json(mut self) -> Self {
        self.expect_json = true;
        self
    }

    pub fn build(self) -> LlmStep {
        LlmStep {
            name: self.name,
            system_prompt: self.system_prompt,
            prompt_template: self.prompt_template,
            provider: self.provider,
            parameters: self.parameters,
            expect_json: self.expect_json,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Role;
    use crate::llm::{GenerationErrorKind, ModelInfo};
    use std::sync::Mutex;

    struct MockProvider {
        reply: String,
        delay: Option<Duration>,
        seen: Mutex<Vec<GenerationRequest>>,
    }

    impl MockProvider {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                delay: None,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LLMProvider for MockProvider {
        async fn generate(&self, request: &GenerationRequest) -> Result<LLMResponse, GenerationError> {
            self.seen.lock().unwrap().push(request.clone());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(LLMResponse::text(self.reply.clone()))
        }

        fn model_info(&self) -> ModelInfo {
            ModelInfo {
                provider: "mock".to_string(),
                model_name: "mock-model".to_string(),
            }
        }
    }

    #[test]
    fn test_render_placeholders() {
        let input = StepInput::new("AI ethics").with("topic", "Bias");
        assert_eq!(
            input.render("Outline {{topic}} for a post about {{input}}. {{missing}}"),
            "Outline Bias for a post about AI ethics. {{missing}}"
        );
        assert_eq!(input.primary(), Some("AI ethics"));
    }

    #[test]
    fn test_render_keeps_placeholders_inside_values() {
        let input = StepInput::new("a comment about {{criteria}}")
            .with("criteria", "The comment uses {{sentiment}} literally")
            .with("sentiment", "negative");
        assert_eq!(
            input.render("C={{criteria}} S={{sentiment}} I={{input}}"),
            "C=The comment uses {{sentiment}} literally S=negative I=a comment about {{criteria}}"
        );
    }

    #[test]
    fn test_request_layout() {
        let provider = Arc::new(MockProvider::new("ok"));
        let step = LlmStep::builder("outline", provider)
            .system_prompt("You are a writer.")
            .prompt("Outline: {{input}}")
            .model("gpt-4o-mini")
            .temperature(0.7)
            .build();

        let context = vec![Turn::assistant("previous output")];
        let request = step.request(&context, &StepInput::new("Rust"));

        let roles: Vec<Role> = request.context().iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::System, Role::Assistant, Role::User]);
        assert_eq!(request.context()[2].content, "Outline: Rust");
        assert_eq!(request.parameters().temperature, Some(0.7));
        assert_eq!(request.parameters().model.as_deref(), Some("gpt-4o-mini"));
    }

    #[tokio::test]
    async fn test_expect_json_normalizes() {
        let provider = Arc::new(MockProvider::new("```json\n[\"a\", \"b\",]\n```"));
        let step = LlmStep::builder("topics", provider).expect_json().build();

        let response = step.invoke(GenerationRequest::from_prompt("topics")).await.unwrap();
        assert_eq!(response.result, GenerationResult::Text(r#"["a","b"]"#.to_string()));
    }

    #[tokio::test]
    async fn test_expect_json_malformed() {
        let provider = Arc::new(MockProvider::new("I cannot do that."));
        let step = LlmStep::builder("topics", provider).expect_json().build();

        let err = step.invoke(GenerationRequest::from_prompt("topics")).await.unwrap_err();
        assert_eq!(err.kind, GenerationErrorKind::Malformed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invoke_step_timeout() {
        let provider = Arc::new(MockProvider {
            delay: Some(Duration::from_secs(60)),
            ..MockProvider::new("late")
        });
        let step = LlmStep::builder("slow", provider).build();

        let err = invoke_step(&step, GenerationRequest::from_prompt("x"), Some(Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert_eq!(err.kind, GenerationErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_run_text_step_traces() {
        let provider = Arc::new(MockProvider::new("Section text"));
        let step = LlmStep::builder("section", provider.clone())
            .prompt("Write {{input}}")
            .build();

        let (result, trace) = run_text_step(&step, &[], &StepInput::new("Intro"), None).await;
        assert_eq!(result.unwrap(), "Section text");
        assert!(trace.success);
        assert_eq!(trace.output.as_deref(), Some("Section text"));
        assert_eq!(provider.seen.lock().unwrap()[0].context()[0].content, "Write Intro");
    }
}
