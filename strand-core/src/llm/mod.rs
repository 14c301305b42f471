//! Generation capability
//!
//! The orchestration core never talks to a model directly. It builds a
//! [`GenerationRequest`] and hands it to an [`LLMProvider`]; whatever comes
//! back is either text or a list of tool invocations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ledger::{LedgerSnapshot, ToolInvocation, Turn};
use crate::parsing::ParseError;
use crate::tools::ToolSchema;

pub mod factory;
pub mod providers;

pub use factory::LLMProviderFactory;

/// Why a generation call failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationErrorKind {
    /// The capability could not be reached or refused the request
    Unavailable,
    /// The call exceeded its deadline
    Timeout,
    /// The response could not be interpreted
    Malformed,
}

impl fmt::Display for GenerationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationErrorKind::Unavailable => f.write_str("unavailable"),
            GenerationErrorKind::Timeout => f.write_str("timeout"),
            GenerationErrorKind::Malformed => f.write_str("malformed"),
        }
    }
}

/// Failure of a single generation call
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("generation {kind}: {message}")]
pub struct GenerationError {
    pub kind: GenerationErrorKind,
    pub message: String,
}

impl GenerationError {
    pub fn new(kind: GenerationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(GenerationErrorKind::Unavailable, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(GenerationErrorKind::Timeout, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(GenerationErrorKind::Malformed, message)
    }
}

impl From<ParseError> for GenerationError {
    fn from(err: ParseError) -> Self {
        GenerationError::malformed(err.to_string())
    }
}

/// Sampling and tool parameters for one call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationParameters {
    /// Overrides the provider's default model
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
    /// Tools the model may request
    pub tools: Vec<ToolSchema>,
}

/// One invocation's worth of input for the generation capability
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    context: LedgerSnapshot,
    parameters: GenerationParameters,
}

impl GenerationRequest {
    pub fn new(context: impl Into<LedgerSnapshot>) -> Self {
        Self {
            context: context.into(),
            parameters: GenerationParameters::default(),
        }
    }

    /// Single user prompt, no history
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self::new(vec![Turn::user(prompt)])
    }

    pub fn with_parameters(mut self, parameters: GenerationParameters) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.parameters.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.parameters.temperature = Some(temperature.clamp(0.0, 2.0));
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.parameters.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolSchema>) -> Self {
        self.parameters.tools = tools;
        self
    }

    pub fn context(&self) -> &[Turn] {
        &self.context
    }

    pub fn parameters(&self) -> &GenerationParameters {
        &self.parameters
    }
}

/// What the model produced
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationResult {
    Text(String),
    ToolCalls(Vec<ToolInvocation>),
}

impl GenerationResult {
    /// Text output, or `Malformed` if the model asked for tools instead
    pub fn into_text(self) -> Result<String, GenerationError> {
        match self {
            GenerationResult::Text(text) => Ok(text),
            GenerationResult::ToolCalls(calls) => Err(GenerationError::malformed(format!(
                "expected text, got {} tool call(s)",
                calls.len()
            ))),
        }
    }
}

/// Response from an LLM provider
#[derive(Debug, Clone)]
pub struct LLMResponse {
    pub result: GenerationResult,

    /// Token usage information
    pub usage: Option<TokenUsage>,
}

impl LLMResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            result: GenerationResult::Text(text.into()),
            usage: None,
        }
    }

    pub fn tool_calls(calls: Vec<ToolInvocation>) -> Self {
        Self {
            result: GenerationResult::ToolCalls(calls),
            usage: None,
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// Token usage information
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

impl TokenUsage {
    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Model information
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub provider: String,
    pub model_name: String,
}

/// A text-generation backend.
///
/// Implementations must be safe to call from several tasks at once; the
/// parallel join shares one provider across all of its branches.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Run one generation call
    async fn generate(&self, request: &GenerationRequest) -> Result<LLMResponse, GenerationError>;

    /// Get model information
    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "unknown".to_string(),
            model_name: "unknown".to_string(),
        }
    }
}

/// Provider that refuses every call; placeholder until a real one is configured
pub struct StubLLMProvider;

#[async_trait]
impl LLMProvider for StubLLMProvider {
    async fn generate(&self, _request: &GenerationRequest) -> Result<LLMResponse, GenerationError> {
        Err(GenerationError::unavailable(
            "LLM provider not configured. Implement the LLMProvider trait for your LLM",
        ))
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "stub".to_string(),
            model_name: "none".to_string(),
        }
    }
}
