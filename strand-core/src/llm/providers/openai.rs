//! OpenAI-compatible chat-completions provider

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

use crate::error::{Result, StrandError};
use crate::ledger::{Role, ToolInvocation, Turn};
use crate::llm::{
    GenerationError, GenerationRequest, LLMProvider, LLMResponse, ModelInfo, TokenUsage,
};
use crate::tools::ToolSchema;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// OpenAI provider (also works with any API speaking the same wire format).
pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAIProvider {
    /// Create a new OpenAI provider.
    ///
    /// # Arguments
    ///
    /// * `api_key` - OpenAI API key
    /// * `model` - Model name (e.g., "gpt-4o-mini", "gpt-4.1-nano")
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_base_url(api_key, model, DEFAULT_BASE_URL)
    }

    /// Create with a custom base URL (Azure OpenAI, local gateways, ...).
    pub fn with_base_url(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Point at a different endpoint, keeping key and model
    pub fn with_endpoint(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Bound every HTTP exchange; expiry surfaces as a `Timeout` generation error
    pub fn with_request_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StrandError::Configuration(format!("Failed to build HTTP client: {e}")))?;
        Ok(self)
    }

    /// Create from environment variables.
    ///
    /// Reads `OPENAI_API_KEY` (required), `OPENAI_MODEL` and `OPENAI_BASE_URL`.
    /// An explicit `model` wins over `OPENAI_MODEL`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `OPENAI_API_KEY` is not set.
    pub fn from_env(model: Option<impl Into<String>>) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            StrandError::Configuration("OPENAI_API_KEY environment variable not set".to_string())
        })?;

        let model = model
            .map(|m| m.into())
            .or_else(|| std::env::var("OPENAI_MODEL").ok())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let base_url =
            std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());

        Ok(Self::with_base_url(api_key, model, base_url))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_body(&self, request: &GenerationRequest) -> ChatRequest {
        let params = request.parameters();
        ChatRequest {
            model: params.model.clone().unwrap_or_else(|| self.model.clone()),
            messages: request.context().iter().map(ChatMessage::from).collect(),
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            tools: params.tools.iter().map(ChatTool::from).collect(),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ChatTool>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
}

impl From<&Turn> for ChatMessage {
    fn from(turn: &Turn) -> Self {
        let role = match turn.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        // Assistant turns that only requested tools carry no text
        let content = if turn.content.is_empty() && !turn.tool_calls.is_empty() {
            None
        } else {
            Some(turn.content.clone())
        };
        Self {
            role,
            content,
            tool_call_id: turn.tool_call_id.clone(),
            tool_calls: turn.tool_calls.iter().map(WireToolCall::from).collect(),
        }
    }
}

#[derive(Serialize)]
struct ChatTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: ChatFunction,
}

#[derive(Serialize)]
struct ChatFunction {
    name: String,
    description: String,
    parameters: Value,
}

impl From<&ToolSchema> for ChatTool {
    fn from(schema: &ToolSchema) -> Self {
        Self {
            kind: "function",
            function: ChatFunction {
                name: schema.name.clone(),
                description: schema.description.clone(),
                parameters: schema.parameters.clone(),
            },
        }
    }
}

#[derive(Serialize, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: WireFunctionCall,
}

#[derive(Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    /// JSON-encoded argument object
    arguments: String,
}

fn function_kind() -> String {
    "function".to_string()
}

impl From<&ToolInvocation> for WireToolCall {
    fn from(call: &ToolInvocation) -> Self {
        Self {
            id: call.id.clone(),
            kind: function_kind(),
            function: WireFunctionCall {
                name: call.name.clone(),
                arguments: Value::Object(call.arguments.clone()).to_string(),
            },
        }
    }
}

impl TryFrom<WireToolCall> for ToolInvocation {
    type Error = GenerationError;

    fn try_from(call: WireToolCall) -> std::result::Result<Self, GenerationError> {
        let raw = call.function.arguments.trim();
        let arguments = if raw.is_empty() {
            Map::new()
        } else {
            match serde_json::from_str::<Value>(raw) {
                Ok(Value::Object(map)) => map,
                Ok(other) => {
                    return Err(GenerationError::malformed(format!(
                        "arguments for tool call '{}' are not an object: {other}",
                        call.id
                    )));
                }
                Err(e) => {
                    return Err(GenerationError::malformed(format!(
                        "arguments for tool call '{}' are not valid JSON: {e}",
                        call.id
                    )));
                }
            }
        };
        // some compatible gateways omit ids; results must still pair with their call
        let id = if call.id.trim().is_empty() {
            format!("call_{}", uuid::Uuid::new_v4().simple())
        } else {
            call.id
        };
        Ok(ToolInvocation::new(id, call.function.name, arguments))
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
    total_tokens: usize,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
}

fn decode_response(body: &str) -> std::result::Result<LLMResponse, GenerationError> {
    let response: ChatResponse = serde_json::from_str(body)
        .map_err(|e| GenerationError::malformed(format!("Failed to parse OpenAI response: {e}")))?;

    let usage = response.usage.map(|u| TokenUsage {
        prompt_tokens: u.prompt_tokens,
        completion_tokens: u.completion_tokens,
        total_tokens: u.total_tokens,
    });

    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| GenerationError::malformed("OpenAI API returned no choices"))?;

    let reply = if choice.message.tool_calls.is_empty() {
        LLMResponse::text(choice.message.content.unwrap_or_default())
    } else {
        let calls = choice
            .message
            .tool_calls
            .into_iter()
            .map(ToolInvocation::try_from)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        LLMResponse::tool_calls(calls)
    };

    Ok(match usage {
        Some(usage) => reply.with_usage(usage),
        None => reply,
    })
}

fn transport_error(err: reqwest::Error) -> GenerationError {
    if err.is_timeout() {
        GenerationError::timeout(format!("OpenAI request timed out: {err}"))
    } else {
        GenerationError::unavailable(format!("Failed to send request to OpenAI: {err}"))
    }
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> std::result::Result<LLMResponse, GenerationError> {
        let body = self.build_body(request);
        let url = format!("{}/chat/completions", self.base_url);

        tracing::debug!(
            model = %body.model,
            messages = body.messages.len(),
            tools = body.tools.len(),
            "Sending chat completion request"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            if let Ok(api_error) = serde_json::from_str::<ApiError>(&text) {
                return Err(GenerationError::unavailable(format!(
                    "OpenAI API error ({}): {}",
                    api_error
                        .error
                        .error_type
                        .unwrap_or_else(|| status.to_string()),
                    api_error.error.message
                )));
            }
            return Err(GenerationError::unavailable(format!(
                "OpenAI API error ({status}): {text}"
            )));
        }

        decode_response(&text)
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "openai".to_string(),
            model_name: self.model.clone(),
        }
    }
}
