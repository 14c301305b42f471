//! Tool trait and schema definitions

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Advertised shape of a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Tool name (unique within a registry)
    pub name: String,

    /// What the tool does, shown to the model
    pub description: String,

    /// JSON Schema for the argument object
    pub parameters: Value,
}

impl ToolSchema {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// Schema for a tool that takes a single required string argument
    pub fn single_string(
        name: impl Into<String>,
        description: impl Into<String>,
        argument: &str,
        argument_description: &str,
    ) -> Self {
        Self::new(
            name,
            description,
            serde_json::json!({
                "type": "object",
                "properties": {
                    argument: {"type": "string", "description": argument_description}
                },
                "required": [argument]
            }),
        )
    }
}

/// Non-fatal tool failure, recovered inside the tool loop
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ToolError {
    /// No tool is registered under this name
    #[error("unknown tool '{0}'")]
    UnknownTool(String),

    /// Arguments did not match what the tool expects
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// The tool ran and failed
    #[error("tool failed: {0}")]
    Failed(String),
}

impl ToolError {
    /// JSON placeholder fed back to the model in place of a result
    pub fn to_placeholder(&self) -> Value {
        serde_json::json!({ "error": self.to_string() })
    }
}

/// A function the model may invoke
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name, description and argument schema
    fn schema(&self) -> ToolSchema;

    fn name(&self) -> String {
        self.schema().name
    }

    /// Run the tool against decoded arguments
    async fn invoke(&self, arguments: &Map<String, Value>) -> Result<Value, ToolError>;
}

pub type BoxedTool = Arc<dyn Tool>;

type ToolFn = dyn Fn(Map<String, Value>) -> BoxFuture<'static, Result<Value, ToolError>>
    + Send
    + Sync;

/// Tool backed by an async closure
pub struct FnTool {
    schema: ToolSchema,
    func: Box<ToolFn>,
}

impl FnTool {
    pub fn new<F, Fut>(schema: ToolSchema, func: F) -> Self
    where
        F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        Self {
            schema,
            func: Box::new(move |args| Box::pin(func(args))),
        }
    }
}

impl fmt::Debug for FnTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.schema.name)
            .finish()
    }
}

#[async_trait]
impl Tool for FnTool {
    fn schema(&self) -> ToolSchema {
        self.schema.clone()
    }

    fn name(&self) -> String {
        self.schema.name.clone()
    }

    async fn invoke(&self, arguments: &Map<String, Value>) -> Result<Value, ToolError> {
        (self.func)(arguments.clone()).await
    }
}
