//! Error types for Strand operations

use crate::llm::GenerationError;
use crate::parsing::ParseError;
use crate::tools::RegistryError;
use crate::workflow::WorkflowError;

/// Result type for Strand operations
pub type Result<T> = std::result::Result<T, StrandError>;

/// Error types for the Strand framework
#[derive(Debug, thiserror::Error)]
pub enum StrandError {
    /// Configuration error (missing credentials, invalid settings)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Generation capability failed outside of a workflow run
    #[error(transparent)]
    Generation(#[from] GenerationError),

    /// Workflow run aborted
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    /// Structured output could not be parsed
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Tool registration failed
    #[error("Tool registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl StrandError {
    /// Whether this error should stop the process before any workflow starts
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            StrandError::Configuration(_)
                | StrandError::Registry(_)
                | StrandError::Workflow(WorkflowError::Configuration(_))
        )
    }
}

impl From<String> for StrandError {
    fn from(s: String) -> Self {
        StrandError::Other(s)
    }
}

impl From<&str> for StrandError {
    fn from(s: &str) -> Self {
        StrandError::Other(s.to_string())
    }
}

impl From<anyhow::Error> for StrandError {
    fn from(err: anyhow::Error) -> Self {
        StrandError::Other(err.to_string())
    }
}
