//! Parser trait and error types

use thiserror::Error;

/// Error type for parsing operations
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// Output could not be read as the expected format
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// A value had the wrong JSON type
    #[error("Type mismatch for '{field}': expected {expected}, got {actual}")]
    TypeMismatch {
        field: String,
        expected: String,
        actual: String,
    },

    /// A required field was absent
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Nothing to parse
    #[error("Empty input")]
    EmptyInput,
}

/// Result type for parsing operations
pub type ParseResult<T> = Result<T, ParseError>;

/// Trait for output parsers
pub trait OutputParser: Send + Sync {
    /// The output type produced by this parser
    type Output;

    /// Parse raw model output
    fn parse(&self, raw: &str) -> ParseResult<Self::Output>;

    /// Parser name used in log lines
    fn name(&self) -> &'static str;
}

/// Controls how forgiving a parser is
#[derive(Debug, Clone)]
pub struct ParserConfig {
    /// Repair trailing commas and unbalanced closers
    pub attempt_repair: bool,
    /// Strip markdown code fences before parsing
    pub strip_code_fences: bool,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            attempt_repair: true,
            strip_code_fences: true,
        }
    }
}

impl ParserConfig {
    /// No repair attempts; fences are still stripped
    pub fn strict() -> Self {
        Self {
            attempt_repair: false,
            strip_code_fences: true,
        }
    }
}
