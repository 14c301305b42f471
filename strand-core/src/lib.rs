//! # Strand - composable LLM workflows
//!
//! Strand strings generation calls together into a handful of reusable
//! shapes and threads one conversation ledger through all of them:
//!
//! - **Chain**: sequential steps, each seeing every earlier output
//! - **Router**: classify once, dispatch to exactly one handler
//! - **ParallelJoin**: fan out independent branches, synthesize their results
//! - **ReflectLoop**: produce, critique, refine under an iteration budget
//! - **ToolLoop**: let the model call registered tools until it answers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use strand_core::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = StrandConfig::load()?;
//!     let provider = LLMProviderFactory::create(&config.llm)?;
//!
//!     let chain = Chain::builder()
//!         .name("blog")
//!         .step(LlmStep::builder("outline", provider.clone()).prompt("Outline a post about {{input}}.").build())
//!         .step(LlmStep::builder("draft", provider).prompt("Write the post from the outline.").build())
//!         .config(ChainConfig::from(&config.workflow))
//!         .build()?;
//!
//!     let output = chain.run("sourdough").await?;
//!     println!("{}", output.last().unwrap_or_default());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! - `llm-openai`: OpenAI-compatible chat-completions provider

pub mod config;
pub mod error;
pub mod ledger;
pub mod llm;
pub mod parsing;
pub mod tools;
pub mod workflow;

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{
        LLMProvider as LLMProviderType, LLMProviderConfig, StrandConfig, WorkflowConfig,
    };
    pub use crate::error::{Result, StrandError};
    pub use crate::ledger::{ContextLedger, LedgerSnapshot, Role, ToolInvocation, Turn};
    pub use crate::llm::{
        GenerationError, GenerationErrorKind, GenerationParameters, GenerationRequest,
        GenerationResult, LLMProvider, LLMProviderFactory, LLMResponse, ModelInfo, TokenUsage,
    };
    pub use crate::parsing::{JsonParser, OutputParser, ParseError, ParseResult, ParserConfig};
    pub use crate::tools::{
        BoxedTool, FnTool, RegistryError, Tool, ToolError, ToolRegistry, ToolSchema,
    };
    pub use crate::workflow::{
        Branch, BranchFailure, BranchOutcome, Chain, ChainBuilder, ChainConfig, ChainOutput,
        ExecutionTrace, GenerationStep, LabelSet, LlmStep, MatchPolicy, ParallelConfig,
        ParallelJoin, ParallelOutput, ReflectConfig, ReflectLoop, ReflectOutput, RouteDecision,
        RouteHandler, RouteOutput, Router, StepInput, StepTrace, Termination, ToolLoop,
        ToolLoopConfig, ToolLoopOutput, Verdict, WorkflowError, WorkflowResult,
    };
}
