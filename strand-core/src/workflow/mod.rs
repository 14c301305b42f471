//! Workflow patterns over generation steps
//!
//! - **Chain**: steps run in order, each seeing every earlier output
//! - **Router**: a classifier picks one handler by label
//! - **ParallelJoin**: independent branches fan out, a synthesis step joins them
//! - **ReflectLoop**: produce, critique, refine until the critic is satisfied
//! - **ToolLoop**: let the model call registered tools until it answers
//!
//! Every runner threads a [`ContextLedger`](crate::ledger::ContextLedger)
//! through its steps and returns a trace alongside its output.
//!
//! # Example
//!
//! ```rust,ignore
//! use strand_core::workflow::{Chain, LlmStep, StepInput};
//!
//! let chain = Chain::builder()
//!     .step(LlmStep::builder("summarize", provider.clone()).prompt("Summarize: {{input}}").build())
//!     .step(LlmStep::builder("translate", provider).prompt("Translate the summary to French.").build())
//!     .build()?;
//!
//! let output = chain.run(article).await?;
//! ```

mod chain;
mod execution;
mod parallel;
mod reflect;
mod router;
mod step;
mod tool_loop;

pub use chain::{Chain, ChainBuilder, ChainConfig, ChainOutput};
pub use execution::{
    BranchFailure, BranchOutcome, ExecutionTrace, StepTrace, WorkflowError, WorkflowResult,
};
pub use parallel::{
    Branch, BranchStatus, BranchTrace, ParallelBuilder, ParallelConfig, ParallelExecutionTrace,
    ParallelJoin, ParallelOutput,
};
pub use reflect::{
    DEFAULT_REFINE_INSTRUCTION, DEFAULT_SENTINEL, Iteration, ReflectBuilder, ReflectConfig,
    ReflectLoop, ReflectOutput, ReflectTrace, Termination, Verdict,
};
pub use router::{
    LabelSet, MatchPolicy, RouteDecision, RouteFn, RouteHandler, RouteOutput, Router,
    RouterBuilder, RouterExecutionTrace,
};
pub use step::{
    GenerationStep, INPUT_VAR, LlmStep, LlmStepBuilder, StepInput, invoke_step, run_text_step,
};
pub use tool_loop::{
    ToolCallTrace, ToolLoop, ToolLoopBuilder, ToolLoopConfig, ToolLoopOutput, ToolLoopTrace,
};
