//! Workflow errors and execution traces

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::llm::{GenerationError, TokenUsage};

/// How a parallel branch ended up in the failure list
#[derive(Debug, Clone, PartialEq)]
pub enum BranchOutcome {
    /// The branch's own step failed
    Failed(GenerationError),
    /// The branch observed cancellation after a sibling failed
    Cancelled,
}

/// A branch that did not contribute a result
#[derive(Debug, Clone, PartialEq)]
pub struct BranchFailure {
    pub label: String,
    pub index: usize,
    pub outcome: BranchOutcome,
}

impl BranchFailure {
    pub fn is_cancelled(&self) -> bool {
        matches!(self.outcome, BranchOutcome::Cancelled)
    }
}

impl fmt::Display for BranchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            BranchOutcome::Failed(err) => write!(f, "'{}' (#{}): {}", self.label, self.index, err),
            BranchOutcome::Cancelled => write!(f, "'{}' (#{}): cancelled", self.label, self.index),
        }
    }
}

fn describe_failures(failures: &[BranchFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Error type for workflow operations
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// A step in a sequential run failed; nothing after it ran
    #[error("Step '{step}' (#{index}) failed: {source}")]
    StepFailed {
        index: usize,
        step: String,
        #[source]
        source: GenerationError,
    },

    /// A reflect-loop phase failed
    #[error("Iteration {iteration} failed in '{step}': {source}")]
    IterationFailed {
        iteration: usize,
        step: String,
        #[source]
        source: GenerationError,
    },

    /// At least one parallel branch failed; synthesis was skipped
    #[error("Parallel branches failed: {}", describe_failures(.failures))]
    BranchesFailed { failures: Vec<BranchFailure> },

    /// Invalid workflow wiring, detected before any step runs
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// The model kept requesting tools past the round cap
    #[error("Tool loop exceeded {limit} round(s)")]
    ToolRoundLimit { limit: usize },
}

impl WorkflowError {
    /// Underlying generation failure, when there is exactly one
    pub fn generation_error(&self) -> Option<&GenerationError> {
        match self {
            WorkflowError::StepFailed { source, .. }
            | WorkflowError::IterationFailed { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Branches whose own step failed (cancelled siblings excluded)
    pub fn failed_branches(&self) -> Vec<&BranchFailure> {
        match self {
            WorkflowError::BranchesFailed { failures } => {
                failures.iter().filter(|f| !f.is_cancelled()).collect()
            }
            _ => Vec::new(),
        }
    }
}

/// Result type for workflow operations
pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Trace of a single step invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepTrace {
    /// Step name
    pub step_name: String,

    /// Text output, if the step produced any
    pub output: Option<String>,

    /// Duration of step execution
    pub duration_ms: u64,

    /// Whether the step succeeded
    pub success: bool,

    /// Error message if failed
    pub error: Option<String>,

    /// Token usage if the provider reported it
    pub token_usage: Option<TokenUsage>,
}

impl StepTrace {
    pub fn success(step_name: impl Into<String>, output: Option<String>, duration: Duration) -> Self {
        Self {
            step_name: step_name.into(),
            output,
            duration_ms: duration.as_millis() as u64,
            success: true,
            error: None,
            token_usage: None,
        }
    }

    pub fn failure(step_name: impl Into<String>, error: impl Into<String>, duration: Duration) -> Self {
        Self {
            step_name: step_name.into(),
            output: None,
            duration_ms: duration.as_millis() as u64,
            success: false,
            error: Some(error.into()),
            token_usage: None,
        }
    }

    pub fn with_token_usage(mut self, usage: Option<TokenUsage>) -> Self {
        self.token_usage = usage;
        self
    }
}

/// Ordered trace of a sequential run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionTrace {
    /// Workflow name
    pub workflow_name: String,

    /// Step traces in execution order
    pub steps: Vec<StepTrace>,

    /// Sum of step durations
    pub total_duration_ms: u64,

    /// Whether every recorded step succeeded
    pub success: bool,

    /// First error, if any
    pub error: Option<String>,
}

impl ExecutionTrace {
    pub fn new(workflow_name: impl Into<String>) -> Self {
        Self {
            workflow_name: workflow_name.into(),
            steps: Vec::new(),
            total_duration_ms: 0,
            success: true,
            error: None,
        }
    }

    pub fn add_step(&mut self, step: StepTrace) {
        self.total_duration_ms += step.duration_ms;
        if !step.success && self.success {
            self.success = false;
            self.error = step.error.clone();
        }
        self.steps.push(step);
    }

    /// Append every step of another trace (e.g. a chain run as a route handler)
    pub fn extend(&mut self, other: ExecutionTrace) {
        for step in other.steps {
            self.add_step(step);
        }
    }

    /// Total token usage across steps that reported it
    pub fn total_token_usage(&self) -> Option<TokenUsage> {
        let mut usages = self.steps.iter().filter_map(|s| s.token_usage.as_ref()).peekable();
        usages.peek()?;

        let mut total = TokenUsage::default();
        for usage in usages {
            total.add(usage);
        }
        Some(total)
    }

    pub fn completed_steps(&self) -> usize {
        self.steps.iter().filter(|s| s.success).count()
    }
}
