//! Chain Workflow Pattern
//!
//! Sequential execution where every step sees everything produced before it.
//! Each step's text output is appended to the ledger as an assistant turn
//! before the next step builds its request.

use std::sync::Arc;
use std::time::Duration;

use crate::config::WorkflowConfig;
use crate::ledger::ContextLedger;

use super::execution::{ExecutionTrace, WorkflowError, WorkflowResult};
use super::step::{GenerationStep, StepInput, run_text_step};

/// Configuration for chain execution
#[derive(Debug, Clone, Default)]
pub struct ChainConfig {
    /// Per-step deadline
    pub step_timeout: Option<Duration>,
}

impl From<&WorkflowConfig> for ChainConfig {
    fn from(config: &WorkflowConfig) -> Self {
        Self {
            step_timeout: config.step_timeout,
        }
    }
}

/// Outputs of a completed chain, one per step
#[derive(Debug, Clone, PartialEq)]
pub struct ChainOutput {
    pub outputs: Vec<String>,
}

impl ChainOutput {
    /// Output of the final step
    pub fn last(&self) -> Option<&str> {
        self.outputs.last().map(String::as_str)
    }
}

/// Ordered sequence of generation steps
pub struct Chain {
    name: String,
    steps: Vec<Arc<dyn GenerationStep>>,
    config: ChainConfig,
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("name", &self.name)
            .field("steps", &self.steps.iter().map(|s| s.name()).collect::<Vec<_>>())
            .field("config", &self.config)
            .finish()
    }
}

impl Chain {
    pub fn builder() -> ChainBuilder {
        ChainBuilder::new()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run every step in order over `ledger`.
    ///
    /// Stops at the first failing step; the error carries that step's index.
    pub async fn execute(
        &self,
        ledger: &mut ContextLedger,
        input: &StepInput,
    ) -> WorkflowResult<(ChainOutput, ExecutionTrace)> {
        tracing::info!(chain = %self.name, steps = self.steps.len(), "Starting chain");

        let mut trace = ExecutionTrace::new(&self.name);
        let mut outputs = Vec::with_capacity(self.steps.len());

        let total = self.steps.len();
        for (index, step) in self.steps.iter().enumerate() {
            tracing::info!(
                chain = %self.name,
                step = %step.name(),
                "Running step {}/{total}",
                index + 1
            );
            let (result, step_trace) =
                run_text_step(step.as_ref(), ledger.turns(), input, self.config.step_timeout).await;
            trace.add_step(step_trace);

            let text = result.map_err(|source| WorkflowError::StepFailed {
                index,
                step: step.name().to_string(),
                source,
            })?;

            ledger.append_assistant(text.clone());
            outputs.push(text);
        }

        tracing::info!(
            chain = %self.name,
            duration_ms = trace.total_duration_ms,
            "Chain completed"
        );

        Ok((ChainOutput { outputs }, trace))
    }

    /// Run on a fresh ledger with `{{input}}` bound to `input`
    pub async fn run(&self, input: impl Into<String>) -> WorkflowResult<ChainOutput> {
        let mut ledger = ContextLedger::new();
        let (output, _) = self.execute(&mut ledger, &StepInput::new(input)).await?;
        Ok(output)
    }
}

/// Builder for creating Chain workflows
pub struct ChainBuilder {
    name: String,
    steps: Vec<Arc<dyn GenerationStep>>,
    config: ChainConfig,
}

impl ChainBuilder {
    pub fn new() -> Self {
        Self {
            name: "chain".to_string(),
            steps: Vec::new(),
            config: ChainConfig::default(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn step(mut self, step: impl GenerationStep + 'static) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    /// Add a step that is shared with other workflows
    pub fn shared_step(mut self, step: Arc<dyn GenerationStep>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn config(mut self, config: ChainConfig) -> Self {
        self.config = config;
        self
    }

    pub fn step_timeout(mut self, timeout: Duration) -> Self {
        self.config.step_timeout = Some(timeout);
        self
    }

    /// Build the chain; a chain without steps is rejected
    pub fn build(self) -> WorkflowResult<Chain> {
        if self.steps.is_empty() {
            return Err(WorkflowError::Configuration(format!(
                "chain '{}' has no steps",
                self.name
            )));
        }

        Ok(Chain {
            name: self.name,
            steps: self.steps,
            config: self.config,
        })
    }
}

impl Default for ChainBuilder {
    fn default() -> Self {
        Self::new()
    }
}
