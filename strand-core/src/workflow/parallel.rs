//! Parallel Workflow Pattern
//!
//! Fans out N labeled steps over the same frozen context, waits for all of
//! them, then feeds the labeled results into one synthesis step. The first
//! branch failure cancels the others and skips synthesis.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::WorkflowConfig;
use crate::ledger::{ContextLedger, LedgerSnapshot};
use crate::llm::{GenerationError, TokenUsage};

use super::execution::{
    BranchFailure, BranchOutcome, StepTrace, WorkflowError, WorkflowResult,
};
use super::step::{GenerationStep, INPUT_VAR, StepInput, invoke_step, run_text_step};

/// A labeled step run concurrently with its siblings
#[derive(Clone)]
pub struct Branch {
    pub label: String,
    pub step: Arc<dyn GenerationStep>,
}

impl std::fmt::Debug for Branch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Branch")
            .field("label", &self.label)
            .field("step", &self.step.name())
            .finish()
    }
}

/// Parallel workflow configuration
#[derive(Debug, Clone, Default)]
pub struct ParallelConfig {
    /// Maximum simultaneously running branches; `None` runs all at once
    pub max_concurrency: Option<usize>,
    /// Deadline for each branch and for synthesis
    pub step_timeout: Option<Duration>,
}

impl From<&WorkflowConfig> for ParallelConfig {
    fn from(config: &WorkflowConfig) -> Self {
        Self {
            max_concurrency: config.max_concurrency,
            step_timeout: config.step_timeout,
        }
    }
}

/// How a branch finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchStatus {
    Completed,
    Failed(String),
    Cancelled,
    /// Finished after cancellation; result thrown away
    Discarded,
}

/// Per-branch trace
#[derive(Debug, Clone)]
pub struct BranchTrace {
    pub label: String,
    pub index: usize,
    pub duration_ms: u64,
    pub status: BranchStatus,
    pub token_usage: Option<TokenUsage>,
}

/// Parallel execution trace
#[derive(Debug, Clone)]
pub struct ParallelExecutionTrace {
    pub workflow_name: String,
    /// Branch traces in declaration order
    pub branches: Vec<BranchTrace>,
    /// Absent when synthesis was skipped
    pub synthesis: Option<StepTrace>,
    pub total_duration_ms: u64,
}

/// Joined branch results and the synthesized answer
#[derive(Debug, Clone, PartialEq)]
pub struct ParallelOutput {
    pub branches: BTreeMap<String, String>,
    pub synthesis: String,
}

enum BranchResult {
    Done(Result<(String, Option<TokenUsage>), GenerationError>),
    Cancelled,
}

/// Fan-out / join workflow
pub struct ParallelJoin {
    name: String,
    branches: Vec<Branch>,
    synthesis: Arc<dyn GenerationStep>,
    config: ParallelConfig,
}

impl std::fmt::Debug for ParallelJoin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelJoin")
            .field("name", &self.name)
            .field("branches", &self.branches)
            .field("synthesis", &self.synthesis.name())
            .field("config", &self.config)
            .finish()
    }
}

impl ParallelJoin {
    pub fn builder() -> ParallelBuilder {
        ParallelBuilder::new()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn branch_count(&self) -> usize {
        self.branches.len()
    }

    /// Run every branch, then synthesis.
    ///
    /// Synthesis sees each branch result under its label plus `{{input}}`;
    /// its output is appended to `ledger`.
    pub async fn execute(
        &self,
        ledger: &mut ContextLedger,
        input: &StepInput,
    ) -> WorkflowResult<(ParallelOutput, ParallelExecutionTrace)> {
        let start = Instant::now();
        tracing::info!(
            workflow = %self.name,
            branches = self.branches.len(),
            "Starting parallel join"
        );

        let (results, branch_traces) = self.fan_out(ledger.snapshot(), input).await?;

        let mut synthesis_input = input.clone();
        for (label, text) in &results {
            synthesis_input.set(label.clone(), text.clone());
        }

        let (result, synthesis_trace) = run_text_step(
            self.synthesis.as_ref(),
            ledger.turns(),
            &synthesis_input,
            self.config.step_timeout,
        )
        .await;

        let synthesis = result.map_err(|source| WorkflowError::StepFailed {
            index: self.branches.len(),
            step: self.synthesis.name().to_string(),
            source,
        })?;
        ledger.append_assistant(synthesis.clone());

        let trace = ParallelExecutionTrace {
            workflow_name: self.name.clone(),
            branches: branch_traces,
            synthesis: Some(synthesis_trace),
            total_duration_ms: start.elapsed().as_millis() as u64,
        };

        tracing::info!(
            workflow = %self.name,
            duration_ms = trace.total_duration_ms,
            "Parallel join completed"
        );

        Ok((
            ParallelOutput {
                branches: results,
                synthesis,
            },
            trace,
        ))
    }

    /// Run on a fresh ledger with `{{input}}` bound to `input`
    pub async fn run(&self, input: impl Into<String>) -> WorkflowResult<ParallelOutput> {
        let mut ledger = ContextLedger::new();
        let (output, _) = self.execute(&mut ledger, &StepInput::new(input)).await?;
        Ok(output)
    }

    async fn fan_out(
        &self,
        snapshot: LedgerSnapshot,
        input: &StepInput,
    ) -> WorkflowResult<(BTreeMap<String, String>, Vec<BranchTrace>)> {
        let cancel = CancellationToken::new();
        let permits = self
            .config
            .max_concurrency
            .map(|limit| Arc::new(Semaphore::new(limit)));

        let mut tasks = JoinSet::new();

        for (index, branch) in self.branches.iter().enumerate() {
            let step = branch.step.clone();
            let snapshot = snapshot.clone();
            let input = input.clone();
            let cancel = cancel.clone();
            let permits = permits.clone();
            let timeout = self.config.step_timeout;

            tasks.spawn(async move {
                let started = Instant::now();
                let work = async move {
                    // Held until the branch finishes
                    let _permit = match permits {
                        Some(semaphore) => Some(semaphore.acquire_owned().await.map_err(|_| {
                            GenerationError::unavailable("branch concurrency limiter closed")
                        })?),
                        None => None,
                    };
                    let request = step.request(&snapshot, &input);
                    let response = invoke_step(step.as_ref(), request, timeout).await?;
                    let usage = response.usage;
                    response.result.into_text().map(|text| (text, usage))
                };

                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => BranchResult::Cancelled,
                    outcome = work => BranchResult::Done(outcome),
                };
                (index, result, started.elapsed())
            });
        }

        let mut results = BTreeMap::new();
        let mut traces = Vec::with_capacity(self.branches.len());
        let mut failures = Vec::new();
        let mut panics = Vec::new();

        while let Some(joined) = tasks.join_next().await {
            let (index, result, elapsed) = match joined {
                Ok(outcome) => outcome,
                Err(join_err) => {
                    tracing::warn!(error = %join_err, "Branch task panicked, cancelling siblings");
                    cancel.cancel();
                    panics.push(join_err.to_string());
                    continue;
                }
            };
            let label = self.branches[index].label.clone();

            let (status, usage) = match result {
                BranchResult::Done(Ok((text, usage))) => {
                    if cancel.is_cancelled() {
                        tracing::debug!(branch = %label, "Discarding result that arrived after cancellation");
                        (BranchStatus::Discarded, usage)
                    } else {
                        tracing::debug!(branch = %label, "Branch completed");
                        results.insert(label.clone(), text);
                        (BranchStatus::Completed, usage)
                    }
                }
                BranchResult::Done(Err(err)) => {
                    tracing::warn!(branch = %label, error = %err, "Branch failed, cancelling siblings");
                    cancel.cancel();
                    let status = BranchStatus::Failed(err.to_string());
                    failures.push(BranchFailure {
                        label: label.clone(),
                        index,
                        outcome: BranchOutcome::Failed(err),
                    });
                    (status, None)
                }
                BranchResult::Cancelled => {
                    tracing::warn!(branch = %label, "Branch cancelled");
                    failures.push(BranchFailure {
                        label: label.clone(),
                        index,
                        outcome: BranchOutcome::Cancelled,
                    });
                    (BranchStatus::Cancelled, None)
                }
            };

            traces.push(BranchTrace {
                label,
                index,
                duration_ms: elapsed.as_millis() as u64,
                status,
                token_usage: usage,
            });
        }

        // A panicked task never reports its index; it is whichever branch has no trace
        if !panics.is_empty() {
            let missing: Vec<usize> = (0..self.branches.len())
                .filter(|i| !traces.iter().any(|t| t.index == *i))
                .collect();
            for (index, message) in missing.into_iter().zip(panics) {
                let label = self.branches[index].label.clone();
                let err = GenerationError::unavailable(format!("branch task panicked: {message}"));
                traces.push(BranchTrace {
                    label: label.clone(),
                    index,
                    duration_ms: 0,
                    status: BranchStatus::Failed(err.to_string()),
                    token_usage: None,
                });
                failures.push(BranchFailure {
                    label,
                    index,
                    outcome: BranchOutcome::Failed(err),
                });
            }
        }

        traces.sort_by_key(|t| t.index);

        if !failures.is_empty() {
            failures.sort_by_key(|f| f.index);
            return Err(WorkflowError::BranchesFailed { failures });
        }

        Ok((results, traces))
    }
}

/// Builder for [`ParallelJoin`]
pub struct ParallelBuilder {
    name: String,
    branches: Vec<Branch>,
    synthesis: Option<Arc<dyn GenerationStep>>,
    config: ParallelConfig,
}

impl ParallelBuilder {
    pub fn new() -> Self {
        Self {
            name: "parallel".to_string(),
            branches: Vec::new(),
            synthesis: None,
            config: ParallelConfig::default(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Add a branch whose result is bound to `{{label}}` in synthesis
    pub fn branch(mut self, label: impl Into<String>, step: impl GenerationStep + 'static) -> Self {
        self.branches.push(Branch {
            label: label.into(),
            step: Arc::new(step),
        });
        self
    }

    pub fn synthesis(mut self, step: impl GenerationStep + 'static) -> Self {
        self.synthesis = Some(Arc::new(step));
        self
    }

    pub fn config(mut self, config: ParallelConfig) -> Self {
        self.config = config;
        self
    }

    pub fn max_concurrency(mut self, limit: usize) -> Self {
        self.config.max_concurrency = Some(limit);
        self
    }

    pub fn step_timeout(mut self, timeout: Duration) -> Self {
        self.config.step_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> WorkflowResult<ParallelJoin> {
        if self.branches.is_empty() {
            return Err(WorkflowError::Configuration(format!(
                "parallel workflow '{}' has no branches",
                self.name
            )));
        }
        for (i, branch) in self.branches.iter().enumerate() {
            if branch.label == INPUT_VAR {
                return Err(WorkflowError::Configuration(format!(
                    "branch label '{INPUT_VAR}' is reserved for the original input"
                )));
            }
            if self.branches[..i].iter().any(|b| b.label == branch.label) {
                return Err(WorkflowError::Configuration(format!(
                    "parallel workflow '{}' has duplicate branch label '{}'",
                    self.name, branch.label
                )));
            }
        }
        if self.config.max_concurrency == Some(0) {
            return Err(WorkflowError::Configuration(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        let synthesis = self.synthesis.ok_or_else(|| {
            WorkflowError::Configuration(format!(
                "parallel workflow '{}' has no synthesis step",
                self.name
            ))
        })?;

        Ok(ParallelJoin {
            name: self.name,
            branches: self.branches,
            synthesis,
            config: self.config,
        })
    }
}

impl Default for ParallelBuilder {
    fn default() -> Self {
        Self::new()
    }
}
