//! Reflect Workflow Pattern
//!
//! Produce an artifact, have a critic review it, and feed the critique back
//! until the critic emits the satisfaction sentinel or the iteration budget
//! runs out. Exhausting the budget is not an error: the last artifact wins.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::WorkflowConfig;
use crate::ledger::ContextLedger;
use crate::llm::GenerationError;

use super::execution::{StepTrace, WorkflowError, WorkflowResult};
use super::step::{GenerationStep, StepInput, run_text_step};

/// Critic output marking the artifact as final
pub const DEFAULT_SENTINEL: &str = "RESULT_IS_PERFECT";

/// Default instruction appended after each critique
pub const DEFAULT_REFINE_INSTRUCTION: &str =
    "Please refine the previous version using the critique provided.";

/// Parsed critic output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Satisfied,
    /// Critique points to address in the next revision
    Revise(String),
}

impl Verdict {
    /// Any output containing `sentinel` is satisfaction; other non-empty
    /// output is a critique. Blank output is malformed.
    pub fn parse(raw: &str, sentinel: &str) -> Result<Self, GenerationError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(GenerationError::malformed("critic returned an empty response"));
        }
        if trimmed.contains(sentinel) {
            Ok(Verdict::Satisfied)
        } else {
            Ok(Verdict::Revise(trimmed.to_string()))
        }
    }

    pub fn is_satisfied(&self) -> bool {
        matches!(self, Verdict::Satisfied)
    }
}

/// Configuration for the reflect loop
#[derive(Debug, Clone)]
pub struct ReflectConfig {
    /// Produce/critique pairs before giving up (at least 1)
    pub max_iterations: usize,
    /// Substring that signals satisfaction
    pub sentinel: String,
    /// User turn appended after each critique
    pub refine_instruction: String,
    pub step_timeout: Option<Duration>,
}

impl Default for ReflectConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            sentinel: DEFAULT_SENTINEL.to_string(),
            refine_instruction: DEFAULT_REFINE_INSTRUCTION.to_string(),
            step_timeout: None,
        }
    }
}

impl From<&WorkflowConfig> for ReflectConfig {
    fn from(config: &WorkflowConfig) -> Self {
        Self {
            max_iterations: config.reflect_max_iterations,
            step_timeout: config.step_timeout,
            ..Self::default()
        }
    }
}

/// Why the loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    Satisfied,
    BudgetExhausted,
}

/// One produce/critique pair
#[derive(Debug, Clone)]
pub struct Iteration {
    /// 1-indexed
    pub iteration: usize,
    pub artifact: String,
    pub verdict: Verdict,
    pub produce: StepTrace,
    pub critique: StepTrace,
}

/// Reflect execution trace
#[derive(Debug, Clone)]
pub struct ReflectTrace {
    pub name: String,
    pub iterations: Vec<Iteration>,
    pub termination: Termination,
    pub total_duration_ms: u64,
}

/// Final artifact of a reflect run
#[derive(Debug, Clone, PartialEq)]
pub struct ReflectOutput {
    pub artifact: String,
    pub iterations: usize,
    pub termination: Termination,
}

/// Produce/critique/refine loop
pub struct ReflectLoop {
    name: String,
    producer: Arc<dyn GenerationStep>,
    critic: Arc<dyn GenerationStep>,
    config: ReflectConfig,
}

impl std::fmt::Debug for ReflectLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReflectLoop")
            .field("name", &self.name)
            .field("producer", &self.producer.name())
            .field("critic", &self.critic.name())
            .field("config", &self.config)
            .finish()
    }
}

impl ReflectLoop {
    pub fn builder(
        producer: impl GenerationStep + 'static,
        critic: impl GenerationStep + 'static,
    ) -> ReflectBuilder {
        ReflectBuilder {
            name: "reflect".to_string(),
            producer: Arc::new(producer),
            critic: Arc::new(critic),
            config: ReflectConfig::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ReflectConfig {
        &self.config
    }

    /// Run the loop for `task`.
    ///
    /// The producer sees the whole ledger. The critic sees only `{{task}}`
    /// and `{{artifact}}` on an empty context.
    pub async fn execute(
        &self,
        ledger: &mut ContextLedger,
        task: &str,
    ) -> WorkflowResult<(ReflectOutput, ReflectTrace)> {
        let start = Instant::now();
        tracing::info!(
            workflow = %self.name,
            max_iterations = self.config.max_iterations,
            "Starting reflect loop"
        );

        ledger.append_user(task);
        let producer_input = StepInput::new(task).with("task", task);

        let mut iterations = Vec::with_capacity(self.config.max_iterations);
        let mut termination = Termination::BudgetExhausted;
        let mut artifact = String::new();

        for iteration in 1..=self.config.max_iterations {
            let (result, produce) = run_text_step(
                self.producer.as_ref(),
                ledger.turns(),
                &producer_input,
                self.config.step_timeout,
            )
            .await;
            artifact = result.map_err(|source| WorkflowError::IterationFailed {
                iteration,
                step: self.producer.name().to_string(),
                source,
            })?;
            ledger.append_assistant(artifact.clone());

            let critic_input = StepInput::new(&artifact)
                .with("task", task)
                .with("artifact", &artifact);
            let (result, critique) = run_text_step(
                self.critic.as_ref(),
                &[],
                &critic_input,
                self.config.step_timeout,
            )
            .await;
            let verdict = result
                .and_then(|raw| Verdict::parse(&raw, &self.config.sentinel))
                .map_err(|source| WorkflowError::IterationFailed {
                    iteration,
                    step: self.critic.name().to_string(),
                    source,
                })?;

            tracing::debug!(
                workflow = %self.name,
                iteration,
                satisfied = verdict.is_satisfied(),
                "Critique received"
            );

            let satisfied = verdict.is_satisfied();
            let last = iteration == self.config.max_iterations;
            if let Verdict::Revise(points) = &verdict {
                if !last {
                    ledger.append_user(format!("Critique of the previous version:\n{points}"));
                    ledger.append_user(self.config.refine_instruction.clone());
                }
            }

            iterations.push(Iteration {
                iteration,
                artifact: artifact.clone(),
                verdict,
                produce,
                critique,
            });

            if satisfied {
                termination = Termination::Satisfied;
                break;
            }
        }

        if termination == Termination::BudgetExhausted {
            tracing::warn!(
                workflow = %self.name,
                iterations = iterations.len(),
                "Iteration budget exhausted without satisfaction, returning last artifact"
            );
        } else {
            tracing::info!(workflow = %self.name, iterations = iterations.len(), "Critic satisfied");
        }

        let output = ReflectOutput {
            artifact,
            iterations: iterations.len(),
            termination,
        };
        let trace = ReflectTrace {
            name: self.name.clone(),
            iterations,
            termination,
            total_duration_ms: start.elapsed().as_millis() as u64,
        };

        Ok((output, trace))
    }

    /// Run on a fresh ledger
    pub async fn run(&self, task: &str) -> WorkflowResult<ReflectOutput> {
        let mut ledger = ContextLedger::new();
        let (output, _) = self.execute(&mut ledger, task).await?;
        Ok(output)
    }
}

/// Builder for [`ReflectLoop`]
pub struct ReflectBuilder {
    name: String,
    producer: Arc<dyn GenerationStep>,
    critic: Arc<dyn GenerationStep>,
    config: ReflectConfig,
}

impl ReflectBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn config(mut self, config: ReflectConfig) -> Self {
        self.config = config;
        self
    }

    pub fn max_iterations(mut self, max: usize) -> Self {
        self.config.max_iterations = max;
        self
    }

    pub fn sentinel(mut self, sentinel: impl Into<String>) -> Self {
        self.config.sentinel = sentinel.into();
        self
    }

    pub fn refine_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.config.refine_instruction = instruction.into();
        self
    }

    pub fn step_timeout(mut self, timeout: Duration) -> Self {
        self.config.step_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> WorkflowResult<ReflectLoop> {
        if self.config.max_iterations == 0 {
            return Err(WorkflowError::Configuration(
                "reflect loop needs at least one iteration".to_string(),
            ));
        }
        if self.config.sentinel.trim().is_empty() {
            return Err(WorkflowError::Configuration(
                "reflect sentinel must not be blank".to_string(),
            ));
        }

        Ok(ReflectLoop {
            name: self.name,
            producer: self.producer,
            critic: self.critic,
            config: self.config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{Role, Turn};
    use crate::llm::{GenerationErrorKind, GenerationRequest, LLMResponse};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Pops scripted replies in order; records each request's context
    struct Scripted {
        name: &'static str,
        replies: Mutex<VecDeque<Result<String, GenerationError>>>,
        contexts: Mutex<Vec<Vec<Turn>>>,
    }

    impl Scripted {
        fn new(name: &'static str, replies: Vec<Result<&str, GenerationError>>) -> Arc<Self> {
            Arc::new(Self {
                name,
                replies: Mutex::new(
                    replies
                        .into_iter()
                        .map(|r| r.map(str::to_string))
                        .collect(),
                ),
                contexts: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.contexts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl GenerationStep for Arc<Scripted> {
        fn name(&self) -> &str {
            self.name
        }

        fn request(&self, context: &[Turn], input: &StepInput) -> GenerationRequest {
            let mut turns = context.to_vec();
            if let Some(artifact) = input.get("artifact") {
                turns.push(Turn::user(format!(
                    "Original Task:\n{}\n\nArtifact to review:\n{artifact}",
                    input.get("task").unwrap_or_default()
                )));
            }
            self.contexts.lock().unwrap().push(turns.clone());
            GenerationRequest::new(turns)
        }

        async fn invoke(&self, _request: GenerationRequest) -> Result<LLMResponse, GenerationError> {
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("unscripted".to_string()))
                .map(LLMResponse::text)
        }
    }

    #[test]
    fn test_verdict_parse() {
        assert_eq!(
            Verdict::parse("Looks good. RESULT_IS_PERFECT", DEFAULT_SENTINEL).unwrap(),
            Verdict::Satisfied
        );
        assert_eq!(
            Verdict::parse("  Add a question on art.  ", DEFAULT_SENTINEL).unwrap(),
            Verdict::Revise("Add a question on art.".into())
        );
        let err = Verdict::parse(" \n ", DEFAULT_SENTINEL).unwrap_err();
        assert_eq!(err.kind, GenerationErrorKind::Malformed);
    }

    #[test]
    fn test_zero_iterations_rejected() {
        let producer = Scripted::new("produce", vec![]);
        let critic = Scripted::new("critique", vec![]);
        let err = ReflectLoop::builder(producer, critic)
            .max_iterations(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_refine_feeds_critique_back() {
        let producer = Scripted::new("produce", vec![Ok("draft 1"), Ok("draft 2")]);
        let critic = Scripted::new("critique", vec![Ok("Too short."), Ok("RESULT_IS_PERFECT")]);
        let reflect = ReflectLoop::builder(producer.clone(), critic.clone())
            .build()
            .unwrap();

        let mut ledger = ContextLedger::new();
        let (output, trace) = reflect
            .execute(&mut ledger, "Write a questionnaire")
            .await
            .unwrap();

        assert_eq!(output.artifact, "draft 2");
        assert_eq!(output.termination, Termination::Satisfied);
        assert_eq!(trace.iterations.len(), 2);

        // task, draft 1, critique, instruction, draft 2
        let contents: Vec<&str> = ledger.turns().iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents[0], "Write a questionnaire");
        assert_eq!(contents[1], "draft 1");
        assert_eq!(contents[2], "Critique of the previous version:\nToo short.");
        assert_eq!(contents[3], DEFAULT_REFINE_INSTRUCTION);
        assert_eq!(contents[4], "draft 2");
        assert_eq!(ledger.turns()[2].role, Role::User);

        // the critic never sees the conversation, only task and artifact
        let critic_contexts = critic.contexts.lock().unwrap();
        assert_eq!(critic_contexts[1].len(), 1);
        assert!(critic_contexts[1][0].content.contains("draft 2"));
        assert!(critic_contexts[1][0].content.contains("Write a questionnaire"));
    }

    #[tokio::test]
    async fn test_critic_failure_aborts_with_iteration() {
        let producer = Scripted::new("produce", vec![Ok("draft 1"), Ok("draft 2")]);
        let critic = Scripted::new(
            "critique",
            vec![Ok("Needs work."), Err(GenerationError::timeout("slow"))],
        );
        let reflect = ReflectLoop::builder(producer.clone(), critic)
            .build()
            .unwrap();

        let err = reflect.run("task").await.unwrap_err();
        match err {
            WorkflowError::IterationFailed { iteration, step, source } => {
                assert_eq!(iteration, 2);
                assert_eq!(step, "critique");
                assert_eq!(source.kind, GenerationErrorKind::Timeout);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(producer.calls(), 2);
    }

    #[tokio::test]
    async fn test_empty_critique_is_malformed() {
        let producer = Scripted::new("produce", vec![Ok("draft")]);
        let critic = Scripted::new("critique", vec![Ok("   ")]);
        let reflect = ReflectLoop::builder(producer, critic).build().unwrap();

        let err = reflect.run("task").await.unwrap_err();
        assert_eq!(
            err.generation_error().map(|e| e.kind),
            Some(GenerationErrorKind::Malformed)
        );
    }
}
