//! Router Workflow Pattern
//!
//! One classification step picks a label, then exactly one registered
//! handler runs. Output that matches no label goes to the fallback label.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::WorkflowConfig;
use crate::ledger::ContextLedger;

use super::chain::Chain;
use super::execution::{ExecutionTrace, StepTrace, WorkflowError, WorkflowResult};
use super::step::{GenerationStep, StepInput, run_text_step};

/// How classifier output is compared with labels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    /// The whole trimmed output must equal a label
    #[default]
    Exact,
    /// Only the first whitespace-delimited token is compared
    FirstToken,
}

/// Closed set of route labels with a designated fallback
#[derive(Debug, Clone, PartialEq)]
pub struct LabelSet {
    labels: Vec<String>,
    fallback: String,
}

impl LabelSet {
    /// The fallback must be one of `labels`; labels must be unique and non-empty
    pub fn new<I, S>(labels: I, fallback: impl Into<String>) -> WorkflowResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let labels: Vec<String> = labels.into_iter().map(Into::into).collect();
        let fallback = fallback.into();

        if let Some(label) = labels.iter().find(|l| l.trim().is_empty()) {
            return Err(WorkflowError::Configuration(format!(
                "route label {label:?} is blank"
            )));
        }
        for (i, label) in labels.iter().enumerate() {
            if labels[..i].contains(label) {
                return Err(WorkflowError::Configuration(format!(
                    "route label '{label}' is listed twice"
                )));
            }
        }
        if !labels.contains(&fallback) {
            return Err(WorkflowError::Configuration(format!(
                "fallback label '{fallback}' is not in the label set"
            )));
        }

        Ok(Self { labels, fallback })
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn fallback(&self) -> &str {
        &self.fallback
    }

    pub fn contains(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

/// Parsed classifier output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDecision {
    /// Label to dispatch on
    pub label: String,
    /// Classifier output as received
    pub raw: String,
    /// False when `label` is the fallback because nothing matched
    pub recognized: bool,
}

impl RouteDecision {
    /// Map raw classifier text onto the label set. Matching is case-sensitive.
    pub fn parse(raw: &str, labels: &LabelSet, policy: MatchPolicy) -> Self {
        let trimmed = raw.trim();
        let candidate = match policy {
            MatchPolicy::Exact => trimmed,
            MatchPolicy::FirstToken => trimmed.split_whitespace().next().unwrap_or(""),
        };

        match labels.labels.iter().find(|l| l.as_str() == candidate) {
            Some(label) => Self {
                label: label.clone(),
                raw: raw.to_string(),
                recognized: true,
            },
            None => Self {
                label: labels.fallback.clone(),
                raw: raw.to_string(),
                recognized: false,
            },
        }
    }
}

/// Plain function handler; receives the original request text
pub type RouteFn = dyn Fn(&str) -> String + Send + Sync;

/// What runs for a label
#[derive(Clone)]
pub enum RouteHandler {
    Step(Arc<dyn GenerationStep>),
    Chain(Arc<Chain>),
    Function(Arc<RouteFn>),
}

impl std::fmt::Debug for RouteHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouteHandler::Step(step) => f.debug_tuple("Step").field(&step.name()).finish(),
            RouteHandler::Chain(chain) => f.debug_tuple("Chain").field(&chain.name()).finish(),
            RouteHandler::Function(_) => f.debug_tuple("Function").finish(),
        }
    }
}

impl RouteHandler {
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        RouteHandler::Function(Arc::new(f))
    }

    /// Run the handler; its output is appended to `ledger` as an assistant turn
    ///
    /// Step indices in handler failures count the classifier as step 0, so a
    /// chain handler's first step reports index 1.
    async fn run(
        &self,
        label: &str,
        ledger: &mut ContextLedger,
        request: &str,
        timeout: Option<Duration>,
    ) -> WorkflowResult<(String, ExecutionTrace)> {
        let mut trace = ExecutionTrace::new(format!("route:{label}"));
        let input = StepInput::new(request);

        match self {
            RouteHandler::Step(step) => {
                let (result, step_trace) =
                    run_text_step(step.as_ref(), ledger.turns(), &input, timeout).await;
                trace.add_step(step_trace);
                let text = result.map_err(|source| WorkflowError::StepFailed {
                    index: 1,
                    step: step.name().to_string(),
                    source,
                })?;
                ledger.append_assistant(text.clone());
                Ok((text, trace))
            }
            RouteHandler::Chain(chain) => {
                let (output, chain_trace) =
                    chain.execute(ledger, &input).await.map_err(|err| match err {
                        WorkflowError::StepFailed { index, step, source } => {
                            WorkflowError::StepFailed { index: index + 1, step, source }
                        }
                        other => other,
                    })?;
                trace.extend(chain_trace);
                let text = output.last().unwrap_or_default().to_string();
                Ok((text, trace))
            }
            RouteHandler::Function(f) => {
                let started = Instant::now();
                let text = f(request);
                trace.add_step(StepTrace::success(label, Some(text.clone()), started.elapsed()));
                ledger.append_assistant(text.clone());
                Ok((text, trace))
            }
        }
    }
}

/// Result of a routed run
#[derive(Debug, Clone, PartialEq)]
pub struct RouteOutput {
    pub decision: RouteDecision,
    pub output: String,
}

/// Router execution trace
#[derive(Debug, Clone)]
pub struct RouterExecutionTrace {
    pub router_name: String,
    pub decision: RouteDecision,
    /// Trace of the classification step
    pub classification: StepTrace,
    /// Trace of the dispatched handler
    pub handler: ExecutionTrace,
    pub total_duration_ms: u64,
}

/// Classify-then-dispatch workflow
pub struct Router {
    name: String,
    classifier: Arc<dyn GenerationStep>,
    labels: LabelSet,
    policy: MatchPolicy,
    handlers: HashMap<String, RouteHandler>,
    step_timeout: Option<Duration>,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("name", &self.name)
            .field("classifier", &self.classifier.name())
            .field("labels", &self.labels)
            .field("policy", &self.policy)
            .finish()
    }
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    /// Run the classification step and parse its output
    pub async fn classify(
        &self,
        ledger: &ContextLedger,
        request: &str,
    ) -> WorkflowResult<(RouteDecision, StepTrace)> {
        let (result, trace) = run_text_step(
            self.classifier.as_ref(),
            ledger.turns(),
            &StepInput::new(request),
            self.step_timeout,
        )
        .await;

        let raw = result.map_err(|source| WorkflowError::StepFailed {
            index: 0,
            step: self.classifier.name().to_string(),
            source,
        })?;

        let decision = RouteDecision::parse(&raw, &self.labels, self.policy);
        if decision.recognized {
            tracing::debug!(router = %self.name, label = %decision.label, "Classified request");
        } else {
            tracing::warn!(
                router = %self.name,
                raw = %decision.raw,
                fallback = %decision.label,
                "Classifier output matched no label, using fallback"
            );
        }

        Ok((decision, trace))
    }

    /// Run the handler registered for `decision.label`.
    ///
    /// A label without a handler is a configuration error, never a fallback.
    pub async fn dispatch(
        &self,
        decision: &RouteDecision,
        ledger: &mut ContextLedger,
        request: &str,
    ) -> WorkflowResult<(String, ExecutionTrace)> {
        let handler = self.handlers.get(&decision.label).ok_or_else(|| {
            WorkflowError::Configuration(format!(
                "router '{}' has no handler for label '{}'",
                self.name, decision.label
            ))
        })?;

        handler
            .run(&decision.label, ledger, request, self.step_timeout)
            .await
    }

    /// Classify `request` and run exactly one handler
    pub async fn execute(
        &self,
        ledger: &mut ContextLedger,
        request: &str,
    ) -> WorkflowResult<(RouteOutput, RouterExecutionTrace)> {
        let start = Instant::now();
        tracing::info!(router = %self.name, "Starting routed run");

        let (decision, classification) = self.classify(ledger, request).await?;
        let (output, handler) = self.dispatch(&decision, ledger, request).await?;

        tracing::info!(router = %self.name, label = %decision.label, "Routed run completed");

        let trace = RouterExecutionTrace {
            router_name: self.name.clone(),
            decision: decision.clone(),
            classification,
            handler,
            total_duration_ms: start.elapsed().as_millis() as u64,
        };

        Ok((RouteOutput { decision, output }, trace))
    }

    /// Route on a fresh ledger
    pub async fn run(&self, request: &str) -> WorkflowResult<RouteOutput> {
        let mut ledger = ContextLedger::new();
        let (output, _) = self.execute(&mut ledger, request).await?;
        Ok(output)
    }
}

/// Builder for Router
pub struct RouterBuilder {
    name: String,
    classifier: Option<Arc<dyn GenerationStep>>,
    labels: Option<LabelSet>,
    policy: MatchPolicy,
    handlers: Vec<(String, RouteHandler)>,
    step_timeout: Option<Duration>,
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self {
            name: "router".to_string(),
            classifier: None,
            labels: None,
            policy: MatchPolicy::default(),
            handlers: Vec::new(),
            step_timeout: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn classifier(mut self, step: impl GenerationStep + 'static) -> Self {
        self.classifier = Some(Arc::new(step));
        self
    }

    pub fn labels(mut self, labels: LabelSet) -> Self {
        self.labels = Some(labels);
        self
    }

    pub fn match_policy(mut self, policy: MatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn step_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// Take policy and timeout from shared runner settings
    pub fn workflow_config(self, config: &WorkflowConfig) -> Self {
        self.match_policy(config.route_match)
            .step_timeout(config.step_timeout)
    }

    pub fn route(mut self, label: impl Into<String>, handler: RouteHandler) -> Self {
        self.handlers.push((label.into(), handler));
        self
    }

    pub fn step_route(self, label: impl Into<String>, step: impl GenerationStep + 'static) -> Self {
        self.route(label, RouteHandler::Step(Arc::new(step)))
    }

    pub fn chain_route(self, label: impl Into<String>, chain: Chain) -> Self {
        self.route(label, RouteHandler::Chain(Arc::new(chain)))
    }

    pub fn function_route<F>(self, label: impl Into<String>, f: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.route(label, RouteHandler::function(f))
    }

    /// Build the router, checking that handlers and labels line up exactly
    pub fn build(self) -> WorkflowResult<Router> {
        let classifier = self.classifier.ok_or_else(|| {
            WorkflowError::Configuration(format!("router '{}' has no classifier", self.name))
        })?;
        let labels = self.labels.ok_or_else(|| {
            WorkflowError::Configuration(format!("router '{}' has no label set", self.name))
        })?;

        let mut handlers = HashMap::with_capacity(self.handlers.len());
        for (label, handler) in self.handlers {
            if !labels.contains(&label) {
                return Err(WorkflowError::Configuration(format!(
                    "router '{}' has a handler for unknown label '{label}'",
                    self.name
                )));
            }
            if handlers.insert(label.clone(), handler).is_some() {
                return Err(WorkflowError::Configuration(format!(
                    "router '{}' has two handlers for label '{label}'",
                    self.name
                )));
            }
        }

        if let Some(missing) = labels.labels().iter().find(|l| !handlers.contains_key(*l)) {
            return Err(WorkflowError::Configuration(format!(
                "router '{}' has no handler for label '{missing}'",
                self.name
            )));
        }

        Ok(Router {
            name: self.name,
            classifier,
            labels,
            policy: self.policy,
            handlers,
            step_timeout: self.step_timeout,
        })
    }
}

impl Default for RouterBuilder {
    fn default() -> Self {
        Self::new()
    }
}
