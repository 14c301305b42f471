//! End-to-end tests for the workflow patterns
//!
//! Every pattern runs real `LlmStep`s against a scripted provider, so these
//! exercise request building, ledger threading and error mapping together.
//! Time is paused; provider delays advance the virtual clock only.

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

use std::result::Result;
use strand_core::prelude::*;
use strand_core::workflow::BranchStatus;

type Reply = (Duration, Result<LLMResponse, GenerationError>);

/// Answers each request through a closure and records what it saw
struct ScriptedProvider {
    handler: Box<dyn Fn(&GenerationRequest) -> Reply + Send + Sync>,
    requests: Mutex<Vec<GenerationRequest>>,
    finished: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&GenerationRequest) -> Reply + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
            finished: Mutex::new(Vec::new()),
        })
    }

    fn prompts(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| last_content(r).to_string())
            .collect()
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    async fn generate(&self, request: &GenerationRequest) -> Result<LLMResponse, GenerationError> {
        self.requests.lock().unwrap().push(request.clone());
        let (delay, reply) = (self.handler)(request);
        tokio::time::sleep(delay).await;
        self.finished
            .lock()
            .unwrap()
            .push(last_content(request).to_string());
        reply
    }
}

fn last_content(request: &GenerationRequest) -> &str {
    request
        .context()
        .last()
        .map(|t| t.content.as_str())
        .unwrap_or_default()
}

fn text(reply: impl Into<String>) -> Reply {
    (Duration::ZERO, Ok(LLMResponse::text(reply)))
}

fn step(name: &str, provider: &Arc<ScriptedProvider>, prompt: &str) -> LlmStep {
    LlmStep::builder(name, provider.clone() as Arc<dyn LLMProvider>)
        .prompt(prompt)
        .build()
}

fn bare_step(name: &str, provider: &Arc<ScriptedProvider>) -> LlmStep {
    LlmStep::builder(name, provider.clone() as Arc<dyn LLMProvider>).build()
}

#[tokio::test(start_paused = true)]
async fn chain_threads_outputs_and_ledger_survives_the_wire() {
    let provider = ScriptedProvider::new(|request| {
        let prompt = last_content(request);
        if prompt.starts_with("List topics") {
            text("1. Ownership\n2. Lifetimes")
        } else if prompt.starts_with("Pick one") {
            // the topic list must be visible to the second step
            assert!(request.context().iter().any(|t| t.content.contains("Lifetimes")));
            text("Lifetimes")
        } else {
            assert!(request.context().iter().any(|t| t.content == "Lifetimes"));
            text("Outline: what, why, how")
        }
    });

    let chain = Chain::builder()
        .name("content")
        .step(step("topics", &provider, "List topics about {{input}}"))
        .step(step("select", &provider, "Pick one topic for a post about {{input}}"))
        .step(step("outline", &provider, "Outline the chosen topic"))
        .build()
        .unwrap();

    let mut ledger = ContextLedger::with_system("You are a technical writer.");
    let (output, trace) = assert_ok!(chain.execute(&mut ledger, &StepInput::new("Rust")).await);

    assert_eq!(output.last(), Some("Outline: what, why, how"));
    assert_eq!(trace.completed_steps(), 3);
    assert_eq!(ledger.len(), 4);
    assert_eq!(provider.prompts()[1], "Pick one topic for a post about Rust");

    let wire = ledger.to_wire().unwrap();
    let restored = ContextLedger::from_wire(&wire).unwrap();
    assert_eq!(restored.turns(), ledger.turns());
}

#[tokio::test(start_paused = true)]
async fn router_dispatches_exactly_one_handler() {
    let provider = ScriptedProvider::new(|request| {
        let prompt = last_content(request);
        if prompt.starts_with("Classify") {
            if prompt.contains("rain") {
                text(" weather \n")
            } else {
                text("sports")
            }
        } else {
            text(format!("handled: {prompt}"))
        }
    });

    let router = Router::builder()
        .name("assistant")
        .classifier(step("classify", &provider, "Classify: {{input}}"))
        .labels(LabelSet::new(["weather", "news", "unclear"], "unclear").unwrap())
        .step_route("weather", step("weather", &provider, "Forecast for {{input}}"))
        .step_route("news", step("news", &provider, "Headlines for {{input}}"))
        .route(
            "unclear",
            RouteHandler::function(|request| format!("Could not classify: {request}")),
        )
        .build()
        .unwrap();

    let routed = assert_ok!(router.run("Will it rain in Oslo?").await);
    assert_eq!(routed.decision.label, "weather");
    assert!(routed.decision.recognized);
    assert_eq!(routed.output, "handled: Forecast for Will it rain in Oslo?");

    let mut ledger = ContextLedger::new();
    let (fallback, trace) = assert_ok!(router.execute(&mut ledger, "Who won?").await);
    assert_eq!(fallback.decision.label, "unclear");
    assert!(!fallback.decision.recognized);
    assert_eq!(fallback.decision.raw, "sports");
    assert_eq!(fallback.output, "Could not classify: Who won?");
    assert_eq!(trace.handler.steps.len(), 1);
    assert_eq!(ledger.last().map(|t| t.content.as_str()), Some("Could not classify: Who won?"));

    // classify + weather handler, then classify only
    assert_eq!(provider.requests.lock().unwrap().len(), 3);
}

fn branch_delay(prompt: &str) -> Option<(&'static str, u64)> {
    [("sentiment", 40), ("criteria", 30), ("response", 20), ("key_points", 10)]
        .into_iter()
        .find(|(label, _)| prompt.starts_with(label))
}

fn analysis_join(provider: &Arc<ScriptedProvider>) -> ParallelJoin {
    ParallelJoin::builder()
        .name("analysis")
        .branch("sentiment", step("sentiment", provider, "sentiment of {{input}}"))
        .branch("criteria", step("criteria", provider, "criteria in {{input}}"))
        .branch("response", step("response", provider, "response to {{input}}"))
        .branch("key_points", step("key_points", provider, "key_points of {{input}}"))
        .synthesis(step(
            "synthesis",
            provider,
            "SYNTH s={{sentiment}} c={{criteria}} r={{response}} k={{key_points}} in={{input}}",
        ))
        .build()
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn parallel_join_collects_by_label_regardless_of_finish_order() {
    let provider = ScriptedProvider::new(|request| {
        let prompt = last_content(request);
        match branch_delay(prompt) {
            Some((label, ms)) => (
                Duration::from_millis(ms),
                Ok(LLMResponse::text(format!("{label}-done"))),
            ),
            None => text(prompt),
        }
    });
    let join = analysis_join(&provider);

    let started = tokio::time::Instant::now();
    let mut ledger = ContextLedger::new();
    let (output, trace) = assert_ok!(join.execute(&mut ledger, &StepInput::new("the email")).await);

    // branches overlap: the slowest one bounds the wall time
    assert!(started.elapsed() < Duration::from_millis(80));

    let finished = provider.finished.lock().unwrap().clone();
    assert_eq!(
        &finished[..4],
        &[
            "key_points of the email",
            "response to the email",
            "criteria in the email",
            "sentiment of the email"
        ]
    );

    assert_eq!(
        output.synthesis,
        "SYNTH s=sentiment-done c=criteria-done r=response-done k=key_points-done in=the email"
    );
    assert_eq!(output.branches.len(), 4);
    assert_eq!(output.branches["criteria"], "criteria-done");

    let labels: Vec<&str> = trace.branches.iter().map(|b| b.label.as_str()).collect();
    assert_eq!(labels, ["sentiment", "criteria", "response", "key_points"]);
    assert!(trace.branches.iter().all(|b| b.status == BranchStatus::Completed));
    assert!(trace.synthesis.is_some());
    assert_eq!(ledger.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn parallel_join_failure_cancels_siblings_and_skips_synthesis() {
    let provider = ScriptedProvider::new(|request| {
        let prompt = last_content(request);
        if prompt.starts_with("criteria") {
            (
                Duration::from_millis(5),
                Err(GenerationError::unavailable("rate limited")),
            )
        } else if prompt.starts_with("SYNTH") {
            text("should not run")
        } else {
            (Duration::from_secs(30), Ok(LLMResponse::text("late")))
        }
    });
    let join = analysis_join(&provider);

    let started = tokio::time::Instant::now();
    let mut ledger = ContextLedger::new();
    let err = assert_err!(join.execute(&mut ledger, &StepInput::new("the email")).await);

    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(ledger.is_empty());
    assert!(!provider.prompts().iter().any(|p| p.starts_with("SYNTH")));

    assert_eq!(err.failed_branches().len(), 1);
    let failures = match err {
        WorkflowError::BranchesFailed { failures } => failures,
        other => panic!("unexpected error: {other}"),
    };
    assert_eq!(failures.len(), 4);
    let failed: Vec<&str> = failures
        .iter()
        .filter(|f| !f.is_cancelled())
        .map(|f| f.label.as_str())
        .collect();
    assert_eq!(failed, ["criteria"]);
    assert_eq!(failures[1].index, 1);
    assert!(matches!(
        &failures[1].outcome,
        BranchOutcome::Failed(e) if e.kind == GenerationErrorKind::Unavailable
    ));
    for index in [0, 2, 3] {
        assert_eq!(failures[index].index, index);
        assert!(failures[index].is_cancelled());
    }
}

fn reflect_loop(provider: &Arc<ScriptedProvider>, max_iterations: usize) -> ReflectLoop {
    ReflectLoop::builder(
        bare_step("questionnaire", provider),
        step(
            "review",
            provider,
            "Original Task:\n{{task}}\n\nReview this questionnaire:\n{{artifact}}",
        ),
    )
    .max_iterations(max_iterations)
    .build()
    .unwrap()
}

fn drafting_provider(critique: &'static str) -> Arc<ScriptedProvider> {
    let drafts = Arc::new(Mutex::new(0));
    ScriptedProvider::new(move |request| {
        if last_content(request).starts_with("Original Task:") {
            text(critique)
        } else {
            let mut n = drafts.lock().unwrap();
            *n += 1;
            text(format!("draft {n}"))
        }
    })
}

#[tokio::test(start_paused = true)]
async fn reflect_stops_when_first_critique_is_satisfied() {
    let provider = drafting_provider("All questions are clear. RESULT_IS_PERFECT");
    let reflect = reflect_loop(&provider, 3);

    let mut ledger = ContextLedger::new();
    let (output, trace) = assert_ok!(reflect.execute(&mut ledger, "Questionnaire for a dog owner").await);

    assert_eq!(output.artifact, "draft 1");
    assert_eq!(output.iterations, 1);
    assert_eq!(output.termination, Termination::Satisfied);
    assert_eq!(trace.iterations[0].verdict, Verdict::Satisfied);
    assert_eq!(provider.requests.lock().unwrap().len(), 2);
    assert_eq!(ledger.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn reflect_returns_last_artifact_when_never_satisfied() {
    let provider = drafting_provider("Add a question about walks.");
    let reflect = reflect_loop(&provider, 3);

    let mut ledger = ContextLedger::new();
    let (output, trace) = assert_ok!(reflect.execute(&mut ledger, "Questionnaire for a dog owner").await);

    assert_eq!(output.artifact, "draft 3");
    assert_eq!(output.iterations, 3);
    assert_eq!(output.termination, Termination::BudgetExhausted);
    assert_eq!(trace.iterations.len(), 3);

    // task, then draft + critique + instruction twice, then the final draft
    assert_eq!(ledger.len(), 8);
    assert_eq!(ledger.last().map(|t| t.content.as_str()), Some("draft 3"));
    assert_eq!(
        ledger.turns()[2].content,
        "Critique of the previous version:\nAdd a question about walks."
    );

    // the third producer call sees both earlier drafts
    let requests = provider.requests.lock().unwrap();
    let third = &requests[4];
    assert!(third.context().iter().any(|t| t.content == "draft 1"));
    assert!(third.context().iter().any(|t| t.content == "draft 2"));
}

fn book_registry() -> Arc<ToolRegistry> {
    let books = Arc::new(vec![
        json!({"title": "The Great Gatsby", "author": "F. Scott Fitzgerald", "copies": 3}),
        json!({"title": "1984", "author": "George Orwell", "copies": 5}),
        json!({"title": "Pride and Prejudice", "author": "Jane Austen", "copies": 2}),
    ]);

    let mut registry = ToolRegistry::new();
    registry
        .register(Arc::new(FnTool::new(
            ToolSchema::single_string(
                "search_database",
                "Search the book database by title or author",
                "query",
                "Title or author to look for",
            ),
            move |args: Map<String, Value>| {
                let books = books.clone();
                async move {
                    let query = args
                        .get("query")
                        .and_then(Value::as_str)
                        .ok_or_else(|| ToolError::InvalidArguments("missing 'query'".into()))?
                        .to_lowercase();
                    let hits: Vec<Value> = books
                        .iter()
                        .filter(|b| {
                            ["title", "author"].iter().any(|k| {
                                b[*k].as_str().is_some_and(|v| v.to_lowercase().contains(&query))
                            })
                        })
                        .cloned()
                        .collect();
                    Ok(Value::Array(hits))
                }
            },
        )))
        .unwrap();
    Arc::new(registry)
}

fn call(id: &str, name: &str, query: &str) -> ToolInvocation {
    let mut args = Map::new();
    args.insert("query".into(), json!(query));
    ToolInvocation::new(id, name, args)
}

#[tokio::test(start_paused = true)]
async fn tool_loop_executes_calls_in_order_then_answers() {
    let provider = ScriptedProvider::new(|request| {
        match request.context().last().map(|t| t.role) {
            Some(Role::Tool) => text("Gatsby has 3 copies and 1984 has 5."),
            _ => (
                Duration::ZERO,
                Ok(LLMResponse::tool_calls(vec![
                    call("call_1", "search_database", "Gatsby"),
                    call("call_2", "search_database", "Orwell"),
                ])),
            ),
        }
    });
    let tool_loop = ToolLoop::builder(bare_step("librarian", &provider), book_registry())
        .build()
        .unwrap();

    let mut ledger = ContextLedger::with_system("You can search a database of books.");
    ledger.append_user("How many copies of Gatsby and of Orwell's book?");
    let (output, trace) = assert_ok!(tool_loop.execute(&mut ledger).await);

    assert_eq!(output.answer, "Gatsby has 3 copies and 1984 has 5.");
    assert_eq!(output.rounds, 1);
    assert_eq!(trace.tool_calls.len(), 2);
    assert!(trace.tool_calls.iter().all(|c| c.error.is_none()));

    let roles: Vec<Role> = ledger.turns().iter().map(|t| t.role).collect();
    assert_eq!(
        roles,
        [Role::System, Role::User, Role::Assistant, Role::Tool, Role::Tool, Role::Assistant]
    );
    assert_eq!(ledger.turns()[2].tool_calls.len(), 2);
    assert_eq!(ledger.turns()[3].tool_call_id.as_deref(), Some("call_1"));
    assert_eq!(ledger.turns()[4].tool_call_id.as_deref(), Some("call_2"));

    let first: Value = serde_json::from_str(&ledger.turns()[3].content).unwrap();
    assert_eq!(first[0]["copies"], 3);
    let second: Value = serde_json::from_str(&ledger.turns()[4].content).unwrap();
    assert_eq!(second[0]["title"], "1984");

    let requests = provider.requests.lock().unwrap();
    assert_eq!(requests.len(), 2);
    assert!(requests.iter().all(|r| r.parameters().tools.len() == 1));
}

#[tokio::test(start_paused = true)]
async fn tool_loop_feeds_unknown_tool_error_back_and_runs_the_rest() {
    let provider = ScriptedProvider::new(|request| {
        match request.context().last().map(|t| t.role) {
            Some(Role::Tool) => text("No weather tool, but 1984 has 5 copies."),
            _ => (
                Duration::ZERO,
                Ok(LLMResponse::tool_calls(vec![
                    call("call_9", "lookup_weather", "Oslo"),
                    call("call_10", "search_database", "1984"),
                ])),
            ),
        }
    });
    let tool_loop = ToolLoop::builder(bare_step("librarian", &provider), book_registry())
        .build()
        .unwrap();

    let mut ledger = ContextLedger::new();
    ledger.append_user("Weather in Oslo, and copies of 1984?");
    let (output, trace) = assert_ok!(tool_loop.execute(&mut ledger).await);

    assert_eq!(output.answer, "No weather tool, but 1984 has 5 copies.");
    assert_eq!(output.rounds, 1);

    let placeholder: Value = serde_json::from_str(&ledger.turns()[2].content).unwrap();
    assert_eq!(placeholder, json!({"error": "unknown tool 'lookup_weather'"}));
    assert_eq!(ledger.turns()[2].tool_call_id.as_deref(), Some("call_9"));

    let found: Value = serde_json::from_str(&ledger.turns()[3].content).unwrap();
    assert_eq!(found[0]["copies"], 5);
    assert_eq!(ledger.turns()[3].tool_call_id.as_deref(), Some("call_10"));

    assert_eq!(trace.tool_calls.len(), 2);
    assert!(trace.tool_calls[0].error.is_some());
    assert!(trace.tool_calls[1].error.is_none());
    assert_eq!(provider.requests.lock().unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn step_timeout_surfaces_as_timeout_error() {
    let provider = ScriptedProvider::new(|_| (Duration::from_secs(600), Ok(LLMResponse::text("late"))));
    let chain = Chain::builder()
        .step(step("slow", &provider, "{{input}}"))
        .step_timeout(Duration::from_secs(5))
        .build()
        .unwrap();

    let err = assert_err!(chain.run("anything").await);
    assert_eq!(
        err.generation_error().map(|e| e.kind),
        Some(GenerationErrorKind::Timeout)
    );
}
