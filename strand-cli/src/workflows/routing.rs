//! Coordinator that routes a request to a specialist handler

use std::sync::Arc;

use anyhow::Result;
use strand_core::config::StrandConfig;
use strand_core::llm::LLMProvider;
use strand_core::workflow::{LabelSet, LlmStep, Router};

const COORDINATOR_PROMPT: &str = r#"Analyze the user's request and determine which handler should process it:
- If the user is asking about the weather, output "weather".
- If the user is asking about the news, output "news".
- If the user is asking about the stock market, output "stock_market".
- If the request is unclear or not related to the above topics, output "unclear".

IMPORTANT: Only output one word: the name of the specialist. Possible values are: "weather", "news", "stock_market", "unclear"."#;

pub fn build(provider: Arc<dyn LLMProvider>, config: &StrandConfig) -> Result<Router> {
    let coordinator = LlmStep::builder("coordinator", provider)
        .system_prompt(COORDINATOR_PROMPT)
        .prompt("{{input}}")
        .model("gpt-4.1-nano")
        .temperature(0.0)
        .build();

    let router = Router::builder()
        .name("coordinator")
        .classifier(coordinator)
        .labels(LabelSet::new(
            ["weather", "news", "stock_market", "unclear"],
            "unclear",
        )?)
        .workflow_config(&config.workflow)
        .function_route("weather", |request| format!("Weather handler: {request}"))
        .function_route("news", |request| format!("News handler: {request}"))
        .function_route("stock_market", |request| {
            format!("Stock market handler: {request}")
        })
        .function_route("unclear", |request| {
            format!("Unclear handler: {request}. Please clarify.")
        })
        .build()?;

    Ok(router)
}

pub async fn run(provider: Arc<dyn LLMProvider>, config: &StrandConfig, request: &str) -> Result<()> {
    let router = build(provider, config)?;
    let routed = router.run(request).await?;

    println!("Passing request to {} handler", routed.decision.label.replace('_', " "));
    println!("{}", routed.output);
    Ok(())
}
