//! Comment analysis fanned out over four independent branches

use std::sync::Arc;

use anyhow::Result;
use strand_core::config::StrandConfig;
use strand_core::ledger::ContextLedger;
use strand_core::llm::LLMProvider;
use strand_core::workflow::{BranchStatus, LlmStep, ParallelConfig, ParallelJoin, StepInput};

const BRANCHES: [(&str, &str); 4] = [
    ("sentiment", "Analyze the sentiment of the following comment:"),
    (
        "criteria",
        "Validate if the following comment meets these criteria:
- The comment must be objective
- The comment must be constructive
- The comment must be helpful
- The comment must be relevant",
    ),
    ("response", "Generate a diplomatic response to the following comment:"),
    ("key_points", "Extract the key points from the following comment:"),
];

const SYNTHESIS_PROMPT: &str = "Based on the following information:
Sentiment {{sentiment}}
Criteria {{criteria}}
Response {{response}}
Key points {{key_points}}

Synthesize the relationship between the sentiment, criteria and response in a short and concise manner.";

pub fn build(provider: Arc<dyn LLMProvider>, config: &StrandConfig) -> Result<ParallelJoin> {
    let step = |name: &str, system: &str| {
        LlmStep::builder(name, provider.clone())
            .system_prompt(system)
            .prompt("{{input}}")
            .temperature(config.llm.temperature)
            .build()
    };

    let mut builder = ParallelJoin::builder()
        .name("comment_analysis")
        .config(ParallelConfig::from(&config.workflow));
    for (label, system) in BRANCHES {
        builder = builder.branch(label, step(label, system));
    }

    Ok(builder.synthesis(step("synthesis", SYNTHESIS_PROMPT)).build()?)
}

pub async fn run(provider: Arc<dyn LLMProvider>, config: &StrandConfig, comment: &str) -> Result<()> {
    println!("🔗 Parallelization Workflow");

    let join = build(provider, config)?;
    let mut ledger = ContextLedger::new();
    let (output, trace) = join
        .execute(&mut ledger, &StepInput::new(comment))
        .await?;

    for branch in &trace.branches {
        if branch.status == BranchStatus::Completed {
            println!("✅ Completed {} ({} ms)", branch.label, branch.duration_ms);
        }
        if let Some(result) = output.branches.get(&branch.label) {
            println!("Result: {result}\n");
        }
    }

    println!("\n----- Result -----\n");
    println!("{}", output.synthesis);
    Ok(())
}
