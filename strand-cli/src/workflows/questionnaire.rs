//! Questionnaire writing with a historian critic

use std::sync::Arc;

use anyhow::Result;
use strand_core::config::StrandConfig;
use strand_core::ledger::ContextLedger;
use strand_core::llm::LLMProvider;
use strand_core::workflow::{LlmStep, ReflectConfig, ReflectLoop, Termination, Verdict};

pub const DEFAULT_TASK: &str = "Your task is to write a 10 questions questionnaire about the renaissance.
It should test understanding of the period and not only recall facts.

The questions should be in the following format:
Question {number}: {question}

The answers should be in the following format:
Answer {number}: {answer}";

const CRITIC_PROMPT: &str = "You are a historian and an expert in the Renaissance.
Your role is to perform a meticulous questionnaire review.
Critically evaluate the provided questionnaire based on the original task requirements.
Look for questions that are not relevant to the Renaissance, are based on fact recalls and not understanding, too hard for a high school level knowledge, and areas for improvement.
Focus on critiquing, not rewriting, fixing nor answering the question. You are here to comment on areas of improvement.
Be precise on which questions to improve and how to improve them.

## Output
If the questionnaire meets all requirements, respond with the single phrase 'RESULT_IS_PERFECT'.
Otherwise, provide a bulleted list of your critique.";

const REVIEW_REQUEST: &str = "Original Task:\n{{task}}\n\nQuestionnaire to review:\n{{artifact}}";

pub fn build(provider: Arc<dyn LLMProvider>, config: &StrandConfig) -> Result<ReflectLoop> {
    let writer = LlmStep::builder("questionnaire", provider.clone())
        .temperature(0.1)
        .build();
    let critic = LlmStep::builder("historian", provider)
        .system_prompt(CRITIC_PROMPT)
        .prompt(REVIEW_REQUEST)
        .temperature(0.1)
        .build();

    let reflect = ReflectLoop::builder(writer, critic)
        .name("questionnaire")
        .config(ReflectConfig::from(&config.workflow))
        .refine_instruction("Please refine the questionnaire using the critique provided")
        .build()?;

    Ok(reflect)
}

pub async fn run(provider: Arc<dyn LLMProvider>, config: &StrandConfig, task: &str) -> Result<()> {
    println!("🔗 Reflection Workflow");

    let reflect = build(provider, config)?;
    let mut ledger = ContextLedger::new();
    let (output, trace) = reflect.execute(&mut ledger, task).await?;

    let banner = "=".repeat(25);
    for iteration in &trace.iterations {
        println!("\n{banner}Reflexion loop: Iteration {}{banner}", iteration.iteration);
        println!("\n--- Generated Questionnaire (v{}) ---\n", iteration.iteration);
        println!("{}", iteration.artifact);
        match &iteration.verdict {
            Verdict::Satisfied => {
                println!("\n---Critique---\nNo further critique found. The questionnaire is satisfactory.")
            }
            Verdict::Revise(points) => println!("\n--- Critique ---\n{points}"),
        }
    }

    println!("\n{banner}Final result{banner}");
    if output.termination == Termination::BudgetExhausted {
        println!("\n(stopped after {} iterations without approval)", output.iterations);
    }
    println!("\nFinal refined questionnaire after the reflection process:\n");
    println!("{}", output.artifact);
    Ok(())
}
