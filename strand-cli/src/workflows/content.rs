//! Content creation chain: topics, selection, outline, sections, review

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use strand_core::config::StrandConfig;
use strand_core::ledger::ContextLedger;
use strand_core::llm::LLMProvider;
use strand_core::parsing::JsonParser;
use strand_core::workflow::{Chain, ChainConfig, LlmStep, StepInput};

use crate::console;

const TOPICS_PROMPT: &str = "Generate exactly 5 creative and engaging topic ideas based on this field of interest: {{input}}

Return the topics as a JSON array of strings. Each topic should be:
- Specific and actionable
- Interesting to the target audience
- Suitable for creating detailed content

Format: [\"Topic 1\", \"Topic 2\", \"Topic 3\", \"Topic 4\", \"Topic 5\"]";

const OUTLINE_PROMPT: &str = "Create a detailed, comprehensive outline for an article about: {{input}}

The outline should include:
- Introduction section
- 3-5 main content sections with specific subtopics
- Conclusion section

Return as a JSON array of strings, where each string is a section heading.
Each section should be substantial enough to write 2-3 paragraphs about.

Format: [\"Section 1\", \"Section 2\", \"Section 3\", ...]";

const SECTION_PROMPT: &str = "Write a detailed draft section for: {{section}}

Topic: {{input}}
The sections written so far are in the conversation above.

Requirements:
- Write 2-3 substantial paragraphs
- Maintain consistency with previous sections
- Use engaging, informative tone
- Include specific examples or details where appropriate
- Ensure smooth transition from previous content

Focus on this section only, but ensure it flows naturally with the overall piece.";

const REVIEW_PROMPT: &str = "Review and refine the complete article draft about: {{input}}
The draft is made of the sections above.

Please improve the article by:
1. Ensuring smooth transitions between sections
2. Maintaining consistent tone throughout
3. Fixing any grammar or style issues
4. Improving clarity and flow
5. Adding or enhancing examples where helpful
6. Ensuring the conclusion ties everything together

Return the refined version of the complete article.";

pub async fn run(
    provider: Arc<dyn LLMProvider>,
    config: &StrandConfig,
    interest: &str,
    auto_select: bool,
) -> Result<()> {
    let parser = JsonParser::new();
    let temperature = config.llm.temperature;

    println!("🔗 Prompt Chaining Workflow");
    println!("{}", "=".repeat(50));

    println!("\n📝 Step 1: Generating topic ideas for '{interest}'...");
    let topics_chain = Chain::builder()
        .name("topics")
        .step(
            LlmStep::builder("topics", provider.clone())
                .prompt(TOPICS_PROMPT)
                .temperature(temperature)
                .expect_json()
                .build(),
        )
        .config(ChainConfig::from(&config.workflow))
        .build()?;
    let raw = topics_chain.run(interest).await?;
    let topics = parser
        .parse_string_list(raw.last().unwrap_or_default())
        .context("Topic list was not a JSON array of strings")?;
    if topics.is_empty() {
        bail!("the model returned no topics");
    }
    print_numbered("📝 Generated Topics:", &topics);

    println!("\n🎯 Step 2: Topic selection...");
    let topic = if auto_select {
        println!("\n🤖 Auto-selected topic: {}", topics[0]);
        topics[0].clone()
    } else {
        let index = console::choose("\nSelect a topic", topics.len())?;
        println!("\n✅ Selected: {}", topics[index]);
        topics[index].clone()
    };

    println!("\n📋 Step 3: Creating detailed outline...");
    let outline_chain = Chain::builder()
        .name("outline")
        .step(
            LlmStep::builder("outline", provider.clone())
                .prompt(OUTLINE_PROMPT)
                .temperature(temperature)
                .expect_json()
                .build(),
        )
        .config(ChainConfig::from(&config.workflow))
        .build()?;
    let raw = outline_chain.run(topic.as_str()).await?;
    let outline = parser
        .parse_string_list(raw.last().unwrap_or_default())
        .context("Outline was not a JSON array of strings")?;
    print_numbered("📋 Generated Outline:", &outline);

    println!(
        "\n✍️  Step 4-5: Writing {} draft sections, then reviewing...",
        outline.len()
    );
    let article = article_chain(&provider, config, &outline)?;
    let mut ledger = ContextLedger::new();
    let (output, trace) = article
        .execute(&mut ledger, &StepInput::new(topic.as_str()))
        .await?;
    for (step, section) in trace.steps.iter().zip(&outline) {
        println!("  • {section} ({} ms)", step.duration_ms);
    }

    let final_draft = output.last().unwrap_or_default();
    println!("\n✅ Workflow completed successfully!");

    println!("\n🎯 Final Article:");
    println!("{}", "=".repeat(50));
    println!("{final_draft}");

    println!("\n📊 Workflow Summary:");
    println!("• Interest: {interest}");
    println!("• Selected Topic: {topic}");
    println!("• Outline Sections: {}", outline.len());
    println!("• Final Word Count: {} words", final_draft.split_whitespace().count());
    if let Some(usage) = trace.total_token_usage() {
        println!("• Tokens: {}", usage.total_tokens);
    }

    Ok(())
}

/// One section step per outline entry, then the review step
fn article_chain(
    provider: &Arc<dyn LLMProvider>,
    config: &StrandConfig,
    outline: &[String],
) -> Result<Chain> {
    let mut builder = Chain::builder()
        .name("article")
        .config(ChainConfig::from(&config.workflow));

    for (i, section) in outline.iter().enumerate() {
        let prompt = StepInput::default()
            .with("section", section.as_str())
            .render(SECTION_PROMPT);
        builder = builder.step(
            LlmStep::builder(format!("section_{}", i + 1), provider.clone())
                .prompt(prompt)
                .temperature(config.llm.temperature)
                .build(),
        );
    }

    let review = LlmStep::builder("review", provider.clone())
        .prompt(REVIEW_PROMPT)
        .temperature(config.llm.temperature)
        .build();

    Ok(builder.step(review).build()?)
}

fn print_numbered(title: &str, items: &[String]) {
    println!("\n{title}");
    for (i, item) in items.iter().enumerate() {
        println!("{}. {item}", i + 1);
    }
}
