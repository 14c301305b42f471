//! Strand CLI - run the workflow patterns against a live model

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use strand_core::config::StrandConfig;
use strand_core::llm::{LLMProvider, LLMProviderFactory};

mod console;
mod workflows;

#[derive(Parser)]
#[command(name = "strand")]
#[command(about = "Composable LLM workflow runner", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to strand.toml plus STRAND_* variables)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Topics, outline, sections and review as one content chain
    Chain {
        /// Field of interest to write about
        #[arg(short, long)]
        interest: Option<String>,
        /// Take the first generated topic instead of asking
        #[arg(short, long)]
        auto_select: bool,
    },
    /// Classify a request and hand it to one handler
    Route {
        #[arg(short, long)]
        request: Option<String>,
    },
    /// Analyze a comment along four independent axes, then synthesize
    Parallel {
        #[arg(short, long)]
        comment: Option<String>,
    },
    /// Write a questionnaire and refine it under critique
    Reflect {
        /// Replaces the built-in questionnaire task
        #[arg(short, long)]
        task: Option<String>,
    },
    /// Answer a question with the book database tool
    Tools {
        #[arg(short, long)]
        question: Option<String>,
    },
    /// Version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Chain {
            interest,
            auto_select,
        } => {
            let (config, provider) = setup(cli.config.as_deref())?;
            let interest = match interest {
                Some(interest) => interest,
                None => console::ask("Enter your field of interest", "artificial intelligence")?,
            };
            let auto_select = auto_select || console::confirm("Auto-select best topic?")?;
            workflows::content::run(provider, &config, &interest, auto_select)
                .await
                .context("Content chain failed")?;
        }
        Commands::Route { request } => {
            let (config, provider) = setup(cli.config.as_deref())?;
            let request = match request {
                Some(request) => request,
                None => console::ask("Enter your request", "")?,
            };
            workflows::routing::run(provider, &config, &request)
                .await
                .context("Routing failed")?;
        }
        Commands::Parallel { comment } => {
            let (config, provider) = setup(cli.config.as_deref())?;
            let comment = match comment {
                Some(comment) => comment,
                None => console::ask("Comment", "")?,
            };
            workflows::analysis::run(provider, &config, &comment)
                .await
                .context("Parallel analysis failed")?;
        }
        Commands::Reflect { task } => {
            let (config, provider) = setup(cli.config.as_deref())?;
            let task = task.unwrap_or_else(|| workflows::questionnaire::DEFAULT_TASK.to_string());
            workflows::questionnaire::run(provider, &config, &task)
                .await
                .context("Reflection failed")?;
        }
        Commands::Tools { question } => {
            let (config, provider) = setup(cli.config.as_deref())?;
            let question = match question {
                Some(question) => question,
                None => console::ask("Question", workflows::books::DEFAULT_QUESTION)?,
            };
            workflows::books::run(provider, &config, &question)
                .await
                .context("Tool use failed")?;
        }
        Commands::Version => {
            println!("strand {}", env!("CARGO_PKG_VERSION"));
            println!("strand-core {}", strand_core::VERSION);
        }
    }

    Ok(())
}

/// Load configuration and build the provider every workflow shares
fn setup(config_path: Option<&Path>) -> Result<(StrandConfig, Arc<dyn LLMProvider>)> {
    let config = match config_path {
        Some(path) => StrandConfig::from_file(path),
        None => StrandConfig::load(),
    }
    .context("Failed to load configuration")?;

    let provider =
        LLMProviderFactory::create(&config.llm).context("Failed to create LLM provider")?;
    tracing::debug!(model = %provider.model_info().model_name, "Provider ready");

    Ok((config, provider))
}
