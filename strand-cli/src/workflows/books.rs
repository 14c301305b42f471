//! Book database assistant driven by the tool loop

use std::sync::Arc;

use anyhow::Result;
use serde_json::{Map, Value, json};
use strand_core::config::StrandConfig;
use strand_core::ledger::ContextLedger;
use strand_core::llm::LLMProvider;
use strand_core::tools::{FnTool, ToolError, ToolRegistry, ToolSchema};
use strand_core::workflow::{LlmStep, ToolLoop, ToolLoopConfig};

pub const DEFAULT_QUESTION: &str =
    "How many copies of the book 'The Great Gatsby' are in the database?";

const SYSTEM_PROMPT: &str = "You are an assistant that can search a database of books.";

/// Fake catalogue: title, author, copies
const BOOKS: [(&str, &str, u32); 3] = [
    ("The Great Gatsby", "F. Scott Fitzgerald", 10),
    ("1984", "George Orwell", 5),
    ("To Kill a Mockingbird", "Harper Lee", 3),
];

/// Case-insensitive substring match on title or author
pub fn search_books(query: &str) -> Vec<Value> {
    let query = query.to_lowercase();
    BOOKS
        .iter()
        .filter(|(title, author, _)| {
            title.to_lowercase().contains(&query) || author.to_lowercase().contains(&query)
        })
        .map(|(title, author, copies)| json!({"title": title, "author": author, "copies": copies}))
        .collect()
}

pub fn search_database_tool() -> FnTool {
    FnTool::new(
        ToolSchema::single_string(
            "search_database",
            "Search a database of books by title or author. Returns title, author and number of copies for each match.",
            "query",
            "The query to search the database for",
        ),
        |args: Map<String, Value>| async move {
            let query = args
                .get("query")
                .and_then(Value::as_str)
                .ok_or_else(|| ToolError::InvalidArguments("'query' must be a string".to_string()))?;
            println!("{0} Tool called - Searching database for: {query} {0}", "-".repeat(10));
            Ok(Value::Array(search_books(query)))
        },
    )
}

pub fn build(provider: Arc<dyn LLMProvider>, config: &StrandConfig) -> Result<ToolLoop> {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(search_database_tool()))?;

    let assistant = LlmStep::builder("librarian", provider)
        .temperature(config.llm.temperature)
        .build();

    let tool_loop = ToolLoop::builder(assistant, Arc::new(registry))
        .name("books")
        .config(ToolLoopConfig::from(&config.workflow))
        .build()?;

    Ok(tool_loop)
}

pub async fn run(provider: Arc<dyn LLMProvider>, config: &StrandConfig, question: &str) -> Result<()> {
    println!("--- Running Tool Use Workflow ---\n");

    let tool_loop = build(provider, config)?;
    let mut ledger = ContextLedger::with_system(SYSTEM_PROMPT);
    ledger.append_user(question);

    let (output, trace) = tool_loop.execute(&mut ledger).await?;
    for call in &trace.tool_calls {
        if let Some(error) = &call.error {
            println!("Tool {} failed: {error}", call.tool);
        }
    }

    println!("{0} Workflow completed {0}", "-".repeat(10));
    println!("Result: {}", output.answer);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_core::tools::Tool;

    #[test]
    fn test_search_matches_title_or_author() {
        let hits = search_books("gatsby");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0]["copies"], 10);

        let hits = search_books("ORWELL");
        assert_eq!(hits[0]["title"], "1984");

        // Scott, George and "To Kill" all contain an "o"
        assert_eq!(search_books("o").len(), 3);
        assert!(search_books("tolkien").is_empty());
    }

    #[tokio::test]
    async fn test_tool_rejects_missing_query() {
        let tool = search_database_tool();
        let err = tool.invoke(&Map::new()).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));

        let mut args = Map::new();
        args.insert("query".into(), json!("Harper"));
        let result = tool.invoke(&args).await.unwrap();
        assert_eq!(result[0]["title"], "To Kill a Mockingbird");
    }
}
