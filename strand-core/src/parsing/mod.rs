//! Structured output parsing
//!
//! Model output that is supposed to be JSON rarely arrives clean: it comes
//! wrapped in markdown fences, surrounded by prose, or with trailing commas.
//! [`JsonParser`] normalizes those cases before handing the text to
//! `serde_json`.
//!
//! # Example
//!
//! ```rust
//! use strand_core::parsing::{JsonParser, OutputParser};
//!
//! let parser = JsonParser::new();
//! let topics = parser.parse_string_list("```json\n[\"rust\", \"tokio\",]\n```").unwrap();
//! assert_eq!(topics, vec!["rust", "tokio"]);
//! ```

mod json;
mod parser;

pub use json::JsonParser;
pub use parser::{OutputParser, ParseError, ParseResult, ParserConfig};
