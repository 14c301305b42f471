//! Lenient JSON parser for model output

use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::LazyLock;

use super::parser::{OutputParser, ParseError, ParseResult, ParserConfig};

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```(?:json|JSON)?[ \t]*\n?([\s\S]*?)\n?[ \t]*```").unwrap());

static TRAILING_COMMA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",(\s*[}\]])").unwrap());

/// JSON parser that tolerates fences, prose and trailing commas
#[derive(Debug, Clone, Default)]
pub struct JsonParser {
    config: ParserConfig,
}

impl JsonParser {
    /// Create a lenient parser
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a parser with a custom config
    pub fn with_config(config: ParserConfig) -> Self {
        Self { config }
    }

    /// Create a parser that never repairs
    pub fn strict() -> Self {
        Self::with_config(ParserConfig::strict())
    }

    /// Parse a JSON array of strings, e.g. a topic list or an outline
    pub fn parse_string_list(&self, raw: &str) -> ParseResult<Vec<String>> {
        let value = self.parse(raw)?;
        let items = match value {
            Value::Array(items) => items,
            other => {
                return Err(ParseError::TypeMismatch {
                    field: "$".to_string(),
                    expected: "array".to_string(),
                    actual: json_type(&other).to_string(),
                });
            }
        };

        items
            .into_iter()
            .enumerate()
            .map(|(i, item)| match item {
                Value::String(s) => Ok(s),
                other => Err(ParseError::TypeMismatch {
                    field: format!("[{i}]"),
                    expected: "string".to_string(),
                    actual: json_type(&other).to_string(),
                }),
            })
            .collect()
    }

    /// Parse and deserialize into `T`
    pub fn parse_as<T: DeserializeOwned>(&self, raw: &str) -> ParseResult<T> {
        let value = self.parse(raw)?;
        serde_json::from_value(value).map_err(|e| ParseError::InvalidFormat(e.to_string()))
    }

    fn unfence<'a>(&self, input: &'a str) -> &'a str {
        FENCE_RE
            .captures(input)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
            .unwrap_or(input)
    }

    /// Slice out the first balanced object or array
    fn extract<'a>(&self, input: &'a str) -> Option<&'a str> {
        let start = input.find(['{', '['])?;
        let body = &input[start..];

        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;

        for (i, c) in body.char_indices() {
            if escaped {
                escaped = false;
                continue;
            }
            match c {
                '\\' if in_string => escaped = true,
                '"' => in_string = !in_string,
                '{' | '[' if !in_string => depth += 1,
                '}' | ']' if !in_string => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return Some(&body[..=i]);
                    }
                }
                _ => {}
            }
        }

        // Unbalanced: hand back the tail and let repair close it
        Some(body)
    }

    fn repair(&self, input: &str) -> String {
        let mut repaired = TRAILING_COMMA_RE.replace_all(input, "$1").into_owned();

        let mut closers = Vec::new();
        let mut in_string = false;
        let mut escaped = false;
        for c in repaired.chars() {
            if escaped {
                escaped = false;
                continue;
            }
            match c {
                '\\' if in_string => escaped = true,
                '"' => in_string = !in_string,
                '{' if !in_string => closers.push('}'),
                '[' if !in_string => closers.push(']'),
                '}' | ']' if !in_string => {
                    closers.pop();
                }
                _ => {}
            }
        }
        while let Some(c) = closers.pop() {
            repaired.push(c);
        }

        repaired
    }
}

impl OutputParser for JsonParser {
    type Output = Value;

    fn parse(&self, raw: &str) -> ParseResult<Value> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ParseError::EmptyInput);
        }

        let input = if self.config.strip_code_fences {
            self.unfence(trimmed).trim()
        } else {
            trimmed
        };

        if let Ok(value) = serde_json::from_str(input) {
            return Ok(value);
        }

        let candidate = self.extract(input).unwrap_or(input);
        if let Ok(value) = serde_json::from_str(candidate) {
            return Ok(value);
        }

        if self.config.attempt_repair {
            if let Ok(value) = serde_json::from_str(&self.repair(candidate)) {
                return Ok(value);
            }
        }

        Err(ParseError::InvalidFormat(format!(
            "no JSON value found in output starting with {:?}",
            input.chars().take(40).collect::<String>()
        )))
    }

    fn name(&self) -> &'static str {
        "json"
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
