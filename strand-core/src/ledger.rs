//! Context ledger
//!
//! The ordered, append-only record of turns that a workflow run threads
//! between its steps. A runner owns the ledger for the duration of a run
//! (it receives `&mut ContextLedger`); concurrent branches read a frozen
//! [`LedgerSnapshot`] instead.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use crate::parsing::ParseError;

/// Author of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        f.write_str(name)
    }
}

/// A structured request from the model to run a named tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Correlation id, echoed back on the tool turn
    pub id: String,
    /// Tool name, matched exactly against the registry
    pub name: String,
    /// Arguments as decoded from the model
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolInvocation {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// One entry in the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    /// Set on tool turns; correlates with [`ToolInvocation::id`]
    #[serde(
        rename = "toolCallId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub tool_call_id: Option<String>,
    /// Set on assistant turns that requested tools
    #[serde(rename = "toolCalls", default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolInvocation>,
}

impl Turn {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
            tool_calls: Vec::new(),
        }
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }
}

/// Frozen, cheaply clonable view of a ledger
#[derive(Debug, Clone)]
pub struct LedgerSnapshot(Arc<[Turn]>);

impl LedgerSnapshot {
    pub fn turns(&self) -> &[Turn] {
        &self.0
    }
}

impl From<Vec<Turn>> for LedgerSnapshot {
    fn from(turns: Vec<Turn>) -> Self {
        LedgerSnapshot(Arc::from(turns))
    }
}

impl Deref for LedgerSnapshot {
    type Target = [Turn];

    fn deref(&self) -> &[Turn] {
        &self.0
    }
}

/// Append-only conversation record for a single workflow run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextLedger {
    turns: Vec<Turn>,
}

impl ContextLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a ledger with a system prompt
    pub fn with_system(prompt: impl Into<String>) -> Self {
        let mut ledger = Self::new();
        ledger.append(Turn::system(prompt));
        ledger
    }

    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn append_user(&mut self, content: impl Into<String>) {
        self.append(Turn::user(content));
    }

    pub fn append_assistant(&mut self, content: impl Into<String>) {
        self.append(Turn::assistant(content));
    }

    /// Record an assistant turn that requested tools
    pub fn append_tool_calls(&mut self, content: impl Into<String>, calls: Vec<ToolInvocation>) {
        self.append(Turn {
            role: Role::Assistant,
            content: content.into(),
            tool_call_id: None,
            tool_calls: calls,
        });
    }

    pub fn append_tool_result(&mut self, tool_call_id: impl Into<String>, content: impl Into<String>) {
        self.append(Turn::tool(tool_call_id, content));
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot(Arc::from(self.turns.as_slice()))
    }

    /// Serialize as a JSON array of turns
    pub fn to_wire(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.turns)
    }

    /// Rebuild a ledger from its JSON wire form
    pub fn from_wire(wire: &str) -> Result<Self, ParseError> {
        let turns: Vec<Turn> =
            serde_json::from_str(wire).map_err(|e| ParseError::InvalidFormat(e.to_string()))?;

        if let Some(index) = turns
            .iter()
            .position(|t| t.role == Role::Tool && t.tool_call_id.is_none())
        {
            return Err(ParseError::MissingField(format!("[{index}].toolCallId")));
        }

        Ok(Self { turns })
    }
}

impl From<Vec<Turn>> for ContextLedger {
    fn from(turns: Vec<Turn>) -> Self {
        Self { turns }
    }
}
