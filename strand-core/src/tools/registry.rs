//! Tool registry with duplicate detection and exact-name lookup

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use super::tool::{Tool, ToolError, ToolSchema};
use crate::ledger::ToolInvocation;

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    /// Tool with this name already exists
    #[error("Tool '{0}' is already registered")]
    DuplicateTool(String),

    /// Tool name is empty
    #[error("Tool name must not be empty")]
    EmptyName,
}

/// Name-indexed set of tools
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    /// Registration order, so schemas are advertised deterministically
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its schema name
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let name = tool.name();
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.tools.contains_key(&name) {
            return Err(RegistryError::DuplicateTool(name));
        }
        self.order.push(name.clone());
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Schemas of all registered tools, in registration order
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.schema())
            .collect()
    }

    /// Run the tool named by `call`; an unknown name is never invoked
    pub async fn invoke(&self, call: &ToolInvocation) -> Result<Value, ToolError> {
        let tool = self
            .get(&call.name)
            .ok_or_else(|| ToolError::UnknownTool(call.name.clone()))?;
        tool.invoke(&call.arguments).await
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.order)
            .finish()
    }
}
