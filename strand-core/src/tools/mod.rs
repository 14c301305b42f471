//! Tool collaborator
//!
//! Tools are named async functions the model can ask for during a
//! [`ToolLoop`](crate::workflow::ToolLoop) run. Each advertises a JSON schema
//! for its arguments; the loop looks tools up by exact name in a
//! [`ToolRegistry`].
//!
//! # Example
//!
//! ```rust
//! use serde_json::json;
//! use strand_core::tools::{FnTool, ToolRegistry, ToolSchema};
//!
//! let echo = FnTool::new(
//!     ToolSchema::new("echo", "Echo the arguments back", json!({"type": "object"})),
//!     |args| async move { Ok(serde_json::Value::Object(args)) },
//! );
//!
//! let mut registry = ToolRegistry::new();
//! registry.register(std::sync::Arc::new(echo)).unwrap();
//! assert!(registry.contains("echo"));
//! ```

mod registry;
mod tool;

pub use registry::{RegistryError, ToolRegistry};
pub use tool::{BoxedTool, FnTool, Tool, ToolError, ToolSchema};
