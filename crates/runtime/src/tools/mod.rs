//! In-process tool handlers.

mod calculator;
pub mod errors;
mod local;
mod shell;

pub use calculator::Calculator;
pub use errors::ToolError;
pub use local::LocalProvider;
pub use shell::{SHELL_TOOL, ShellCommand};

use async_trait::async_trait;
use policy::strip_chat_markers;
use serde_json::Value;

use crate::tool::ToolDescriptor;

/// A tool implemented in this process.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn descriptor(&self) -> ToolDescriptor;

    /// Run the tool and return its text output.
    async fn call(&self, arguments: &Value) -> Result<String, ToolError>;
}

/// Fetch a string argument with chat markers stripped.
pub(crate) fn text_argument(arguments: &Value, key: &str) -> Result<String, ToolError> {
    let raw = arguments
        .get(key)
        .ok_or_else(|| ToolError::MissingParameter(key.to_string()))?
        .as_str()
        .ok_or_else(|| ToolError::InvalidParameter(format!("{key} must be a string")))?;

    let cleaned = strip_chat_markers(raw);
    if cleaned.is_empty() {
        return Err(ToolError::InvalidParameter(format!("{key} is empty")));
    }
    Ok(cleaned)
}
