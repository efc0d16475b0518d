//! Tool descriptors.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How the orchestrator must treat calls to a tool.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolKind {
    #[default]
    Standard,
    /// Executes a command; `argument` names the payload field holding it.
    Command { argument: String },
}

/// A tool definition exposed to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    #[serde(default)]
    pub kind: ToolKind,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            kind: ToolKind::Standard,
        }
    }

    /// Mark the tool as command-executing.
    pub fn command(mut self, argument: impl Into<String>) -> Self {
        self.kind = ToolKind::Command {
            argument: argument.into(),
        };
        self
    }

    /// The argument field holding the command, if this tool runs commands.
    pub fn command_argument(&self) -> Option<&str> {
        match &self.kind {
            ToolKind::Command { argument } => Some(argument),
            ToolKind::Standard => None,
        }
    }

    /// Wire form for tools/list.
    pub fn to_mcp(&self) -> mcp::Tool {
        mcp::Tool {
            name: self.name.clone(),
            description: Some(self.description.clone()),
            input_schema: self.parameters.clone(),
        }
    }
}

impl From<mcp::Tool> for ToolDescriptor {
    fn from(tool: mcp::Tool) -> Self {
        Self {
            name: tool.name,
            description: tool.description.unwrap_or_default(),
            parameters: tool.input_schema,
            kind: ToolKind::Standard,
        }
    }
}
