use std::sync::Arc;

use async_trait::async_trait;
use mcp::{CallToolResult, JsonRpcError, ToolService};
use policy::CommandPolicy;
use serde_json::{Map, Value};
use tracing::debug;

use super::{Calculator, ShellCommand, ToolError, ToolHandler};
use crate::tool::ToolDescriptor;

/// A set of in-process tool handlers.
#[derive(Clone, Default)]
pub struct LocalProvider {
    handlers: Vec<Arc<dyn ToolHandler>>,
}

impl LocalProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in `shell_command` and `calculator` tools.
    pub fn builtin(policy: CommandPolicy) -> Self {
        Self::new()
            .with_handler(ShellCommand::new(policy))
            .with_handler(Calculator)
    }

    pub fn with_handler(mut self, handler: impl ToolHandler + 'static) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.handlers.iter().map(|h| h.descriptor()).collect()
    }

    fn find(&self, name: &str) -> Option<&Arc<dyn ToolHandler>> {
        self.handlers.iter().find(|h| h.descriptor().name == name)
    }

    pub async fn call(&self, name: &str, arguments: &Value) -> Result<String, ToolError> {
        let handler = self
            .find(name)
            .ok_or_else(|| ToolError::InvalidParameter(format!("unknown tool: {name}")))?;
        debug!(tool = %name, "calling local tool");
        handler.call(arguments).await
    }
}

impl std::fmt::Debug for LocalProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.handlers.iter().map(|h| h.descriptor().name).collect();
        f.debug_struct("LocalProvider").field("tools", &names).finish()
    }
}

#[async_trait]
impl ToolService for LocalProvider {
    fn tools(&self) -> Vec<mcp::Tool> {
        self.handlers.iter().map(|h| h.descriptor().to_mcp()).collect()
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Value>,
    ) -> Result<CallToolResult, JsonRpcError> {
        let arguments = arguments.unwrap_or_else(|| Value::Object(Map::new()));
        self.call(name, &arguments)
            .await
            .map(CallToolResult::text)
            .map_err(|e| e.to_rpc_error())
    }
}
