use thiserror::Error;

/// Structured failure signalled by a tool handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    #[error("missing parameter: {0}")]
    MissingParameter(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ToolError {
    /// JSON-RPC form used when the tool is served remotely.
    pub fn to_rpc_error(&self) -> mcp::JsonRpcError {
        match self {
            Self::MissingParameter(_) | Self::InvalidParameter(_) => {
                mcp::JsonRpcError::invalid_params(self.to_string())
            }
            Self::Internal(_) => mcp::JsonRpcError::internal(self.to_string()),
        }
    }
}
