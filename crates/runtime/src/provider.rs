//! Provider connections: local handler sets and remote MCP sessions.

use std::time::Duration;

use mcp::{ProcessConfig, Session};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::tool::ToolDescriptor;
use crate::tools::{LocalProvider, ToolError};
use crate::{Error, Result};

/// Name of the in-process provider.
pub const LOCAL_PROVIDER: &str = "local";

/// Identity sent to remote servers during the initialize handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub name: String,
    pub version: String,
}

impl Default for ClientIdentity {
    fn default() -> Self {
        Self {
            name: "steward".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Where a remote provider lives.
#[derive(Debug, Clone)]
pub enum Endpoint {
    Tcp { host: String, port: u16 },
    Process(ProcessConfig),
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
            Self::Process(config) => write!(f, "stdio:{}", config.command),
        }
    }
}

/// A configured remote provider.
#[derive(Debug, Clone)]
pub struct RemoteSpec {
    pub name: String,
    pub endpoint: Endpoint,
}

/// Failure of a single tool dispatch.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("remote tool failed: {0}")]
    Remote(String),

    #[error("transport failure: {0}")]
    Transport(mcp::Error),
}

impl From<mcp::Error> for DispatchError {
    fn from(error: mcp::Error) -> Self {
        match error {
            mcp::Error::Timeout(limit) => Self::Timeout(limit),
            mcp::Error::ToolCallFailed(text) => Self::Remote(text),
            mcp::Error::JsonRpc(e) => Self::Remote(e.to_string()),
            other => Self::Transport(other),
        }
    }
}

/// An initialized session to a remote tool server.
pub struct RemoteProvider {
    name: String,
    endpoint: String,
    session: Session,
    tools: Vec<ToolDescriptor>,
}

impl RemoteProvider {
    /// Connect, perform the handshake, and discover tools.
    pub async fn connect(spec: &RemoteSpec, identity: &ClientIdentity) -> Result<Self> {
        let connect_error = |source| Error::Connect {
            provider: spec.name.clone(),
            source,
        };

        let session = match &spec.endpoint {
            Endpoint::Tcp { host, port } => Session::connect_tcp(host, *port)
                .await
                .map_err(connect_error)?,
            Endpoint::Process(config) => Session::spawn(config).map_err(connect_error)?,
        };

        Self::handshake(&spec.name, spec.endpoint.to_string(), session, identity).await
    }

    /// Handshake over an already-open session.
    pub async fn handshake(
        name: &str,
        endpoint: String,
        session: Session,
        identity: &ClientIdentity,
    ) -> Result<Self> {
        let connect_error = |source| Error::Connect {
            provider: name.to_string(),
            source,
        };

        let accepted = session
            .initialize(&identity.name, &identity.version)
            .await
            .map_err(connect_error)?;
        if !accepted {
            return Err(Error::InitializeRejected(name.to_string()));
        }

        let tools: Vec<ToolDescriptor> = session
            .list_tools()
            .await
            .map_err(connect_error)?
            .into_iter()
            .map(ToolDescriptor::from)
            .collect();

        info!(provider = %name, %endpoint, tools = tools.len(), "connected to remote provider");
        Ok(Self {
            name: name.to_string(),
            endpoint,
            session,
            tools,
        })
    }
}

impl std::fmt::Debug for RemoteProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteProvider")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .field("tools", &self.tools.len())
            .finish()
    }
}

/// One live tool provider.
#[derive(Debug)]
pub enum Provider {
    Local {
        name: String,
        handlers: LocalProvider,
    },
    Remote(RemoteProvider),
}

impl Provider {
    pub fn local(handlers: LocalProvider) -> Self {
        Self::Local {
            name: LOCAL_PROVIDER.to_string(),
            handlers,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Local { name, .. } => name,
            Self::Remote(remote) => &remote.name,
        }
    }

    /// Short human-readable location, for listings.
    pub fn endpoint(&self) -> &str {
        match self {
            Self::Local { .. } => "in-process",
            Self::Remote(remote) => &remote.endpoint,
        }
    }

    /// Tools discovered when the provider was connected.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        match self {
            Self::Local { handlers, .. } => handlers.descriptors(),
            Self::Remote(remote) => remote.tools.clone(),
        }
    }

    /// Forward one call, waiting at most `limit`.
    ///
    /// Timeouts are never retried and are not propagated to the provider.
    pub async fn dispatch(
        &self,
        tool: &str,
        arguments: &Value,
        limit: Duration,
    ) -> std::result::Result<String, DispatchError> {
        debug!(provider = %self.name(), %tool, "dispatching");
        let outcome = match self {
            Self::Local { handlers, .. } => {
                match tokio::time::timeout(limit, handlers.call(tool, arguments)).await {
                    Ok(result) => result.map_err(DispatchError::from),
                    Err(_) => Err(DispatchError::Timeout(limit)),
                }
            }
            Self::Remote(remote) => remote
                .session
                .call_tool(tool, Some(arguments.clone()), limit)
                .await
                .map(|result| result.joined_text())
                .map_err(DispatchError::from),
        };

        if let Err(e) = &outcome {
            warn!(provider = %self.name(), %tool, error = %e, "dispatch failed");
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use policy::CommandPolicy;
    use serde_json::json;

    #[tokio::test]
    async fn local_dispatch() {
        let provider = Provider::local(LocalProvider::builtin(CommandPolicy::default()));
        assert_eq!(provider.name(), "local");

        let out = provider
            .dispatch("calculator", &json!({"expression": "6 * 7"}), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(out, "42");

        let err = provider
            .dispatch("calculator", &json!({"expression": "6 / 0"}), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Tool(ToolError::Internal(_))));
    }

    #[test]
    fn mcp_errors_classify() {
        assert!(matches!(
            DispatchError::from(mcp::Error::Timeout(Duration::from_secs(1))),
            DispatchError::Timeout(_)
        ));
        assert!(matches!(
            DispatchError::from(mcp::Error::ToolCallFailed("x".into())),
            DispatchError::Remote(_)
        ));
        assert!(matches!(
            DispatchError::from(mcp::Error::Closed),
            DispatchError::Transport(_)
        ));
    }

    #[test]
    fn endpoint_display() {
        let tcp = Endpoint::Tcp {
            host: "localhost".into(),
            port: 8889,
        };
        assert_eq!(tcp.to_string(), "tcp://localhost:8889");
    }
}
