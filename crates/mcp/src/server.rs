//! Serving side of an MCP connection.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::protocol::{
    CallToolParams, CallToolResult, Implementation, InitializeResult, JsonRpcError,
    JsonRpcRequest, JsonRpcResponse, ListToolsResult, PROTOCOL_VERSION, RequestId,
    ServerCapabilities, Tool, ToolsCapability, error_codes,
};
use crate::transport::{TcpTransport, Transport};

/// Something that can list and execute tools on behalf of remote clients.
#[async_trait]
pub trait ToolService: Send + Sync {
    /// Schemas of every tool this service offers.
    fn tools(&self) -> Vec<Tool>;

    /// Execute a tool.
    ///
    /// Return `Err` for protocol-level problems such as an unknown tool or
    /// malformed arguments. A tool that ran and failed should return a
    /// result with `is_error` set instead.
    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Value>,
    ) -> std::result::Result<CallToolResult, JsonRpcError>;
}

/// MCP server exposing a [`ToolService`].
pub struct Server<S> {
    service: Arc<S>,
    info: Implementation,
}

impl<S> Clone for Server<S> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            info: self.info.clone(),
        }
    }
}

impl<S: ToolService + 'static> Server<S> {
    pub fn new(service: Arc<S>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            service,
            info: Implementation {
                name: name.into(),
                version: Some(version.into()),
            },
        }
    }

    /// Accept connections forever, serving each on its own task.
    pub async fn listen(&self, listener: TcpListener) -> Result<()> {
        info!(addr = ?listener.local_addr().ok(), server = %self.info.name, "listening");
        loop {
            let (stream, peer) = listener.accept().await?;
            let server = self.clone();
            tokio::spawn(async move {
                debug!(%peer, "client connected");
                let mut transport = TcpTransport::from_stream(stream);
                match server.serve(&mut transport).await {
                    Ok(()) => debug!(%peer, "client disconnected"),
                    Err(e) => warn!(%peer, error = %e, "connection ended with error"),
                }
            });
        }
    }

    /// Answer requests on `transport` until the peer closes it.
    pub async fn serve<T>(&self, transport: &mut T) -> Result<()>
    where
        T: Transport + ?Sized,
    {
        while let Some(line) = transport.receive().await? {
            if let Some(reply) = self.handle_line(&line).await {
                let json = serde_json::to_string(&reply)?;
                transport.send(&json).await?;
            }
        }
        Ok(())
    }

    /// Process one incoming message. Notifications produce no reply.
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        let raw: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "failed to parse message");
                return Some(JsonRpcResponse::failure(
                    RequestId::Number(0),
                    JsonRpcError::new(error_codes::PARSE_ERROR, e.to_string()),
                ));
            }
        };

        if raw.get("id").is_none() {
            let method = raw.get("method").and_then(Value::as_str).unwrap_or_default();
            debug!(%method, "notification");
            return None;
        }

        let request: JsonRpcRequest = match serde_json::from_value(raw) {
            Ok(r) => r,
            Err(e) => {
                return Some(JsonRpcResponse::failure(
                    RequestId::Number(0),
                    JsonRpcError::new(error_codes::INVALID_REQUEST, e.to_string()),
                ));
            }
        };

        Some(self.handle_request(request).await)
    }

    async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id;
        let outcome = match request.method.as_str() {
            "initialize" => self.initialize_result(),
            "ping" => Ok(Value::Object(Default::default())),
            "tools/list" => to_value(ListToolsResult {
                tools: self.service.tools(),
            }),
            "tools/call" => self.call(request.params).await,
            method => {
                warn!(%method, "unknown method");
                Err(JsonRpcError::new(
                    error_codes::METHOD_NOT_FOUND,
                    format!("method not found: {method}"),
                ))
            }
        };

        match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(error) => JsonRpcResponse::failure(id, error),
        }
    }

    fn initialize_result(&self) -> std::result::Result<Value, JsonRpcError> {
        to_value(InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability { list_changed: false }),
            },
            server_info: self.info.clone(),
        })
    }

    async fn call(&self, params: Option<Value>) -> std::result::Result<Value, JsonRpcError> {
        let params = params.ok_or_else(|| JsonRpcError::invalid_params("missing params"))?;
        let params: CallToolParams = serde_json::from_value(params)
            .map_err(|e| JsonRpcError::invalid_params(e.to_string()))?;

        debug!(tool = %params.name, "tools/call");
        let result = self.service.call_tool(&params.name, params.arguments).await?;
        to_value(result)
    }
}

fn to_value(value: impl serde::Serialize) -> std::result::Result<Value, JsonRpcError> {
    serde_json::to_value(value).map_err(|e| JsonRpcError::internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use crate::transport::ChannelTransport;
    use crate::Error;
    use serde_json::json;
    use std::time::Duration;

    struct Echo;

    #[async_trait]
    impl ToolService for Echo {
        fn tools(&self) -> Vec<Tool> {
            vec![Tool {
                name: "echo".into(),
                description: Some("Echo the input".into()),
                input_schema: json!({"type": "object", "properties": {"text": {"type": "string"}}}),
            }]
        }

        async fn call_tool(
            &self,
            name: &str,
            arguments: Option<Value>,
        ) -> std::result::Result<CallToolResult, JsonRpcError> {
            if name != "echo" {
                return Err(JsonRpcError::new(error_codes::METHOD_NOT_FOUND, "unknown tool"));
            }
            let text = arguments
                .as_ref()
                .and_then(|a| a.get("text"))
                .and_then(Value::as_str)
                .ok_or_else(|| JsonRpcError::invalid_params("missing text"))?;
            if text.is_empty() {
                return Ok(CallToolResult::error("nothing to echo"));
            }
            Ok(CallToolResult::text(text))
        }
    }

    fn server() -> Server<Echo> {
        Server::new(Arc::new(Echo), "echo-server", "0.0.1")
    }

    #[tokio::test]
    async fn unknown_method() {
        let reply = server()
            .handle_line(r#"{"jsonrpc":"2.0","id":7,"method":"resources/list"}"#)
            .await
            .unwrap();
        assert_eq!(reply.id, RequestId::Number(7));
        assert_eq!(reply.error.unwrap().code, error_codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn garbage_is_a_parse_error() {
        let reply = server().handle_line("not json").await.unwrap();
        assert_eq!(reply.error.unwrap().code, error_codes::PARSE_ERROR);
    }

    #[tokio::test]
    async fn notifications_get_no_reply() {
        let reply = server()
            .handle_line(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .await;
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn missing_call_params() {
        let reply = server()
            .handle_line(r#"{"jsonrpc":"2.0","id":1,"method":"tools/call"}"#)
            .await
            .unwrap();
        assert_eq!(reply.error.unwrap().code, error_codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn session_against_server() {
        let (client, mut remote) = ChannelTransport::pair();
        let server = server();
        tokio::spawn(async move { server.serve(&mut remote).await });

        let session = Session::new(client);
        assert!(session.initialize("steward", "0.1.0").await.unwrap());
        let info = session.server_info().await.unwrap();
        assert_eq!(info.server_info.name, "echo-server");

        let tools = session.list_tools().await.unwrap();
        assert_eq!(tools[0].name, "echo");

        let limit = Duration::from_secs(1);
        let out = session
            .call_tool("echo", Some(json!({"text": "hi"})), limit)
            .await
            .unwrap();
        assert_eq!(out.joined_text(), "hi");

        let err = session
            .call_tool("echo", Some(json!({"text": ""})), limit)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ToolCallFailed(ref m) if m == "nothing to echo"));

        let err = session.call_tool("echo", None, limit).await.unwrap_err();
        assert!(matches!(err, Error::JsonRpc(ref e) if e.code == error_codes::INVALID_PARAMS));
    }
}
