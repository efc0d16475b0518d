//! Client side of an MCP connection.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::protocol::{
    CallToolParams, CallToolResult, InitializeParams, InitializeResult, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, ListToolsResult, RequestId, Tool,
};
use crate::transport::{ProcessConfig, StdioTransport, TcpTransport, Transport};

/// Default timeout for handshake and listing operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// An MCP client session over some [`Transport`].
///
/// Requests are serialized: the transport lock is held from send until the
/// matching response arrives, so responses never interleave.
pub struct Session {
    transport: Mutex<Box<dyn Transport>>,
    next_id: AtomicI64,
    initialized: AtomicBool,
    server_info: Mutex<Option<InitializeResult>>,
}

impl Session {
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self {
            transport: Mutex::new(Box::new(transport)),
            next_id: AtomicI64::new(1),
            initialized: AtomicBool::new(false),
            server_info: Mutex::new(None),
        }
    }

    /// Open a session to a server listening on `host:port`.
    pub async fn connect_tcp(host: &str, port: u16) -> Result<Self> {
        Ok(Self::new(TcpTransport::connect(host, port).await?))
    }

    /// Open a session to a server launched as a child process.
    pub fn spawn(config: &ProcessConfig) -> Result<Self> {
        Ok(Self::new(StdioTransport::spawn(config)?))
    }

    /// Perform the initialize handshake.
    ///
    /// Returns `Ok(false)` when the server answered with a JSON-RPC error,
    /// and `Err` when the exchange itself failed.
    pub async fn initialize(&self, client_name: &str, client_version: &str) -> Result<bool> {
        let params = InitializeParams::new(client_name, client_version);
        let reply = self.request("initialize", Some(params), DEFAULT_TIMEOUT).await;
        let result: InitializeResult = match reply {
            Ok(result) => result,
            Err(Error::JsonRpc(e)) => {
                warn!(error = %e, "server rejected initialize");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        self.notify("notifications/initialized").await?;

        debug!(
            server = %result.server_info.name,
            protocol = %result.protocol_version,
            "session initialized"
        );
        *self.server_info.lock().await = Some(result);
        self.initialized.store(true, Ordering::SeqCst);
        Ok(true)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Get server info (after initialization).
    pub async fn server_info(&self) -> Option<InitializeResult> {
        self.server_info.lock().await.clone()
    }

    /// Ask the server for its tool schemas.
    pub async fn list_tools(&self) -> Result<Vec<Tool>> {
        self.ensure_initialized()?;
        let result: ListToolsResult = self
            .request("tools/list", None::<()>, DEFAULT_TIMEOUT)
            .await?;
        Ok(result.tools)
    }

    /// Call a tool by name, waiting at most `limit` for the result.
    ///
    /// A result flagged `isError` is surfaced as [`Error::ToolCallFailed`].
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Value>,
        limit: Duration,
    ) -> Result<CallToolResult> {
        self.ensure_initialized()?;

        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };

        let result: CallToolResult = self.request("tools/call", Some(params), limit).await?;
        if result.is_error {
            return Err(Error::ToolCallFailed(result.joined_text()));
        }

        Ok(result)
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(Error::NotInitialized)
        }
    }

    fn next_request_id(&self) -> RequestId {
        RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn request<P, R>(&self, method: &str, params: Option<P>, limit: Duration) -> Result<R>
    where
        P: serde::Serialize,
        R: serde::de::DeserializeOwned,
    {
        let id = self.next_request_id();
        let mut request = JsonRpcRequest::new(id.clone(), method);
        if let Some(p) = params {
            request = request.with_params(p);
        }
        let request_json = serde_json::to_string(&request)?;

        let mut transport = self.transport.lock().await;
        let exchange = async {
            transport.send(&request_json).await?;
            read_response(&mut *transport, &id).await
        };
        let response = timeout(limit, exchange)
            .await
            .map_err(|_| Error::Timeout(limit))??;

        let result_value = response.into_result()?;
        Ok(serde_json::from_value(result_value)?)
    }

    async fn notify(&self, method: &str) -> Result<()> {
        let notification = serde_json::to_string(&JsonRpcNotification::new(method))?;
        self.transport.lock().await.send(&notification).await
    }
}

/// Read until the response for `id` arrives.
///
/// Server-initiated notifications and stale responses from calls that
/// already timed out are skipped.
async fn read_response<T>(transport: &mut T, id: &RequestId) -> Result<JsonRpcResponse>
where
    T: Transport + ?Sized,
{
    loop {
        let Some(line) = transport.receive().await? else {
            return Err(Error::Closed);
        };

        let value: Value = serde_json::from_str(&line)?;
        if value.get("id").is_none_or(Value::is_null) {
            debug!(method = ?value.get("method"), "skipping server notification");
            continue;
        }

        let response: JsonRpcResponse = serde_json::from_value(value)
            .map_err(|e| Error::InvalidResponse(e.to_string()))?;
        if &response.id != id {
            warn!(expected = %id, got = %response.id, "discarding response for another request");
            continue;
        }
        return Ok(response);
    }
}
