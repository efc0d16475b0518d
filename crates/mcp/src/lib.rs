//! MCP (Model Context Protocol) over newline-delimited JSON-RPC.
//!
//! Both directions live here: [`Session`] is the client handle used to reach
//! a remote tool provider, and [`Server`] exposes any [`ToolService`] to
//! remote clients.
//!
//! # Example
//!
//! ```no_run
//! use mcp::Session;
//! use std::time::Duration;
//!
//! # async fn example() -> mcp::Result<()> {
//! let session = Session::connect_tcp("localhost", 8889).await?;
//! if !session.initialize("steward", "0.1.0").await? {
//!     return Ok(());
//! }
//!
//! for tool in session.list_tools().await? {
//!     println!("Tool: {}", tool.name);
//! }
//!
//! let result = session
//!     .call_tool(
//!         "calculator",
//!         Some(serde_json::json!({"expression": "2 + 2"})),
//!         Duration::from_secs(10),
//!     )
//!     .await?;
//! println!("{}", result.joined_text());
//! # Ok(())
//! # }
//! ```

mod error;
mod protocol;
mod server;
mod session;
mod transport;

pub use error::{Error, Result};
pub use protocol::{
    CallToolParams, CallToolResult, Implementation, InitializeParams, InitializeResult,
    JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ListToolsResult,
    PROTOCOL_VERSION, RequestId, ServerCapabilities, Tool, ToolContent, ToolsCapability,
    error_codes,
};
pub use server::{Server, ToolService};
pub use session::{DEFAULT_TIMEOUT, Session};
pub use transport::{
    ChannelTransport, LineTransport, MAX_OUTPUT_SIZE, ProcessConfig, StdioTransport,
    TcpTransport, Transport,
};
