//! Steward runtime: tool-calling orchestration and multi-server routing.
//!
//! # Overview
//!
//! - **Conversation**: the append-only message log of one conversation.
//! - **Parser**: turns raw generated text into free text and tool calls.
//! - **ToolHost**: owns provider connections (in-process handlers and remote
//!   MCP sessions) and the registry that routes a tool name to exactly one
//!   of them.
//! - **Engine**: renders prompts and streams generated text.
//! - **Orchestrator**: the control loop tying the rest together.
//!
//! # Example
//!
//! ```no_run
//! use policy::CommandPolicy;
//! use runtime::{Conversation, LlamaServerEngine, LocalProvider, Orchestrator, ToolHost};
//!
//! # async fn example() -> runtime::Result<()> {
//! let host = ToolHost::new();
//! host.add_local(LocalProvider::builtin(CommandPolicy::default())).await?;
//!
//! let engine = LlamaServerEngine::builder("http://127.0.0.1:8080").build();
//! let orchestrator = Orchestrator::builder(engine).build();
//!
//! let mut conversation = Conversation::with_system("You are a helpful assistant.");
//! orchestrator.chat(&mut conversation, &host, "What is 12 * 7?").await?;
//! if let Some(answer) = conversation.last() {
//!     println!("{}", answer.content());
//! }
//! # Ok(())
//! # }
//! ```

mod conversation;
pub mod engine;
mod error;
mod host;
mod message;
mod orchestrator;
mod parser;
mod provider;
mod registry;
mod tool;
pub mod tools;

pub use conversation::Conversation;
pub use engine::{
    Engine, EngineError, FragmentStream, LlamaServerEngine, RenderedPrompt, ScriptedEngine,
    Template,
};
pub use error::{Error, Result};
pub use host::{ConnectReport, HostCallError, ProviderInfo, ToolEntry, ToolHost};
pub use message::{Message, Role, ToolCall};
pub use orchestrator::{
    Approver, DEFAULT_MAX_ROUNDS, DEFAULT_MAX_TOKENS, DEFAULT_TOOL_TIMEOUT, Orchestrator,
    OrchestratorBuilder, RunReport, StopReason, ToolFailure,
};
pub use parser::{ChatFormat, Turn, parse_turn};
pub use provider::{
    ClientIdentity, DispatchError, Endpoint, LOCAL_PROVIDER, Provider, RemoteProvider, RemoteSpec,
};
pub use registry::{RegistryError, Resolved, ToolRegistry};
pub use tool::{ToolDescriptor, ToolKind};
pub use tools::{LocalProvider, ToolError, ToolHandler};
