//! Inference engine abstraction.
//!
//! The orchestrator needs two things from a model: a prompt rendered from the
//! conversation and tool schema, and a finite stream of generated text for
//! that prompt.

mod llama_server;
mod scripted;
mod template;

pub use llama_server::{LlamaServerEngine, LlamaServerEngineBuilder};
pub use scripted::ScriptedEngine;
pub use template::Template;

use std::future::Future;
use std::pin::Pin;

use futures::Stream;
use thiserror::Error;

use crate::message::Message;
use crate::parser::ChatFormat;
use crate::tool::ToolDescriptor;

/// Errors from prompt rendering or generation.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("network: {0}")]
    Network(String),
    #[error("inference server returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid server response: {0}")]
    InvalidResponse(String),
    #[error("render failed: {0}")]
    Render(String),
    #[error("{0}")]
    Scripted(String),
}

/// A prompt plus the format the model is expected to answer in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPrompt {
    pub text: String,
    pub format: ChatFormat,
}

/// Lazily generated text fragments for one turn.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, EngineError>> + Send>>;

/// Trait for inference engines.
pub trait Engine: Send + Sync {
    /// Render the conversation and the offered tools into a prompt.
    fn render_prompt(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<RenderedPrompt, EngineError>;

    /// Start generating. The stream ends at end-of-generation or after
    /// `max_tokens` tokens, whichever comes first.
    fn generate(
        &self,
        prompt: &RenderedPrompt,
        max_tokens: usize,
    ) -> impl Future<Output = Result<FragmentStream, EngineError>> + Send;
}
