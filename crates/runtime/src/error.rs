use thiserror::Error;

use crate::engine::EngineError;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("failed to connect to provider {provider}: {source}")]
    Connect {
        provider: String,
        #[source]
        source: mcp::Error,
    },

    #[error("provider {0} rejected the initialize handshake")]
    InitializeRejected(String),

    #[error("provider already connected: {0}")]
    DuplicateProvider(String),

    #[error("no tool providers connected")]
    NoProviders,

    #[error("generation failed: {0}")]
    Engine(#[from] EngineError),

    #[error("invalid state: {0}")]
    InvalidState(String),
}

pub type Result<T> = std::result::Result<T, Error>;
