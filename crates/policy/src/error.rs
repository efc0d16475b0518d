//! Policy error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or validating a command policy.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A deny or allow entry can never match sensibly.
    #[error("invalid policy rule: {0}")]
    InvalidRule(String),

    #[error("failed to parse policy: {0}")]
    Parse(String),

    #[error("failed to read policy file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
