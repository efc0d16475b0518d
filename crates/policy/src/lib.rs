//! Command safety policy.
//!
//! Core principle: **a command-executing tool only runs what the policy can
//! positively recognize.** Everything else is denied.

mod error;
mod markers;
mod policy;

pub use error::{Error, Result};
pub use markers::strip_chat_markers;
pub use policy::{CommandPolicy, Decision, DEFAULT_ALLOW, DEFAULT_DENY};
