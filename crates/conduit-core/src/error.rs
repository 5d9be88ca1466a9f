//! Error type shared by the bridge and its transport.

use thiserror::Error;

/// Errors surfaced to callers of the bridge.
///
/// Only failures the immediate caller can act on end up here. Malformed peer
/// output and best-effort sends are swallowed inside the bridge instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("Failed to spawn agent: {0}")]
    Spawn(String),

    #[error("Transport error: {0}")]
    Transport(String),

    /// The peer rejected `initialize`. The bridge is unusable after this.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("{message}")]
    Rpc { method: String, message: String },

    #[error("Agent process exited: {0}")]
    ProcessExited(String),

    #[error("Response to {method} is missing {field}")]
    MissingField {
        method: String,
        field: &'static str,
    },

    #[error("Bridge is shut down")]
    Closed,
}

pub type Result<T> = std::result::Result<T, BridgeError>;
