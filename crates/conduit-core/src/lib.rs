//! # conduit-core
//!
//! Drives a Codex `app-server` peer over line-delimited JSON-RPC and turns its
//! protocol traffic into a small set of domain events.
//!
//! ## Key Concepts
//!
//! - **Bridge**: one peer process, one handshake, many threads
//! - **Thread / Turn / Item**: the peer's conversation, one request/response
//!   cycle within it, and the units of work (messages, commands, file edits)
//!   a turn produces
//! - **DomainEvent**: the normalized event every listener receives
//! - **Approval**: a pending permission request, answered exactly once

pub mod bridge;
pub mod codex;
pub mod config;
pub mod error;
pub mod event;
pub mod event_bus;
pub mod logging;
pub mod shell;
pub mod spawn;

// Re-export commonly used types
pub use bridge::{Acknowledged, Bridge, HandshakeState};
pub use codex::{ApprovalKind, ApprovalOptions, ApprovalRecord, CodexConfig, ThreadContext};
pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use event::{DeltaKind, DomainEvent, EventPayload};
pub use event_bus::Subscription;
