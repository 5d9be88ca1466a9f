//! Codex app-server protocol: wire types, identity extraction, approvals and
//! notification normalization.

pub mod approval;
pub mod chunk;
mod exec_events;
pub mod ids;
pub mod normalizer;
pub mod spawn;
pub mod types;

pub use approval::{ApprovalKind, ApprovalOptions, ApprovalRecord, PeerDecision};
pub use normalizer::{Normalizer, ThreadContext};
pub use spawn::CodexConfig;
pub use types::JsonRpcMessage;
