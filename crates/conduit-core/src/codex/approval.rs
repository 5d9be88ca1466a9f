//! Approval tickets and decision mapping.
//!
//! An approval reaches us in one of two ways:
//!
//! - **request-backed**: the peer sent a JSON-RPC call and is blocked until we
//!   answer that exact request id with `{decision}`.
//! - **notification-backed**: the peer sent a notification carrying an
//!   approval id; answering means a fresh `approval/respond` call.
//!
//! Either way a ticket is taken out of the [`ApprovalBook`] before anything is
//! sent, so a second decision for the same id finds nothing and does nothing.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ids;

/// Method used to answer notification-backed approvals.
pub const APPROVAL_RESPOND_METHOD: &str = "approval/respond";

/// What the agent wants to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalKind {
    Command,
    FileWrite,
}

impl ApprovalKind {
    /// File changes are recognized by name; everything else is a command.
    pub fn from_method(method: &str) -> Self {
        let lower = method.to_ascii_lowercase();
        if lower.contains("filechange") || lower.contains("patch") {
            Self::FileWrite
        } else {
            Self::Command
        }
    }
}

/// Raw peer payload kept alongside the normalized fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalDetail {
    pub method: String,
    pub params: Value,
}

/// Normalized view of one approval request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRecord {
    /// Id to pass back to `respond_approval`.
    pub id: String,
    pub kind: ApprovalKind,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub detail: ApprovalDetail,
}

impl ApprovalRecord {
    pub fn from_peer(id: String, method: &str, params: &Value, now: DateTime<Utc>) -> Self {
        let kind = ApprovalKind::from_method(method);
        let command = ids::command_text(params);
        let title = match (kind, &command) {
            (ApprovalKind::Command, Some(command)) => format!("Run command: {}", command),
            (ApprovalKind::Command, None) => "Run command".to_string(),
            (ApprovalKind::FileWrite, _) => "Apply file changes".to_string(),
        };
        let reason = ids::str_at(params, &["reason"])
            .or_else(|| ids::str_at(params, &["msg", "reason"]))
            .map(str::to_string);

        Self {
            id,
            kind,
            title,
            command,
            reason,
            thread_id: ids::thread_id(params),
            turn_id: ids::turn_id(params),
            requested_at: now,
            detail: ApprovalDetail {
                method: method.to_string(),
                params: params.clone(),
            },
        }
    }
}

/// Whether a method name denotes an approval request, in either form.
///
/// Covers `item/commandExecution/requestApproval`, `execCommandApproval`,
/// `applyPatchApproval` and `codex/event/exec_approval_request` style names.
pub fn is_approval_method(method: &str) -> bool {
    method.ends_with("Approval") || method.ends_with("_approval_request")
}

/// Decision value understood by the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerDecision {
    Accept,
    Decline,
}

impl PeerDecision {
    /// `approve`, `approve_once`, `approve_always`, ... accept; anything else declines.
    pub fn from_caller(decision: &str) -> Self {
        if decision.starts_with("approve") {
            Self::Accept
        } else {
            Self::Decline
        }
    }
}

/// Hints that accompany a decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApprovalOptions {
    /// "Remember this rule". Forwarded on `approval/respond`, otherwise unused.
    pub remember: bool,
}

/// How a pending approval must be answered.
#[derive(Debug, Clone, PartialEq)]
pub enum ApprovalTicket {
    /// Reply to this exact request id.
    Request { request_id: Value },
    /// Issue `approval/respond` carrying this approval id.
    Notification { approval_id: String },
}

#[derive(Debug, Clone)]
pub struct PendingApproval {
    pub ticket: ApprovalTicket,
    pub record: ApprovalRecord,
}

/// Outstanding approvals keyed by the id exposed to callers.
#[derive(Debug, Default)]
pub struct ApprovalBook {
    pending: HashMap<String, PendingApproval>,
}

impl ApprovalBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new approval. An id that is already pending keeps its
    /// existing ticket and `false` is returned.
    pub fn insert(&mut self, ticket: ApprovalTicket, record: ApprovalRecord) -> bool {
        match self.pending.entry(record.id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(PendingApproval { ticket, record });
                true
            }
        }
    }

    /// Remove and return the ticket for `id`. Only the first call gets it.
    pub fn take(&mut self, id: &str) -> Option<PendingApproval> {
        self.pending.remove(id)
    }

    /// Records of unresolved approvals, oldest first.
    pub fn records(&self) -> Vec<ApprovalRecord> {
        let mut records: Vec<ApprovalRecord> =
            self.pending.values().map(|p| p.record.clone()).collect();
        records.sort_by(|a, b| a.requested_at.cmp(&b.requested_at).then(a.id.cmp(&b.id)));
        records
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
