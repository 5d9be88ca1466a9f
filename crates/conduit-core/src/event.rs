//! Normalized, caller-facing domain events.
//!
//! The peer speaks dozens of notification methods; callers only ever see the
//! handful of event types below. Every event is stamped with the session id
//! it belongs to and the time the bridge produced it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codex::ApprovalRecord;

/// Session id used when nothing in a payload identifies its owner.
pub const UNKNOWN_SESSION: &str = "unknown";

/// A normalized event emitted by the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainEvent {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl DomainEvent {
    pub fn new(session_id: impl Into<String>, timestamp: DateTime<Utc>, payload: EventPayload) -> Self {
        Self {
            session_id: session_id.into(),
            timestamp,
            payload,
        }
    }

    /// Wire name of the event type (e.g. `"item.delta"`).
    pub fn type_name(&self) -> &'static str {
        match self.payload {
            EventPayload::ThreadStarted { .. } => "thread.started",
            EventPayload::TurnStarted { .. } => "turn.started",
            EventPayload::TurnCompleted { .. } => "turn.completed",
            EventPayload::ItemStarted { .. } => "item.started",
            EventPayload::ItemCompleted { .. } => "item.completed",
            EventPayload::ItemDelta { .. } => "item.delta",
            EventPayload::ApprovalRequest { .. } => "approval.request",
            EventPayload::Error { .. } => "error",
        }
    }

    /// Turn the event belongs to, when it is turn-scoped.
    pub fn turn_id(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::TurnStarted { turn_id, .. }
            | EventPayload::TurnCompleted { turn_id, .. }
            | EventPayload::ItemStarted { turn_id, .. }
            | EventPayload::ItemCompleted { turn_id, .. }
            | EventPayload::ItemDelta { turn_id, .. } => Some(turn_id),
            EventPayload::ApprovalRequest { approval } => approval.turn_id.as_deref(),
            EventPayload::Error { turn_id, .. } => turn_id.as_deref(),
            EventPayload::ThreadStarted { .. } => None,
        }
    }
}

/// What kind of text an `item.delta` carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeltaKind {
    Message,
    CommandOutput,
    ReasoningSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventPayload {
    #[serde(rename = "thread.started", rename_all = "camelCase")]
    ThreadStarted { thread_id: String },

    #[serde(rename = "turn.started", rename_all = "camelCase")]
    TurnStarted { thread_id: String, turn_id: String },

    #[serde(rename = "turn.completed", rename_all = "camelCase")]
    TurnCompleted {
        thread_id: String,
        turn_id: String,
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// `item` is the peer's item object, passed through untouched.
    #[serde(rename = "item.started", rename_all = "camelCase")]
    ItemStarted {
        thread_id: String,
        turn_id: String,
        item: Value,
    },

    #[serde(rename = "item.completed", rename_all = "camelCase")]
    ItemCompleted {
        thread_id: String,
        turn_id: String,
        item: Value,
    },

    #[serde(rename = "item.delta", rename_all = "camelCase")]
    ItemDelta {
        thread_id: String,
        turn_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        item_id: Option<String>,
        kind: DeltaKind,
        delta: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary_index: Option<u64>,
    },

    #[serde(rename = "approval.request", rename_all = "camelCase")]
    ApprovalRequest { approval: ApprovalRecord },

    /// `recoverable` is only true for loss of the peer process.
    #[serde(rename = "error", rename_all = "camelCase")]
    Error {
        message: String,
        recoverable: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thread_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        turn_id: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn delta_serializes_flat_with_dotted_type() {
        let event = DomainEvent::new(
            "session-1",
            at(),
            EventPayload::ItemDelta {
                thread_id: "thr".to_string(),
                turn_id: "turn".to_string(),
                item_id: Some("item".to_string()),
                kind: DeltaKind::CommandOutput,
                delta: "ok\n".to_string(),
                summary_index: None,
            },
        );

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "item.delta");
        assert_eq!(value["sessionId"], "session-1");
        assert_eq!(value["turnId"], "turn");
        assert_eq!(value["itemId"], "item");
        assert_eq!(value["kind"], "command-output");
        assert!(value.get("summaryIndex").is_none());
        assert_eq!(event.type_name(), "item.delta");
    }

    #[test]
    fn error_event_roundtrip() {
        let event = DomainEvent::new(
            UNKNOWN_SESSION,
            at(),
            EventPayload::Error {
                message: "agent process exited with code 1".to_string(),
                recoverable: true,
                thread_id: None,
                turn_id: None,
            },
        );

        let json = serde_json::to_string(&event).unwrap();
        let parsed: DomainEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
        assert!(parsed.turn_id().is_none());
    }

    #[test]
    fn turn_completed_omits_missing_error() {
        let event = DomainEvent::new(
            "s",
            at(),
            EventPayload::TurnCompleted {
                thread_id: "thr".to_string(),
                turn_id: "turn".to_string(),
                status: "completed".to_string(),
                error: None,
            },
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "sessionId": "s",
                "timestamp": "2026-01-02T03:04:05Z",
                "type": "turn.completed",
                "threadId": "thr",
                "turnId": "turn",
                "status": "completed",
            })
        );
        assert_eq!(event.turn_id(), Some("turn"));
    }
}
