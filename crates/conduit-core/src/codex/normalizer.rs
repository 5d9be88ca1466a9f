//! Classification of peer notifications into domain events.
//!
//! The normalizer owns every per-bridge map that attribution depends on:
//! thread contexts, the turn→thread index, streaming message buffers, command
//! execution contexts and the seen-thread set. It performs no I/O, so each
//! rule can be exercised by feeding it a method name and a params object.
//!
//! Attribution rules:
//! - thread and turn ids are pulled from the payload with the precedence in
//!   [`super::ids`]
//! - a turn-scoped event needs a turn id and a thread id (direct, or via the
//!   turn index); without both it is dropped rather than emitted half-addressed
//! - the session id comes from [`Normalizer::resolve_session`]

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::approval::ApprovalRecord;
use super::ids;
use crate::event::{DeltaKind, DomainEvent, EventPayload, UNKNOWN_SESSION};

/// Namespace of the low-level execution events handled in `exec_events`.
pub const LOW_LEVEL_PREFIX: &str = "codex/event/";

/// Caller-side identity of a thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadContext {
    pub session_id: String,
    pub working_directory: PathBuf,
}

impl ThreadContext {
    pub fn new(session_id: impl Into<String>, working_directory: impl Into<PathBuf>) -> Self {
        Self {
            session_id: session_id.into(),
            working_directory: working_directory.into(),
        }
    }
}

/// Where a turn-scoped event belongs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Address {
    pub session_id: String,
    pub thread_id: String,
    pub turn_id: String,
}

/// State captured when a low-level command execution begins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ExecContext {
    pub thread_id: String,
    pub turn_id: String,
    pub command: Option<String>,
    pub cwd: Option<String>,
}

#[derive(Debug, Default)]
pub struct Normalizer {
    threads: HashMap<String, ThreadContext>,
    turn_threads: HashMap<String, String>,
    seen_threads: HashSet<String>,
    deferred_thread_starts: HashSet<String>,
    message_buffers: HashMap<String, String>,
    pub(crate) exec_contexts: HashMap<String, ExecContext>,
}

impl Normalizer {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Local registration
    // ------------------------------------------------------------------

    /// Record a thread created through this bridge.
    ///
    /// Returns the `thread.started` event unless it has already fired for
    /// this thread. A start notification that arrived before the thread was
    /// registered is flushed here.
    pub fn register_thread(
        &mut self,
        thread_id: &str,
        context: ThreadContext,
        now: DateTime<Utc>,
    ) -> Option<DomainEvent> {
        self.threads.entry(thread_id.to_string()).or_insert(context);
        if self.deferred_thread_starts.remove(thread_id) {
            log::debug!("Flushing deferred thread start for {}", thread_id);
        }
        self.thread_started_once(thread_id, now)
    }

    /// Record that `turn_id` belongs to `thread_id`. The first mapping wins.
    pub fn record_turn(&mut self, turn_id: &str, thread_id: &str) {
        self.turn_threads
            .entry(turn_id.to_string())
            .or_insert_with(|| thread_id.to_string());
    }

    pub fn thread_for_turn(&self, turn_id: &str) -> Option<&str> {
        self.turn_threads.get(turn_id).map(String::as_str)
    }

    pub fn thread_context(&self, thread_id: &str) -> Option<&ThreadContext> {
        self.threads.get(thread_id)
    }

    /// Text accumulated so far for an in-progress message item.
    pub fn buffered_text(&self, item_id: &str) -> Option<&str> {
        self.message_buffers.get(item_id).map(String::as_str)
    }

    pub fn has_deferred_thread_start(&self, thread_id: &str) -> bool {
        self.deferred_thread_starts.contains(thread_id)
    }

    // ------------------------------------------------------------------
    // Attribution
    // ------------------------------------------------------------------

    /// Caller-facing session id for a thread/turn pair.
    ///
    /// Precedence: the thread's recorded session, then the session (or id) of
    /// the thread owning a known turn, then the raw thread id, then the raw
    /// turn id, then [`UNKNOWN_SESSION`].
    pub fn resolve_session(&self, thread_id: Option<&str>, turn_id: Option<&str>) -> String {
        if let Some(context) = thread_id.and_then(|id| self.threads.get(id)) {
            return context.session_id.clone();
        }
        if let Some(owner) = turn_id.and_then(|id| self.turn_threads.get(id)) {
            return self
                .threads
                .get(owner)
                .map(|context| context.session_id.clone())
                .unwrap_or_else(|| owner.clone());
        }
        thread_id
            .or(turn_id)
            .map(str::to_string)
            .unwrap_or_else(|| UNKNOWN_SESSION.to_string())
    }

    pub(crate) fn address(&self, params: &Value) -> Option<Address> {
        let turn_id = ids::turn_id(params)?;
        let raw_thread = ids::thread_id(params);
        let thread_id = raw_thread
            .clone()
            .or_else(|| self.turn_threads.get(&turn_id).cloned())?;
        let session_id = self.resolve_session(raw_thread.as_deref(), Some(&turn_id));
        Some(Address {
            session_id,
            thread_id,
            turn_id,
        })
    }

    // ------------------------------------------------------------------
    // Classification
    // ------------------------------------------------------------------

    /// Normalize one notification. `None` means nothing is emitted.
    pub fn notification(
        &mut self,
        method: &str,
        params: &Value,
        now: DateTime<Utc>,
    ) -> Option<DomainEvent> {
        if let Some(name) = method.strip_prefix(LOW_LEVEL_PREFIX) {
            return self.low_level(name, params, now);
        }

        let event = match method {
            "thread/started" => return self.thread_started(params, now),
            "turn/started" => self.turn_started(params, now),
            "turn/completed" => self.turn_completed(params, now),
            "item/started" => self.item_started(params, now),
            "item/completed" => self.item_completed(params, now),
            "item/agentMessage/delta" => self.delta(params, DeltaKind::Message, now),
            "item/commandExecution/outputDelta" => {
                self.delta(params, DeltaKind::CommandOutput, now)
            }
            "item/reasoning/summaryTextDelta" => {
                self.delta(params, DeltaKind::ReasoningSummary, now)
            }
            "error" => self.peer_error(params, now),

            "thread/name/updated"
            | "thread/tokenUsage/updated"
            | "thread/compacted"
            | "account/updated"
            | "account/rateLimits/updated"
            | "deprecationNotice" => return None,

            _ => {
                log::debug!("Ignoring notification {}", method);
                return None;
            }
        };

        if event.is_none() {
            log::debug!("Dropping unaddressable {} notification", method);
        }
        event
    }

    /// Build the `approval.request` event for a record. Approvals are never
    /// dropped for missing ids: the peer is waiting on an answer.
    pub fn approval_event(&self, record: ApprovalRecord, now: DateTime<Utc>) -> DomainEvent {
        let session_id = self.resolve_session(record.thread_id.as_deref(), record.turn_id.as_deref());
        DomainEvent::new(
            session_id,
            now,
            EventPayload::ApprovalRequest { approval: record },
        )
    }

    fn thread_started_once(&mut self, thread_id: &str, now: DateTime<Utc>) -> Option<DomainEvent> {
        if !self.seen_threads.insert(thread_id.to_string()) {
            return None;
        }
        Some(DomainEvent::new(
            self.resolve_session(Some(thread_id), None),
            now,
            EventPayload::ThreadStarted {
                thread_id: thread_id.to_string(),
            },
        ))
    }

    fn thread_started(&mut self, params: &Value, now: DateTime<Utc>) -> Option<DomainEvent> {
        let thread_id = ids::thread_id(params)?;
        if self.seen_threads.contains(&thread_id) {
            return None;
        }
        if !self.threads.contains_key(&thread_id) {
            self.deferred_thread_starts.insert(thread_id);
            return None;
        }
        self.thread_started_once(&thread_id, now)
    }

    fn turn_started(&mut self, params: &Value, now: DateTime<Utc>) -> Option<DomainEvent> {
        if let (Some(turn_id), Some(thread_id)) = (ids::turn_id(params), ids::thread_id(params)) {
            self.record_turn(&turn_id, &thread_id);
        }
        let address = self.address(params)?;
        Some(DomainEvent::new(
            address.session_id,
            now,
            EventPayload::TurnStarted {
                thread_id: address.thread_id,
                turn_id: address.turn_id,
            },
        ))
    }

    fn turn_completed(&mut self, params: &Value, now: DateTime<Utc>) -> Option<DomainEvent> {
        let address = self.address(params)?;
        let status = ids::str_at(params, &["turn", "status"])
            .or_else(|| ids::str_at(params, &["status"]))
            .unwrap_or("completed")
            .to_string();
        let error = ids::str_at(params, &["turn", "error", "message"])
            .or_else(|| ids::str_at(params, &["turn", "error"]))
            .or_else(|| ids::str_at(params, &["error", "message"]))
            .map(str::to_string);

        Some(DomainEvent::new(
            address.session_id,
            now,
            EventPayload::TurnCompleted {
                thread_id: address.thread_id,
                turn_id: address.turn_id,
                status,
                error,
            },
        ))
    }

    fn item_started(&mut self, params: &Value, now: DateTime<Utc>) -> Option<DomainEvent> {
        let item = params.get("item").filter(|v| v.is_object())?.clone();
        let address = self.address(params)?;
        Some(DomainEvent::new(
            address.session_id,
            now,
            EventPayload::ItemStarted {
                thread_id: address.thread_id,
                turn_id: address.turn_id,
                item,
            },
        ))
    }

    fn item_completed(&mut self, params: &Value, now: DateTime<Utc>) -> Option<DomainEvent> {
        let mut item = params.get("item").filter(|v| v.is_object())?.clone();
        let address = self.address(params)?;

        if item.get("type").and_then(Value::as_str) == Some("agentMessage") {
            let buffered = ids::str_at(&item, &["id"]).and_then(|id| self.message_buffers.remove(id));
            if let (Some(text), Some(fields)) = (buffered, item.as_object_mut()) {
                if fields.get("text").map_or(true, Value::is_null) {
                    fields.insert("text".to_string(), Value::String(text));
                }
            }
        }

        Some(DomainEvent::new(
            address.session_id,
            now,
            EventPayload::ItemCompleted {
                thread_id: address.thread_id,
                turn_id: address.turn_id,
                item,
            },
        ))
    }

    fn delta(&mut self, params: &Value, kind: DeltaKind, now: DateTime<Utc>) -> Option<DomainEvent> {
        let delta = params.get("delta")?.as_str()?.to_string();
        let address = self.address(params)?;
        let item_id = ids::item_id(params);
        let summary_index = match kind {
            DeltaKind::ReasoningSummary => params
                .get("summaryIndex")
                .or_else(|| params.get("summary_index"))
                .and_then(Value::as_u64),
            _ => None,
        };
        Some(self.text_delta(address, item_id, kind, delta, summary_index, now))
    }

    /// Emit an `item.delta`, buffering message text per item.
    pub(crate) fn text_delta(
        &mut self,
        address: Address,
        item_id: Option<String>,
        kind: DeltaKind,
        delta: String,
        summary_index: Option<u64>,
        now: DateTime<Utc>,
    ) -> DomainEvent {
        if let (DeltaKind::Message, Some(id)) = (kind, &item_id) {
            self.message_buffers
                .entry(id.clone())
                .or_default()
                .push_str(&delta);
        }
        DomainEvent::new(
            address.session_id,
            now,
            EventPayload::ItemDelta {
                thread_id: address.thread_id,
                turn_id: address.turn_id,
                item_id,
                kind,
                delta,
                summary_index,
            },
        )
    }

    fn peer_error(&mut self, params: &Value, now: DateTime<Utc>) -> Option<DomainEvent> {
        let raw_thread = ids::thread_id(params);
        let turn_id = ids::turn_id(params);
        if raw_thread.is_none() && turn_id.is_none() {
            return None;
        }
        let thread_id = raw_thread.clone().or_else(|| {
            turn_id
                .as_deref()
                .and_then(|t| self.thread_for_turn(t))
                .map(str::to_string)
        });
        let message = ids::str_at(params, &["error", "message"])
            .or_else(|| ids::str_at(params, &["message"]))
            .unwrap_or("Unknown error")
            .to_string();
        let recoverable = params
            .get("willRetry")
            .or_else(|| params.get("will_retry"))
            .and_then(Value::as_bool)
            .unwrap_or(false);

        Some(DomainEvent::new(
            self.resolve_session(raw_thread.as_deref(), turn_id.as_deref()),
            now,
            EventPayload::Error {
                message,
                recoverable,
                thread_id,
                turn_id,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn with_thread(thread_id: &str, session_id: &str) -> Normalizer {
        let mut n = Normalizer::new();
        n.register_thread(thread_id, ThreadContext::new(session_id, "/work"), now());
        n
    }

    mod session_resolution {
        use super::*;

        #[test]
        fn known_thread_uses_recorded_session() {
            let n = with_thread("thr", "session-a");
            assert_eq!(n.resolve_session(Some("thr"), Some("turn")), "session-a");
        }

        #[test]
        fn known_turn_uses_owning_threads_session() {
            let mut n = with_thread("thr", "session-a");
            n.record_turn("turn", "thr");
            assert_eq!(n.resolve_session(Some("other-thread"), Some("turn")), "session-a");
            assert_eq!(n.resolve_session(None, Some("turn")), "session-a");
        }

        #[test]
        fn known_turn_with_unregistered_owner_uses_owner_id() {
            let mut n = Normalizer::new();
            n.record_turn("turn", "thr");
            assert_eq!(n.resolve_session(None, Some("turn")), "thr");
        }

        #[test]
        fn raw_thread_then_raw_turn_then_unknown() {
            let n = Normalizer::new();
            assert_eq!(n.resolve_session(Some("thr"), Some("turn")), "thr");
            assert_eq!(n.resolve_session(None, Some("turn")), "turn");
            assert_eq!(n.resolve_session(None, None), UNKNOWN_SESSION);
        }
    }

    mod thread_started {
        use super::*;

        #[test]
        fn local_creation_then_notification_fires_once() {
            let mut n = Normalizer::new();
            let first = n.register_thread("thr", ThreadContext::new("s", "/w"), now());
            assert!(matches!(
                first.as_ref().map(|e| &e.payload),
                Some(EventPayload::ThreadStarted { thread_id }) if thread_id == "thr"
            ));
            assert_eq!(first.unwrap().session_id, "s");

            let again = n.notification("thread/started", &json!({"thread": {"id": "thr"}}), now());
            assert!(again.is_none());
        }

        #[test]
        fn notification_before_creation_is_deferred_then_flushed_once() {
            let mut n = Normalizer::new();
            let early = n.notification("thread/started", &json!({"thread": {"id": "thr"}}), now());
            assert!(early.is_none());
            assert!(n.has_deferred_thread_start("thr"));

            let flushed = n.register_thread("thr", ThreadContext::new("s", "/w"), now());
            assert!(flushed.is_some());
            assert!(!n.has_deferred_thread_start("thr"));

            assert!(n
                .notification("thread/started", &json!({"threadId": "thr"}), now())
                .is_none());
            assert!(n.register_thread("thr", ThreadContext::new("s2", "/w"), now()).is_none());
        }

        #[test]
        fn context_is_never_replaced() {
            let mut n = with_thread("thr", "first");
            n.register_thread("thr", ThreadContext::new("second", "/elsewhere"), now());
            assert_eq!(n.thread_context("thr").unwrap().session_id, "first");
        }
    }

    mod turns {
        use super::*;

        #[test]
        fn turn_started_populates_index() {
            let mut n = with_thread("thr", "s");
            let event = n
                .notification(
                    "turn/started",
                    &json!({"threadId": "thr", "turn": {"id": "turn-1", "status": "inProgress"}}),
                    now(),
                )
                .unwrap();
            assert_eq!(event.session_id, "s");
            assert_eq!(event.type_name(), "turn.started");
            assert_eq!(n.thread_for_turn("turn-1"), Some("thr"));
        }

        #[test]
        fn turn_completed_carries_status_and_error() {
            let mut n = with_thread("thr", "s");
            n.record_turn("turn-1", "thr");
            let event = n
                .notification(
                    "turn/completed",
                    &json!({"turn": {"id": "turn-1", "status": "failed", "error": {"message": "boom"}}}),
                    now(),
                )
                .unwrap();
            match event.payload {
                EventPayload::TurnCompleted {
                    thread_id,
                    status,
                    error,
                    ..
                } => {
                    assert_eq!(thread_id, "thr");
                    assert_eq!(status, "failed");
                    assert_eq!(error.as_deref(), Some("boom"));
                }
                other => panic!("unexpected {:?}", other),
            }
        }

        #[test]
        fn turn_completed_defaults_status() {
            let mut n = Normalizer::new();
            let event = n
                .notification("turn/completed", &json!({"threadId": "thr", "turnId": "t"}), now())
                .unwrap();
            assert!(matches!(
                event.payload,
                EventPayload::TurnCompleted { ref status, error: None, .. } if status == "completed"
            ));
        }

        #[test]
        fn unaddressable_turn_events_are_dropped() {
            let mut n = Normalizer::new();
            assert!(n.notification("turn/completed", &json!({"turnId": "t"}), now()).is_none());
            assert!(n.notification("turn/started", &json!({"threadId": "thr"}), now()).is_none());
        }
    }

    mod items {
        use super::*;

        fn params(extra: Value) -> Value {
            let mut base = json!({"threadId": "thr", "turnId": "turn"});
            if let (Some(base), Some(extra)) = (base.as_object_mut(), extra.as_object()) {
                base.extend(extra.clone());
            }
            base
        }

        #[test]
        fn item_started_passes_item_through() {
            let mut n = with_thread("thr", "s");
            let item = json!({"id": "item-1", "type": "commandExecution", "command": "ls"});
            let event = n
                .notification("item/started", &params(json!({"item": item.clone()})), now())
                .unwrap();
            assert!(matches!(event.payload, EventPayload::ItemStarted { item: ref i, .. } if *i == item));
        }

        #[test]
        fn item_without_object_is_dropped() {
            let mut n = with_thread("thr", "s");
            assert!(n.notification("item/started", &params(json!({})), now()).is_none());
            assert!(n
                .notification("item/completed", &params(json!({"item": "nope"})), now())
                .is_none());
        }

        #[test]
        fn message_deltas_buffer_until_completion() {
            let mut n = with_thread("thr", "s");
            for chunk in ["Hel", "lo"] {
                let event = n
                    .notification(
                        "item/agentMessage/delta",
                        &params(json!({"itemId": "msg-1", "delta": chunk})),
                        now(),
                    )
                    .unwrap();
                assert!(matches!(
                    event.payload,
                    EventPayload::ItemDelta { kind: DeltaKind::Message, ref delta, .. } if delta == chunk
                ));
            }
            assert_eq!(n.buffered_text("msg-1"), Some("Hello"));

            let done = n
                .notification(
                    "item/completed",
                    &params(json!({"item": {"id": "msg-1", "type": "agentMessage"}})),
                    now(),
                )
                .unwrap();
            match done.payload {
                EventPayload::ItemCompleted { item, .. } => assert_eq!(item["text"], "Hello"),
                other => panic!("unexpected {:?}", other),
            }
            assert!(n.buffered_text("msg-1").is_none());
        }

        #[test]
        fn completed_message_keeps_its_own_text() {
            let mut n = with_thread("thr", "s");
            n.notification(
                "item/agentMessage/delta",
                &params(json!({"itemId": "msg-1", "delta": "partial"})),
                now(),
            );
            let done = n
                .notification(
                    "item/completed",
                    &params(json!({"item": {"id": "msg-1", "type": "agentMessage", "text": "final"}})),
                    now(),
                )
                .unwrap();
            match done.payload {
                EventPayload::ItemCompleted { item, .. } => assert_eq!(item["text"], "final"),
                other => panic!("unexpected {:?}", other),
            }
            assert!(n.buffered_text("msg-1").is_none());
        }

        #[test]
        fn command_output_delta() {
            let mut n = with_thread("thr", "s");
            let event = n
                .notification(
                    "item/commandExecution/outputDelta",
                    &params(json!({"itemId": "cmd-1", "delta": "file.txt\n"})),
                    now(),
                )
                .unwrap();
            assert!(matches!(
                event.payload,
                EventPayload::ItemDelta { kind: DeltaKind::CommandOutput, item_id: Some(ref id), .. } if id == "cmd-1"
            ));
            assert!(n.buffered_text("cmd-1").is_none());
        }

        #[test]
        fn reasoning_summary_carries_index() {
            let mut n = with_thread("thr", "s");
            let event = n
                .notification(
                    "item/reasoning/summaryTextDelta",
                    &params(json!({"itemId": "r-1", "delta": "thinking", "summaryIndex": 2})),
                    now(),
                )
                .unwrap();
            assert!(matches!(
                event.payload,
                EventPayload::ItemDelta {
                    kind: DeltaKind::ReasoningSummary,
                    summary_index: Some(2),
                    ..
                }
            ));
        }

        #[test]
        fn empty_structured_delta_is_forwarded() {
            let mut n = with_thread("thr", "s");
            let event = n
                .notification(
                    "item/agentMessage/delta",
                    &params(json!({"itemId": "m", "delta": ""})),
                    now(),
                )
                .unwrap();
            assert!(matches!(event.payload, EventPayload::ItemDelta { ref delta, .. } if delta.is_empty()));
        }

        #[test]
        fn missing_delta_is_dropped() {
            let mut n = with_thread("thr", "s");
            assert!(n
                .notification("item/agentMessage/delta", &params(json!({"itemId": "m"})), now())
                .is_none());
        }

        #[test]
        fn delta_with_only_turn_id_resolves_through_index() {
            let mut n = with_thread("thr", "session-a");
            n.record_turn("turn-9", "thr");
            let event = n
                .notification(
                    "item/agentMessage/delta",
                    &json!({"turnId": "turn-9", "itemId": "m", "delta": "hi"}),
                    now(),
                )
                .unwrap();
            assert_eq!(event.session_id, "session-a");
            assert!(matches!(
                event.payload,
                EventPayload::ItemDelta { ref thread_id, .. } if thread_id == "thr"
            ));
        }
    }

    mod errors {
        use super::*;

        #[test]
        fn peer_error_maps_will_retry_to_recoverable() {
            let mut n = with_thread("thr", "s");
            let event = n
                .notification(
                    "error",
                    &json!({"threadId": "thr", "turnId": "t", "error": {"message": "rate limited"}, "willRetry": true}),
                    now(),
                )
                .unwrap();
            assert_eq!(event.session_id, "s");
            assert!(matches!(
                event.payload,
                EventPayload::Error { ref message, recoverable: true, .. } if message == "rate limited"
            ));
        }

        #[test]
        fn peer_error_without_ids_is_dropped() {
            let mut n = Normalizer::new();
            assert!(n
                .notification("error", &json!({"error": {"message": "x"}}), now())
                .is_none());
        }
    }

    mod misc {
        use super::*;

        #[test]
        fn informational_and_unknown_notifications_are_ignored() {
            let mut n = with_thread("thr", "s");
            for method in [
                "thread/tokenUsage/updated",
                "account/rateLimits/updated",
                "thread/name/updated",
                "something/new",
            ] {
                assert!(n.notification(method, &json!({"threadId": "thr"}), now()).is_none());
            }
        }

        #[test]
        fn approval_event_falls_back_to_turn_id() {
            let n = Normalizer::new();
            let record = ApprovalRecord::from_peer(
                "7".to_string(),
                "item/commandExecution/requestApproval",
                &json!({"turnId": "turn-x"}),
                now(),
            );
            let event = n.approval_event(record, now());
            assert_eq!(event.session_id, "turn-x");
        }

        #[test]
        fn approval_event_without_ids_is_still_emitted() {
            let n = Normalizer::new();
            let record =
                ApprovalRecord::from_peer("7".to_string(), "execCommandApproval", &json!({}), now());
            assert_eq!(n.approval_event(record, now()).session_id, UNKNOWN_SESSION);
        }
    }
}
