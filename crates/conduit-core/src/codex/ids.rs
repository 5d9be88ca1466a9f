//! Identity extraction from loosely shaped peer payloads.
//!
//! The same identifier shows up under different names and nesting depths
//! depending on which generation of the protocol emitted it. Each lookup walks
//! a fixed list of paths and takes the first hit; the order is load-bearing,
//! since picking a different field can attribute an event to the wrong
//! session.

use serde_json::Value;

type FieldPath = &'static [&'static str];

pub(crate) const THREAD_ID_PATHS: &[FieldPath] = &[
    &["threadId"],
    &["thread_id"],
    &["thread", "id"],
    &["conversationId"],
    &["conversation_id"],
    &["msg", "thread_id"],
    &["msg", "threadId"],
    &["msg", "conversation_id"],
    &["item", "threadId"],
];

pub(crate) const TURN_ID_PATHS: &[FieldPath] = &[
    &["turnId"],
    &["turn_id"],
    &["turn", "id"],
    &["msg", "turn_id"],
    &["msg", "turnId"],
    &["item", "turnId"],
];

pub(crate) const APPROVAL_ID_PATHS: &[FieldPath] = &[
    &["approvalId"],
    &["approval_id"],
    &["requestId"],
    &["request_id"],
    &["callId"],
    &["call_id"],
    &["msg", "approval_id"],
    &["msg", "call_id"],
    &["id"],
];

pub(crate) const ITEM_ID_PATHS: &[FieldPath] = &[
    &["itemId"],
    &["item_id"],
    &["item", "id"],
    &["msg", "item_id"],
    &["msg", "itemId"],
];

pub(crate) const CALL_ID_PATHS: &[FieldPath] = &[
    &["msg", "call_id"],
    &["msg", "callId"],
    &["call_id"],
    &["callId"],
];

const COMMAND_PATHS: &[FieldPath] = &[&["command"], &["msg", "command"], &["item", "command"]];

fn lookup<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, key| current.get(key))
}

/// First non-empty identifier found along `paths`. Numbers are accepted and
/// rendered in decimal.
pub(crate) fn first_id(params: &Value, paths: &[FieldPath]) -> Option<String> {
    paths.iter().find_map(|path| match lookup(params, path)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

pub fn thread_id(params: &Value) -> Option<String> {
    first_id(params, THREAD_ID_PATHS)
}

pub fn turn_id(params: &Value) -> Option<String> {
    first_id(params, TURN_ID_PATHS)
}

pub fn approval_id(params: &Value) -> Option<String> {
    first_id(params, APPROVAL_ID_PATHS)
}

pub fn item_id(params: &Value) -> Option<String> {
    first_id(params, ITEM_ID_PATHS)
}

pub fn call_id(params: &Value) -> Option<String> {
    first_id(params, CALL_ID_PATHS)
}

/// Human-readable command line, if the payload carries one.
///
/// argv-style arrays are shell-joined so the result can be pasted into a
/// terminal.
pub fn command_text(params: &Value) -> Option<String> {
    COMMAND_PATHS.iter().find_map(|path| match lookup(params, path)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Array(parts) => {
            let words: Vec<&str> = parts.iter().filter_map(Value::as_str).collect();
            if words.is_empty() {
                return None;
            }
            Some(shlex::try_join(words.iter().copied()).unwrap_or_else(|_| words.join(" ")))
        }
        _ => None,
    })
}

/// String field at `path`, ignoring empty strings.
pub(crate) fn str_at<'a>(params: &'a Value, path: &[&str]) -> Option<&'a str> {
    lookup(params, path)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}
