//! JSON-RPC wire types for the Codex app-server protocol.
//!
//! Inbound lines come in three shapes, told apart by which of `method` and
//! `id` are present:
//!
//! | `method` | `id` | shape |
//! |---|---|---|
//! | yes | yes | server request (the peer is asking us something) |
//! | no  | yes | response to one of our calls |
//! | yes | no  | notification |
//!
//! `JsonRpcMessage` is `#[serde(untagged)]`, so variant order matters: the
//! server request must be tried before the response, which only needs `id`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An inbound JSON-RPC message from the peer.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    ServerRequest(JsonRpcServerRequest),
    Response(JsonRpcResponse),
    Notification(JsonRpcNotification),
}

/// A notification (has method, no id).
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcNotification {
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

/// A response to one of our calls (has id, no method).
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    pub id: Value,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

/// Error object carried by a response.
///
/// Both fields are optional on the way in; peers have been seen to omit the
/// message, and a response we cannot parse would leave its caller waiting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JsonRpcError {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
}

/// A peer-initiated call (has id AND method). It must be answered.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcServerRequest {
    pub method: String,
    pub id: Value,
    #[serde(default)]
    pub params: Option<Value>,
}

/// Numeric id of a response, accepting numbers and numeric strings.
pub fn numeric_id(id: &Value) -> Option<u64> {
    match id {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Caller-facing key for a request id: `7` and `"7"` both become `"7"`.
pub fn id_key(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ============================================================================
// Outbound
// ============================================================================

/// A call we send: `{method, id, params}`.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundCall<'a> {
    pub method: &'a str,
    pub id: u64,
    pub params: &'a Value,
}

/// A notification we send: `{method}` or `{method, params}`.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundNotification<'a> {
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<&'a Value>,
}

/// Our answer to a peer-initiated call: `{id, result}` or `{id, error}`.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundResponse {
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<OutboundError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutboundError {
    pub code: i64,
    pub message: String,
}

/// JSON-RPC "method not found".
pub const METHOD_NOT_FOUND: i64 = -32601;

impl OutboundResponse {
    pub fn result(id: Value, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(OutboundError {
                code,
                message: message.into(),
            }),
        }
    }
}

/// Static metadata sent with `initialize`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub title: String,
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: "conduit".to_string(),
            title: "Conduit Agent Bridge".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams<'a> {
    pub client_info: &'a ClientInfo,
}

/// Result of `thread/start`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadStartResult {
    #[serde(default)]
    pub thread: Option<IdOnly>,
    #[serde(default)]
    pub thread_id: Option<String>,
}

impl ThreadStartResult {
    pub fn thread_id(self) -> Option<String> {
        self.thread
            .and_then(|t| t.id)
            .or(self.thread_id)
            .filter(|id| !id.is_empty())
    }
}

/// Result of `turn/start`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnStartResult {
    #[serde(default)]
    pub turn: Option<IdOnly>,
    #[serde(default)]
    pub turn_id: Option<String>,
}

impl TurnStartResult {
    pub fn turn_id(self) -> Option<String> {
        self.turn
            .and_then(|t| t.id)
            .or(self.turn_id)
            .filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdOnly {
    #[serde(default)]
    pub id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    mod inbound {
        use super::*;

        #[test]
        fn notification_has_method_only() {
            let msg: JsonRpcMessage =
                serde_json::from_str(r#"{"method":"turn/started","params":{"threadId":"t"}}"#)
                    .unwrap();
            assert!(matches!(msg, JsonRpcMessage::Notification(n) if n.method == "turn/started"));
        }

        #[test]
        fn request_with_id_and_method_is_not_a_response() {
            let msg: JsonRpcMessage = serde_json::from_str(
                r#"{"method":"item/commandExecution/requestApproval","id":7,"params":{}}"#,
            )
            .unwrap();
            assert!(matches!(msg, JsonRpcMessage::ServerRequest(r) if r.id == json!(7)));
        }

        #[test]
        fn response_with_error_without_message_still_parses() {
            let msg: JsonRpcMessage =
                serde_json::from_str(r#"{"id":3,"error":{"code":-32000}}"#).unwrap();
            match msg {
                JsonRpcMessage::Response(resp) => {
                    let err = resp.error.unwrap();
                    assert_eq!(err.code, Some(-32000));
                    assert!(err.message.is_none());
                }
                other => panic!("expected response, got {:?}", other),
            }
        }

        #[test]
        fn non_object_lines_do_not_parse() {
            assert!(serde_json::from_str::<JsonRpcMessage>("42").is_err());
            assert!(serde_json::from_str::<JsonRpcMessage>(r#"{"foo":1}"#).is_err());
        }
    }

    mod ids {
        use super::*;

        #[test]
        fn numeric_id_accepts_numbers_and_numeric_strings() {
            assert_eq!(numeric_id(&json!(4)), Some(4));
            assert_eq!(numeric_id(&json!("12")), Some(12));
            assert_eq!(numeric_id(&json!("abc")), None);
            assert_eq!(numeric_id(&Value::Null), None);
        }

        #[test]
        fn id_key_strips_string_quotes() {
            assert_eq!(id_key(&json!(7)), "7");
            assert_eq!(id_key(&json!("req-1")), "req-1");
        }
    }

    mod outbound {
        use super::*;

        #[test]
        fn call_shape() {
            let params = json!({"threadId": "t1"});
            let call = OutboundCall {
                method: "turn/start",
                id: 3,
                params: &params,
            };
            assert_eq!(
                serde_json::to_value(&call).unwrap(),
                json!({"method": "turn/start", "id": 3, "params": {"threadId": "t1"}})
            );
        }

        #[test]
        fn notification_without_params_omits_field() {
            let note = OutboundNotification {
                method: "initialized",
                params: None,
            };
            assert_eq!(serde_json::to_string(&note).unwrap(), r#"{"method":"initialized"}"#);
        }

        #[test]
        fn response_shapes() {
            let ok = OutboundResponse::result(json!(7), json!({"decision": "accept"}));
            assert_eq!(
                serde_json::to_value(&ok).unwrap(),
                json!({"id": 7, "result": {"decision": "accept"}})
            );

            let err = OutboundResponse::error(json!(8), METHOD_NOT_FOUND, "nope");
            assert_eq!(
                serde_json::to_value(&err).unwrap(),
                json!({"id": 8, "error": {"code": -32601, "message": "nope"}})
            );
        }

        #[test]
        fn initialize_params_shape() {
            let info = ClientInfo::default();
            let value = serde_json::to_value(InitializeParams { client_info: &info }).unwrap();
            assert_eq!(value["clientInfo"]["name"], "conduit");
            assert!(value["clientInfo"]["version"].is_string());
        }
    }

    mod results {
        use super::*;

        #[test]
        fn thread_id_prefers_nested_thread() {
            let result: ThreadStartResult =
                serde_json::from_value(json!({"thread": {"id": "thr_1"}, "threadId": "other"}))
                    .unwrap();
            assert_eq!(result.thread_id().as_deref(), Some("thr_1"));
        }

        #[test]
        fn empty_thread_id_counts_as_missing() {
            let result: ThreadStartResult =
                serde_json::from_value(json!({"thread": {"id": ""}})).unwrap();
            assert!(result.thread_id().is_none());
        }

        #[test]
        fn turn_id_falls_back_to_flat_field() {
            let result: TurnStartResult =
                serde_json::from_value(json!({"turnId": "turn_9"})).unwrap();
            assert_eq!(result.turn_id().as_deref(), Some("turn_9"));
        }
    }
}
