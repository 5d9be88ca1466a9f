//! Correlation of outbound calls with their responses.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::codex::types::{numeric_id, JsonRpcResponse};
use crate::error::BridgeError;

pub(crate) type CallResult = Result<Value, BridgeError>;

struct PendingCall {
    method: String,
    reply: oneshot::Sender<CallResult>,
}

/// Pending calls keyed by request id. Ids start at 1 and never repeat.
pub(crate) struct CallTable {
    next_id: u64,
    pending: HashMap<u64, PendingCall>,
}

impl Default for CallTable {
    fn default() -> Self {
        Self {
            next_id: 1,
            pending: HashMap::new(),
        }
    }
}

impl CallTable {
    /// Reserve an id that no pending call will use.
    pub fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn register(&mut self, method: &str) -> (u64, oneshot::Receiver<CallResult>) {
        let id = self.next_id();
        let (reply, rx) = oneshot::channel();
        self.pending.insert(
            id,
            PendingCall {
                method: method.to_string(),
                reply,
            },
        );
        (id, rx)
    }

    pub fn remove(&mut self, id: u64) -> bool {
        self.pending.remove(&id).is_some()
    }

    /// Settle the call `response` answers. Returns false for unknown ids.
    pub fn complete(&mut self, response: JsonRpcResponse) -> bool {
        let Some(call) = numeric_id(&response.id).and_then(|id| self.pending.remove(&id)) else {
            log::debug!("Ignoring response for unknown id {}", response.id);
            return false;
        };

        let result = match response.error {
            Some(error) => {
                let message = error
                    .message
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| format!("RPC error: {}", call.method));
                Err(BridgeError::Rpc {
                    method: call.method,
                    message,
                })
            }
            None => Ok(response.result.unwrap_or(Value::Null)),
        };

        // The caller may have stopped waiting.
        let _ = call.reply.send(result);
        true
    }

    /// Reject every pending call with `error`. Returns how many there were.
    pub fn fail_all(&mut self, error: &BridgeError) -> usize {
        let count = self.pending.len();
        for (_, call) in self.pending.drain() {
            let _ = call.reply.send(Err(error.clone()));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }
}
