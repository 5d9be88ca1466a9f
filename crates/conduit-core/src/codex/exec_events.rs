//! The `codex/event/*` family.
//!
//! These are the older, lower-level notifications: command execution is
//! reported as begin / output / end keyed by a call id, and message text as
//! bare deltas. They are folded into the same item events the structured
//! methods produce.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::chunk::decode_output_chunk;
use super::ids;
use super::normalizer::{Address, ExecContext, Normalizer};
use crate::event::{DeltaKind, DomainEvent, EventPayload};

impl Normalizer {
    pub(super) fn low_level(
        &mut self,
        name: &str,
        params: &Value,
        now: DateTime<Utc>,
    ) -> Option<DomainEvent> {
        let msg = params.get("msg").unwrap_or(params);
        match name {
            "exec_command_begin" => self.exec_begin(params, msg, now),
            "exec_command_output_delta" => self.exec_output(params, msg, now),
            "exec_command_end" => self.exec_end(params, msg, now),
            "agent_message_delta" | "agent_message_content_delta" => {
                let delta = ids::str_at(msg, &["delta"])?.to_string();
                let address = self.address(params)?;
                let item_id = ids::item_id(params);
                Some(self.text_delta(address, item_id, DeltaKind::Message, delta, None, now))
            }
            _ => {
                log::trace!("Ignoring low-level event {}", name);
                None
            }
        }
    }

    fn exec_begin(&mut self, params: &Value, msg: &Value, now: DateTime<Utc>) -> Option<DomainEvent> {
        let call_id = ids::call_id(params)?;
        let address = self.address(params)?;
        let context = ExecContext {
            thread_id: address.thread_id.clone(),
            turn_id: address.turn_id.clone(),
            command: ids::command_text(params),
            cwd: ids::str_at(msg, &["cwd"]).map(str::to_string),
        };

        let item = command_item(&call_id, &context, "inProgress");
        self.exec_contexts.insert(call_id, context);

        Some(DomainEvent::new(
            address.session_id,
            now,
            EventPayload::ItemStarted {
                thread_id: address.thread_id,
                turn_id: address.turn_id,
                item: Value::Object(item),
            },
        ))
    }

    fn exec_output(&mut self, params: &Value, msg: &Value, now: DateTime<Utc>) -> Option<DomainEvent> {
        let call_id = ids::call_id(params)?;
        let address = self.exec_address(&call_id, params)?;
        let chunk = ids::str_at(msg, &["chunk"])?;
        let delta = decode_output_chunk(chunk);
        if delta.is_empty() {
            return None;
        }
        Some(self.text_delta(address, Some(call_id), DeltaKind::CommandOutput, delta, None, now))
    }

    fn exec_end(&mut self, params: &Value, msg: &Value, now: DateTime<Utc>) -> Option<DomainEvent> {
        let call_id = ids::call_id(params)?;
        let context = match self.exec_contexts.remove(&call_id) {
            Some(context) => context,
            None => {
                let address = self.address(params)?;
                ExecContext {
                    thread_id: address.thread_id,
                    turn_id: address.turn_id,
                    command: ids::command_text(params),
                    cwd: ids::str_at(msg, &["cwd"]).map(str::to_string),
                }
            }
        };

        let exit_code = msg
            .get("exit_code")
            .or_else(|| msg.get("exitCode"))
            .and_then(Value::as_i64);
        let status = match exit_code {
            Some(0) | None => "completed",
            Some(_) => "failed",
        };

        let mut item = command_item(&call_id, &context, status);
        if let Some(code) = exit_code {
            item.insert("exitCode".to_string(), Value::from(code));
        }
        let duration = msg
            .get("duration_ms")
            .or_else(|| msg.get("durationMs"))
            .or_else(|| msg.get("duration"));
        match duration.map(|value| (duration_ms(value), value)) {
            Some((Some(ms), _)) => {
                item.insert("durationMs".to_string(), Value::from(ms));
            }
            Some((None, Value::String(text))) => {
                item.insert("duration".to_string(), Value::String(text.clone()));
            }
            _ => {}
        }
        if let Some(output) = ids::str_at(msg, &["aggregated_output"])
            .or_else(|| ids::str_at(msg, &["aggregatedOutput"]))
        {
            item.insert("aggregatedOutput".to_string(), Value::String(output.to_string()));
        }

        let session_id = self.resolve_session(Some(&context.thread_id), Some(&context.turn_id));
        Some(DomainEvent::new(
            session_id,
            now,
            EventPayload::ItemCompleted {
                thread_id: context.thread_id,
                turn_id: context.turn_id,
                item: Value::Object(item),
            },
        ))
    }

    /// Address for a call: the recorded begin context, else the payload.
    fn exec_address(&self, call_id: &str, params: &Value) -> Option<Address> {
        match self.exec_contexts.get(call_id) {
            Some(context) => Some(Address {
                session_id: self.resolve_session(Some(&context.thread_id), Some(&context.turn_id)),
                thread_id: context.thread_id.clone(),
                turn_id: context.turn_id.clone(),
            }),
            None => self.address(params),
        }
    }
}

fn command_item(call_id: &str, context: &ExecContext, status: &str) -> Map<String, Value> {
    let mut item = Map::new();
    item.insert("id".to_string(), Value::String(call_id.to_string()));
    item.insert("type".to_string(), Value::String("commandExecution".to_string()));
    if let Some(command) = &context.command {
        item.insert("command".to_string(), Value::String(command.clone()));
    }
    if let Some(cwd) = &context.cwd {
        item.insert("cwd".to_string(), Value::String(cwd.clone()));
    }
    item.insert("status".to_string(), Value::String(status.to_string()));
    item
}

/// Milliseconds from `{secs, nanos}` or a plain millisecond count.
fn duration_ms(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::Object(fields) => {
            let secs = fields.get("secs")?.as_u64()?;
            let nanos = fields.get("nanos").and_then(Value::as_u64).unwrap_or(0);
            secs.checked_mul(1000)?.checked_add(nanos / 1_000_000)
        }
        _ => None,
    }
}
