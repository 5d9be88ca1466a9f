//! The bridge: one peer process, one handshake, any number of threads.
//!
//! Inbound traffic is consumed by a single dispatcher task, one line at a time
//! and strictly in arrival order. All per-bridge maps live in one mutex that
//! is never held across an `.await` or while listeners run: events are
//! collected under the lock and emitted after it is released.
//!
//! ```text
//! caller ──create_thread/send_message──▶ call() ──line──▶ peer stdin
//!                                          ▲
//!                          CallTable ◀── response
//! peer stdout ──▶ dispatcher ──notification──▶ Normalizer ──▶ EventBus ──▶ listeners
//!                     └──approval request──▶ ApprovalBook ──▶ respond_approval()
//! ```

mod handshake;
mod rpc;

pub use handshake::HandshakeState;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

use crate::codex::approval::{
    is_approval_method, ApprovalBook, ApprovalOptions, ApprovalRecord, ApprovalTicket,
    PeerDecision, APPROVAL_RESPOND_METHOD,
};
use crate::codex::ids;
use crate::codex::normalizer::{Normalizer, ThreadContext};
use crate::codex::types::{
    id_key, numeric_id, InitializeParams, JsonRpcMessage, JsonRpcNotification, JsonRpcResponse,
    JsonRpcServerRequest, OutboundCall, OutboundNotification, OutboundResponse, ThreadStartResult,
    TurnStartResult, METHOD_NOT_FOUND,
};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::event::{DomainEvent, EventPayload, UNKNOWN_SESSION};
use crate::event_bus::{EventBus, Subscription};
use crate::logging::{close_log, log_line, open_log_file, LogHandle, STDERR, STDIN, STDOUT};
use crate::spawn::{AgentProcess, PeerHandle, ProcessEvent};

use handshake::Handshake;
use rpc::CallTable;

/// Outcome of a best-effort operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledged {
    /// Accepted and sent (or queued). The peer has not confirmed anything.
    Locally,
    /// Nothing was pending under that id; no message was sent.
    Ignored,
}

#[derive(Default)]
struct BridgeState {
    calls: CallTable,
    normalizer: Normalizer,
    approvals: ApprovalBook,
    /// Set once the peer is gone or the bridge was shut down.
    terminal: Option<BridgeError>,
}

struct Shared {
    peer: Box<dyn PeerHandle>,
    log: LogHandle,
    config: BridgeConfig,
    handshake: Handshake,
    state: Mutex<BridgeState>,
    events: Arc<EventBus>,
    closed: AtomicBool,
    runtime: Handle,
}

/// Handle to a running bridge. Cheap to clone; all clones share one peer.
#[derive(Clone)]
pub struct Bridge {
    shared: Arc<Shared>,
}

impl Bridge {
    /// Spawn `codex app-server` and start the handshake.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(config: BridgeConfig) -> Result<Self> {
        let spawn_config = config.codex.build();
        log::info!(
            "Spawning {} {}",
            spawn_config.binary_path,
            spawn_config.args.join(" ")
        );
        let (process, events) = AgentProcess::spawn(spawn_config)?;
        Ok(Self::from_peer(Box::new(process), events, config))
    }

    /// Run a bridge over an already-connected peer.
    ///
    /// Sends `initialize` immediately and starts the dispatcher. Must be called
    /// from within a tokio runtime.
    pub fn from_peer(
        peer: Box<dyn PeerHandle>,
        events: UnboundedReceiver<ProcessEvent>,
        config: BridgeConfig,
    ) -> Self {
        let log_id = config
            .log_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let log = open_log_file(config.log_dir.as_deref(), &log_id);

        let shared = Arc::new(Shared {
            peer,
            log,
            config,
            handshake: Handshake::new(),
            state: Mutex::new(BridgeState::default()),
            events: EventBus::new(),
            closed: AtomicBool::new(false),
            runtime: Handle::current(),
        });

        shared.start_handshake();
        tokio::spawn(dispatch(Arc::clone(&shared), events));

        Self { shared }
    }

    // ------------------------------------------------------------------
    // Readiness
    // ------------------------------------------------------------------

    /// Wait for the handshake. Every caller sees the same outcome.
    pub async fn wait_ready(&self) -> Result<()> {
        self.shared.handshake.wait().await
    }

    pub fn is_ready(&self) -> bool {
        self.shared.handshake.is_ready() && self.shared.lock().terminal.is_none()
    }

    pub fn handshake_state(&self) -> HandshakeState {
        self.shared.handshake.state()
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    /// Issue a raw RPC call once the handshake has completed.
    ///
    /// Resolves with the response `result` (`null` when absent).
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.shared.ensure_usable()?;
        self.shared.handshake.wait().await?;

        let (id, reply) = {
            let mut state = self.shared.lock();
            if let Some(error) = &state.terminal {
                return Err(error.clone());
            }
            state.calls.register(method)
        };

        let request = OutboundCall {
            method,
            id,
            params: &params,
        };
        if let Err(err) = self.shared.send(&request) {
            self.shared.lock().calls.remove(id);
            return Err(err);
        }

        reply.await.unwrap_or(Err(BridgeError::Closed))
    }

    /// Start a thread rooted at `context.working_directory`.
    ///
    /// Emits `thread.started` (once per thread) and returns the thread id.
    pub async fn create_thread(&self, context: ThreadContext) -> Result<String> {
        let config = &self.shared.config;
        let mut params = json!({
            "cwd": context.working_directory.to_string_lossy(),
            "approvalPolicy": config.approval_policy,
            "sandbox": config.sandbox,
        });
        if let Some(model) = config.model_name() {
            params["model"] = json!(model);
        }

        let result = self.call("thread/start", params).await?;
        let thread_id = serde_json::from_value::<ThreadStartResult>(result)
            .ok()
            .and_then(ThreadStartResult::thread_id)
            .ok_or_else(|| BridgeError::MissingField {
                method: "thread/start".to_string(),
                field: "thread.id",
            })?;

        log::info!(
            "Started thread {} for session {}",
            thread_id,
            context.session_id
        );
        let started = self
            .shared
            .lock()
            .normalizer
            .register_thread(&thread_id, context, Utc::now());
        if let Some(event) = started {
            self.shared.emit(&event);
        }
        Ok(thread_id)
    }

    /// Start a turn with `text` and optional local file attachments.
    ///
    /// Returns the turn id.
    pub async fn send_message(
        &self,
        thread_id: &str,
        text: &str,
        attachments: &[PathBuf],
    ) -> Result<String> {
        let mut input = vec![json!({"type": "text", "text": text})];
        input.extend(
            attachments
                .iter()
                .map(|path| json!({"type": "localFile", "path": path.to_string_lossy()})),
        );

        let result = self
            .call(
                "turn/start",
                json!({"threadId": thread_id, "input": input}),
            )
            .await?;
        let turn_id = serde_json::from_value::<TurnStartResult>(result)
            .ok()
            .and_then(TurnStartResult::turn_id)
            .ok_or_else(|| BridgeError::MissingField {
                method: "turn/start".to_string(),
                field: "turn.id",
            })?;

        self.shared.lock().normalizer.record_turn(&turn_id, thread_id);
        Ok(turn_id)
    }

    /// Ask the peer to interrupt a turn.
    ///
    /// `id` may be a turn id or a thread id. Failures are logged, never
    /// returned.
    pub fn cancel(&self, id: &str) -> Acknowledged {
        let params = match self.shared.lock().normalizer.thread_for_turn(id) {
            Some(thread_id) => json!({"threadId": thread_id, "turnId": id}),
            None => json!({"threadId": id}),
        };

        let bridge = self.clone();
        let id = id.to_string();
        self.shared.runtime.spawn(async move {
            if let Err(err) = bridge.call("turn/interrupt", params).await {
                log::warn!("Failed to interrupt {}: {}", id, err);
            }
        });
        Acknowledged::Locally
    }

    /// Answer a pending approval. Only the first answer for an id is sent.
    ///
    /// Decisions starting with `approve` accept; anything else declines.
    pub fn respond_approval(
        &self,
        id: &str,
        decision: &str,
        options: ApprovalOptions,
    ) -> Acknowledged {
        let pending = self.shared.lock().approvals.take(id);
        let Some(pending) = pending else {
            log::debug!("No pending approval {}", id);
            return Acknowledged::Ignored;
        };

        let decision = PeerDecision::from_caller(decision);
        log::info!("Approval {} answered with {:?}", id, decision);

        match pending.ticket {
            ApprovalTicket::Request { request_id } => {
                let reply = OutboundResponse::result(request_id, json!({ "decision": decision }));
                if let Err(err) = self.shared.send(&reply) {
                    log::warn!("Failed to answer approval {}: {}", id, err);
                }
            }
            ApprovalTicket::Notification { approval_id } => {
                let mut params = json!({ "approvalId": approval_id, "decision": decision });
                if options.remember {
                    params["remember"] = json!(true);
                }
                let bridge = self.clone();
                self.shared.runtime.spawn(async move {
                    if let Err(err) = bridge.call(APPROVAL_RESPOND_METHOD, params).await {
                        log::warn!("Failed to deliver approval {}: {}", approval_id, err);
                    }
                });
            }
        }
        Acknowledged::Locally
    }

    /// Approvals still waiting for an answer, oldest first.
    pub fn pending_approvals(&self) -> Vec<ApprovalRecord> {
        self.shared.lock().approvals.records()
    }

    /// Close the log and stop the peer. Safe to call more than once.
    ///
    /// Pending calls are rejected with [`BridgeError::Closed`]. No error event
    /// is emitted for the resulting process exit.
    pub fn shutdown(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        log::info!("Shutting down bridge");

        {
            let mut state = self.shared.lock();
            state.terminal.get_or_insert(BridgeError::Closed);
            state.approvals.clear();
            state.calls.fail_all(&BridgeError::Closed);
        }
        self.shared.handshake.fail(BridgeError::Closed);
        self.shared.peer.terminate();
        close_log(&self.shared.log);
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Register a listener for every domain event. Listeners run in
    /// registration order on the dispatcher; a panic in one is logged and
    /// does not affect the others.
    pub fn on_event<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&DomainEvent) + Send + Sync + 'static,
    {
        self.shared.events.subscribe(handler)
    }

    /// Receive events through a channel instead of a callback.
    pub fn subscribe_channel(&self) -> broadcast::Receiver<DomainEvent> {
        self.shared.events.channel()
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, BridgeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BridgeError::Closed);
        }
        match &self.lock().terminal {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn send<T: Serialize>(&self, message: &T) -> Result<()> {
        let line =
            serde_json::to_string(message).map_err(|e| BridgeError::Transport(e.to_string()))?;
        log_line(&self.log, STDIN, &line);
        self.peer.write_line(&line)
    }

    fn emit(&self, event: &DomainEvent) {
        log::trace!("Emitting {} for {}", event.type_name(), event.session_id);
        self.events.emit(event);
    }

    fn start_handshake(&self) {
        let id = self.lock().calls.next_id();
        self.handshake.begin(id);

        let params = match serde_json::to_value(InitializeParams {
            client_info: &self.config.client_info,
        }) {
            Ok(params) => params,
            Err(err) => {
                self.handshake.fail(BridgeError::Handshake(err.to_string()));
                return;
            }
        };
        let request = OutboundCall {
            method: "initialize",
            id,
            params: &params,
        };
        if let Err(err) = self.send(&request) {
            log::error!("Failed to send initialize: {}", err);
            self.handshake.fail(BridgeError::Handshake(err.to_string()));
        }
    }

    fn finish_handshake(&self, response: JsonRpcResponse) {
        if let Some(error) = response.error {
            let message = error
                .message
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| "initialize was rejected".to_string());
            log::error!("Codex rejected initialize: {}", message);
            self.handshake.fail(BridgeError::Handshake(message));
            return;
        }

        let initialized = OutboundNotification {
            method: "initialized",
            params: None,
        };
        match self.send(&initialized) {
            Ok(()) => {
                self.handshake.mark_ready();
                log::info!("Codex handshake complete");
            }
            Err(err) => {
                self.handshake.fail(BridgeError::Handshake(err.to_string()));
            }
        }
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    fn handle_line(&self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        let message: JsonRpcMessage = match serde_json::from_str(line) {
            Ok(message) => message,
            Err(err) => {
                log::debug!("Ignoring unparseable line ({}): {}", err, line);
                return;
            }
        };

        match message {
            JsonRpcMessage::ServerRequest(request) => self.handle_server_request(request),
            JsonRpcMessage::Response(response) => self.handle_response(response),
            JsonRpcMessage::Notification(notification) => self.handle_notification(notification),
        }
    }

    fn handle_response(&self, response: JsonRpcResponse) {
        if numeric_id(&response.id).is_some_and(|id| self.handshake.is_awaiting(id)) {
            self.finish_handshake(response);
            return;
        }
        self.lock().calls.complete(response);
    }

    fn handle_server_request(&self, request: JsonRpcServerRequest) {
        if is_approval_method(&request.method) {
            let params = request.params.unwrap_or(Value::Null);
            let ticket = ApprovalTicket::Request {
                request_id: request.id.clone(),
            };
            self.surface_approval(id_key(&request.id), &request.method, &params, ticket);
            return;
        }

        log::warn!("Rejecting unsupported peer request {}", request.method);
        let reply = OutboundResponse::error(
            request.id,
            METHOD_NOT_FOUND,
            format!("Method not supported: {}", request.method),
        );
        if let Err(err) = self.send(&reply) {
            log::warn!("Failed to reject {}: {}", request.method, err);
        }
    }

    fn handle_notification(&self, notification: JsonRpcNotification) {
        let params = notification.params.unwrap_or(Value::Null);

        if is_approval_method(&notification.method) {
            let approval_id =
                ids::approval_id(&params).unwrap_or_else(|| Uuid::new_v4().to_string());
            let ticket = ApprovalTicket::Notification {
                approval_id: approval_id.clone(),
            };
            self.surface_approval(approval_id, &notification.method, &params, ticket);
            return;
        }

        let event = self
            .lock()
            .normalizer
            .notification(&notification.method, &params, Utc::now());
        if let Some(event) = event {
            self.emit(&event);
        }
    }

    /// Record the ticket before emitting, so a listener may answer at once.
    fn surface_approval(&self, id: String, method: &str, params: &Value, ticket: ApprovalTicket) {
        let now = Utc::now();
        let record = ApprovalRecord::from_peer(id, method, params, now);
        let event = {
            let mut state = self.lock();
            let event = state.normalizer.approval_event(record.clone(), now);
            if state.approvals.insert(ticket.clone(), record) {
                Some(event)
            } else {
                None
            }
        };
        match (event, ticket) {
            (Some(event), _) => self.emit(&event),
            (None, ApprovalTicket::Request { request_id }) => {
                log::warn!(
                    "Approval {} is already pending; declining {}",
                    id_key(&request_id),
                    method
                );
                let reply = OutboundResponse::result(
                    request_id,
                    json!({ "decision": PeerDecision::Decline }),
                );
                if let Err(err) = self.send(&reply) {
                    log::warn!("Failed to decline duplicate approval: {}", err);
                }
            }
            (None, ApprovalTicket::Notification { approval_id }) => {
                log::warn!("Approval {} is already pending; ignoring {}", approval_id, method);
            }
        }
    }

    /// The peer is gone: fail the handshake, emit one recoverable error event,
    /// then reject every pending call.
    fn handle_exit(&self, reason: String) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let error = BridgeError::ProcessExited(reason.clone());
        {
            let mut state = self.lock();
            if state.terminal.is_some() {
                return;
            }
            state.terminal = Some(error.clone());
            state.approvals.clear();
        }
        log::warn!("Codex process lost: {}", reason);

        self.handshake.fail(error.clone());
        self.emit(&DomainEvent::new(
            UNKNOWN_SESSION,
            Utc::now(),
            EventPayload::Error {
                message: reason,
                recoverable: true,
                thread_id: None,
                turn_id: None,
            },
        ));

        let rejected = self.lock().calls.fail_all(&error);
        if rejected > 0 {
            log::debug!("Rejected {} pending call(s)", rejected);
        }
        close_log(&self.log);
    }
}

async fn dispatch(shared: Arc<Shared>, mut events: UnboundedReceiver<ProcessEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ProcessEvent::Stdout(line) => {
                log_line(&shared.log, STDOUT, &line);
                log::debug!("codex stdout: {}", line);
                shared.handle_line(&line);
            }
            ProcessEvent::Stderr(line) => {
                log_line(&shared.log, STDERR, &line);
                log::warn!("codex stderr: {}", line);
            }
            ProcessEvent::Exit(exit) => {
                shared.handle_exit(exit.to_string());
                return;
            }
        }
    }
    shared.handle_exit("agent process output closed".to_string());
}
