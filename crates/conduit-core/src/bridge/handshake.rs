//! The one-time `initialize` → `initialized` exchange.

use tokio::sync::watch;

use crate::error::BridgeError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeState {
    NotStarted,
    AwaitingInitializeResponse { request_id: u64 },
    Ready,
    /// Terminal. The bridge must be discarded.
    Failed(BridgeError),
}

impl HandshakeState {
    fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Failed(_))
    }
}

/// Shared readiness signal. Every waiter observes the same outcome.
pub(crate) struct Handshake {
    state: watch::Sender<HandshakeState>,
}

impl Handshake {
    pub fn new() -> Self {
        let (state, _) = watch::channel(HandshakeState::NotStarted);
        Self { state }
    }

    pub fn state(&self) -> HandshakeState {
        self.state.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        *self.state.borrow() == HandshakeState::Ready
    }

    pub fn begin(&self, request_id: u64) {
        self.state
            .send_replace(HandshakeState::AwaitingInitializeResponse { request_id });
    }

    /// Whether `id` is the outstanding initialize request.
    pub fn is_awaiting(&self, id: u64) -> bool {
        matches!(
            *self.state.borrow(),
            HandshakeState::AwaitingInitializeResponse { request_id } if request_id == id
        )
    }

    pub fn mark_ready(&self) -> bool {
        self.transition(HandshakeState::Ready)
    }

    /// Move to `Failed` unless the handshake already finished.
    pub fn fail(&self, error: BridgeError) -> bool {
        self.transition(HandshakeState::Failed(error))
    }

    fn transition(&self, next: HandshakeState) -> bool {
        self.state.send_if_modified(|state| {
            if state.is_terminal() {
                return false;
            }
            *state = next;
            true
        })
    }

    /// Resolve once the handshake is `Ready`, or fail with its error.
    pub async fn wait(&self) -> Result<(), BridgeError> {
        let mut rx = self.state.subscribe();
        loop {
            let current = rx.borrow_and_update().clone();
            match current {
                HandshakeState::Ready => return Ok(()),
                HandshakeState::Failed(error) => return Err(error),
                _ => {
                    if rx.changed().await.is_err() {
                        return Err(BridgeError::Closed);
                    }
                }
            }
        }
    }
}
