use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Notify, mpsc};
use uuid::Uuid;

/// How many outbound frames may queue per connection before the receiver is
/// considered dead.
pub(crate) const OUTBOUND_BUFFER: usize = 256;

/// Connection lifecycle. Every session walks this top to bottom; failed
/// handshakes skip straight from the failing step to `Closing`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticating,
    Joining,
    Active,
    Closing,
    Closed,
}

/// Shared face of one live connection: the registries hold this, never the
/// socket itself. Frames go out through a bounded channel drained by the
/// session's writer task; `shutdown` tells the session task to wind down
/// from anywhere (broadcast failure, supervisor shutdown).
pub struct SessionHandle {
    pub id: Uuid,
    tx: mpsc::Sender<String>,
    closed: AtomicBool,
    close_signal: Notify,
    state: Mutex<SessionState>,
}

impl SessionHandle {
    pub(crate) fn new(tx: mpsc::Sender<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            tx,
            closed: AtomicBool::new(false),
            close_signal: Notify::new(),
            state: Mutex::new(SessionState::Connecting),
        }
    }

    /// Queue a frame for delivery. Returns `false` when the connection can
    /// no longer take it (channel closed, or full because the peer stopped
    /// draining) — callers treat that as a disconnect.
    pub fn deliver(&self, frame: String) -> bool {
        !self.is_closed() && self.tx.try_send(frame).is_ok()
    }

    /// Signal the session task to close. Idempotent; safe from any task.
    pub fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.close_signal.notify_waiters();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Resolves once `shutdown` has been called, however many times this
    /// races with it.
    pub async fn wait_closed(&self) {
        loop {
            let notified = self.close_signal.notified();
            if self.is_closed() {
                return;
            }
            notified.await;
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }
}
