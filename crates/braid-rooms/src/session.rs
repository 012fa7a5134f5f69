use braid_protocol::OutboundEvent;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

/// What the registry layer can hand a session's connection task, without
/// needing to know whether that task speaks axum's WS, a test harness, or
/// anything else.
#[derive(Debug, Clone)]
pub enum SessionMessage {
    /// A JSON event frame to forward to the client.
    Event(OutboundEvent),
    /// `Heartbeat`'s liveness probe — the connection task should send a
    /// transport-level ping (spec §4.1).
    Probe,
    /// The registry has decided this session should close.
    Close,
}

/// A live session's handle, as seen by `ConnectionRegistry`/`RoomRegistry`.
/// The connection task owns the receiving half of `sender`'s channel.
pub struct SessionHandle {
    pub user_id: braid_core::types::UserId,
    pub sender: mpsc::UnboundedSender<SessionMessage>,
    is_alive: AtomicBool,
}

impl SessionHandle {
    pub fn new(user_id: braid_core::types::UserId, sender: mpsc::UnboundedSender<SessionMessage>) -> Self {
        Self {
            user_id,
            sender,
            is_alive: AtomicBool::new(true),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.is_alive.load(Ordering::Acquire)
    }

    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Release);
    }

    pub fn mark_suspect(&self) {
        self.is_alive.store(false, Ordering::Release);
    }

    /// Best-effort send — I/O errors on a dead channel are swallowed
    /// (spec §4.1 failure model).
    pub fn send(&self, msg: SessionMessage) {
        let _ = self.sender.send(msg);
    }
}
