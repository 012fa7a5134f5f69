use std::sync::Arc;

use braid_core::types::{ConnId, UserId};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use tracing::{debug, instrument};

use crate::room::RoomRegistry;
use crate::session::{SessionHandle, SessionMessage};

/// Maintains the live set of sessions indexed by user (spec §4.1). A user
/// may hold several concurrent sessions (multiple tabs/devices).
///
/// Grounded on the room/connection registry split in
/// `snow-rt::ws::rooms::RoomRegistry` (reverse index for O(rooms-per-conn)
/// cleanup) adapted to a user-index instead of a room-index, since rooms
/// live in the sibling `RoomRegistry` here.
#[derive(Default)]
pub struct ConnectionRegistry {
    sessions: DashMap<ConnId, Arc<SessionHandle>>,
    by_user: DashMap<UserId, Mutex<HashSet<ConnId>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[instrument(skip(self, sender))]
    pub fn register(
        &self,
        conn_id: ConnId,
        user_id: UserId,
        sender: tokio::sync::mpsc::UnboundedSender<SessionMessage>,
    ) -> Arc<SessionHandle> {
        let handle = Arc::new(SessionHandle::new(user_id.clone(), sender));
        self.sessions.insert(conn_id.clone(), handle.clone());
        self.by_user
            .entry(user_id)
            .or_default()
            .lock()
            .insert(conn_id);
        handle
    }

    pub fn get(&self, conn_id: &ConnId) -> Option<Arc<SessionHandle>> {
        self.sessions.get(conn_id).map(|s| s.clone())
    }

    pub fn sessions_for_user(&self, user_id: &UserId) -> Vec<ConnId> {
        self.by_user
            .get(user_id)
            .map(|set| set.lock().iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Live session count, surfaced by the gateway's `/health` endpoint.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Removes the session from the user index AND every room it was in,
    /// without the session needing to track its own rooms (spec §4.1).
    #[instrument(skip(self, rooms))]
    pub fn unregister(&self, conn_id: &ConnId, rooms: &RoomRegistry) {
        if let Some((_, handle)) = self.sessions.remove(conn_id) {
            if let Some(set) = self.by_user.get(&handle.user_id) {
                set.lock().remove(conn_id);
            }
        }
        rooms.leave_all(conn_id, self);
        debug!(%conn_id, "session unregistered");
    }

    /// Periodic liveness sweep: sessions still marked suspect from the
    /// previous sweep are terminated; everyone else is marked suspect and
    /// sent a probe. A session that answers the probe (via `mark_alive`,
    /// triggered by the connection task on receiving a transport pong)
    /// survives the next sweep.
    pub fn heartbeat(&self, rooms: &RoomRegistry) {
        let dead: Vec<ConnId> = self
            .sessions
            .iter()
            .filter(|e| !e.value().is_alive())
            .map(|e| e.key().clone())
            .collect();

        for conn_id in &dead {
            if let Some(handle) = self.get(conn_id) {
                handle.send(SessionMessage::Close);
            }
            self.unregister(conn_id, rooms);
        }

        for entry in self.sessions.iter() {
            entry.value().mark_suspect();
            entry.value().send(SessionMessage::Probe);
        }
    }
}
