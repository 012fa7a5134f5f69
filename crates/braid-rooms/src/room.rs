use std::collections::HashMap;

use braid_core::types::{ConnId, ConversationId, MessageId, UserId};
use braid_protocol::{ActiveAiRequest, OutboundEvent, RoomUser};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::connection::ConnectionRegistry;
use crate::session::SessionMessage;

struct ActiveAiRequestSlot {
    user_id: UserId,
    message_id: MessageId,
    started_at: DateTime<Utc>,
}

#[derive(Default)]
struct RoomState {
    /// conn -> joinedAt.
    members: HashMap<ConnId, DateTime<Utc>>,
    active_request: Option<ActiveAiRequestSlot>,
}

/// Per-conversation membership, presence, and the single-flight AI slot
/// (spec §4.2). Grounded on `snow-rt::ws::rooms::RoomRegistry`'s
/// room-name-keyed concurrent map, generalized from a bare member set to
/// the richer per-room state the spec needs (joinedAt, AI slot).
///
/// Concurrency: each room's state sits behind its own lock (spec §5's
/// "room-level lock guards membership, AI slot, and broadcast roster;
/// held briefly"); `Broadcast` sends while holding it since
/// `mpsc::UnboundedSender::send` never suspends.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: DashMap<ConversationId, Mutex<RoomState>>,
    /// conn -> rooms joined, reverse index for `leave_all` (spec §4.1's
    /// "without requiring the session to know its rooms").
    conn_rooms: DashMap<ConnId, Mutex<std::collections::HashSet<ConversationId>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent for the same session; broadcasts `user_joined` to
    /// pre-existing members.
    pub fn join(
        &self,
        conversation_id: &ConversationId,
        conn_id: &ConnId,
        connections: &ConnectionRegistry,
    ) {
        let room = self
            .rooms
            .entry(conversation_id.clone())
            .or_default();
        let mut state = room.lock();
        if state.members.contains_key(conn_id) {
            return;
        }

        let user_id = connections.get(conn_id).map(|h| h.user_id.clone());
        for (other, _) in state.members.iter() {
            if let Some(handle) = connections.get(other) {
                if let Some(uid) = &user_id {
                    handle.send(SessionMessage::Event(OutboundEvent::UserJoined {
                        conversation_id: conversation_id.clone(),
                        user_id: uid.clone(),
                    }));
                }
            }
        }

        state.members.insert(conn_id.clone(), Utc::now());
        drop(state);

        self.conn_rooms
            .entry(conn_id.clone())
            .or_default()
            .lock()
            .insert(conversation_id.clone());
    }

    /// Broadcasts `user_left`; the room is reclaimed when its last session
    /// leaves.
    pub fn leave(
        &self,
        conversation_id: &ConversationId,
        conn_id: &ConnId,
        connections: &ConnectionRegistry,
    ) {
        let Some(room) = self.rooms.get(conversation_id) else {
            return;
        };
        let mut state = room.lock();
        if state.members.remove(conn_id).is_none() {
            return;
        }
        let user_id = connections.get(conn_id).map(|h| h.user_id.clone());
        let empty = state.members.is_empty();
        for (other, _) in state.members.iter() {
            if let Some(handle) = connections.get(other) {
                if let Some(uid) = &user_id {
                    handle.send(SessionMessage::Event(OutboundEvent::UserLeft {
                        conversation_id: conversation_id.clone(),
                        user_id: uid.clone(),
                    }));
                }
            }
        }
        drop(state);
        if empty {
            self.rooms.remove(conversation_id);
        }

        if let Some(set) = self.conn_rooms.get(conn_id) {
            set.lock().remove(conversation_id);
        }
    }

    /// Removes `conn_id` from every room it had joined — used by
    /// `ConnectionRegistry::unregister`.
    pub fn leave_all(&self, conn_id: &ConnId, connections: &ConnectionRegistry) {
        let Some((_, rooms)) = self.conn_rooms.remove(conn_id) else {
            return;
        };
        for conversation_id in rooms.into_inner() {
            self.leave(&conversation_id, conn_id, connections);
        }
    }

    /// Deduplicated by user id; a user with multiple sessions is reported
    /// with their earliest `joinedAt`.
    pub fn active_users(
        &self,
        conversation_id: &ConversationId,
        connections: &ConnectionRegistry,
    ) -> Vec<RoomUser> {
        let Some(room) = self.rooms.get(conversation_id) else {
            return Vec::new();
        };
        let state = room.lock();
        let mut by_user: HashMap<UserId, DateTime<Utc>> = HashMap::new();
        for (conn_id, joined_at) in state.members.iter() {
            let Some(handle) = connections.get(conn_id) else {
                continue;
            };
            by_user
                .entry(handle.user_id.clone())
                .and_modify(|existing| {
                    if joined_at < existing {
                        *existing = *joined_at;
                    }
                })
                .or_insert(*joined_at);
        }
        by_user
            .into_iter()
            .map(|(user_id, joined_at)| RoomUser { user_id, joined_at })
            .collect()
    }

    /// Atomic test-and-set; `true` iff no request was already active.
    /// Creates the room implicitly if it doesn't exist yet.
    pub fn start_ai_request(
        &self,
        conversation_id: &ConversationId,
        user_id: &UserId,
        message_id: &MessageId,
    ) -> bool {
        let room = self
            .rooms
            .entry(conversation_id.clone())
            .or_default();
        let mut state = room.lock();
        if state.active_request.is_some() {
            return false;
        }
        state.active_request = Some(ActiveAiRequestSlot {
            user_id: user_id.clone(),
            message_id: message_id.clone(),
            started_at: Utc::now(),
        });
        true
    }

    pub fn active_request(&self, conversation_id: &ConversationId) -> Option<ActiveAiRequest> {
        let room = self.rooms.get(conversation_id)?;
        let state = room.lock();
        state.active_request.as_ref().map(|slot| ActiveAiRequest {
            user_id: slot.user_id.clone(),
            message_id: slot.message_id.clone(),
            started_at: slot.started_at,
        })
    }

    /// Clears the slot and broadcasts `ai_finished`. A no-op on an already
    /// empty slot.
    pub fn end_ai_request(&self, conversation_id: &ConversationId, connections: &ConnectionRegistry) {
        let Some(room) = self.rooms.get(conversation_id) else {
            return;
        };
        let mut state = room.lock();
        if state.active_request.take().is_none() {
            return;
        }
        for conn_id in state.members.keys() {
            if let Some(handle) = connections.get(conn_id) {
                handle.send(SessionMessage::Event(OutboundEvent::AiFinished {
                    conversation_id: conversation_id.clone(),
                }));
            }
        }
    }

    /// Sends `event` to every open session in the room except `exclude`;
    /// send errors are swallowed (dead channels are reaped by
    /// `ConnectionRegistry::heartbeat`, not here).
    pub fn broadcast(
        &self,
        conversation_id: &ConversationId,
        event: OutboundEvent,
        exclude: Option<&ConnId>,
        connections: &ConnectionRegistry,
    ) {
        let Some(room) = self.rooms.get(conversation_id) else {
            return;
        };
        let state = room.lock();
        for conn_id in state.members.keys() {
            if exclude.map(|ex| ex == conn_id).unwrap_or(false) {
                continue;
            }
            if let Some(handle) = connections.get(conn_id) {
                handle.send(SessionMessage::Event(event.clone()));
            }
        }
    }
}
