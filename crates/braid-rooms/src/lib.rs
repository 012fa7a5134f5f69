pub mod connection;
pub mod presence;
pub mod room;
pub mod session;

pub use connection::ConnectionRegistry;
pub use presence::PresenceBroadcaster;
pub use room::RoomRegistry;
pub use session::{SessionHandle, SessionMessage};

#[cfg(test)]
mod tests {
    use super::*;
    use braid_core::types::{ConnId, ConversationId, UserId};
    use tokio::sync::mpsc;

    fn make_session(connections: &ConnectionRegistry, user: &UserId) -> (ConnId, mpsc::UnboundedReceiver<SessionMessage>) {
        let conn_id = ConnId::new();
        let (tx, rx) = mpsc::unbounded_channel();
        connections.register(conn_id.clone(), user.clone(), tx);
        (conn_id, rx)
    }

    #[test]
    fn join_is_idempotent_and_broadcasts_to_existing_members() {
        let connections = ConnectionRegistry::new();
        let rooms = RoomRegistry::new();
        let conv = ConversationId::new();
        let u1 = UserId::new();
        let u2 = UserId::new();
        let (c1, mut rx1) = make_session(&connections, &u1);
        let (c2, _rx2) = make_session(&connections, &u2);

        rooms.join(&conv, &c1, &connections);
        rooms.join(&conv, &c1, &connections); // idempotent
        rooms.join(&conv, &c2, &connections);

        let mut saw_join = false;
        while let Ok(msg) = rx1.try_recv() {
            if matches!(msg, SessionMessage::Event(braid_protocol::OutboundEvent::UserJoined { .. })) {
                saw_join = true;
            }
        }
        assert!(saw_join);

        let users = rooms.active_users(&conv, &connections);
        assert_eq!(users.len(), 2);
    }

    #[test]
    fn start_ai_request_is_single_flight() {
        let connections = ConnectionRegistry::new();
        let rooms = RoomRegistry::new();
        let conv = ConversationId::new();
        let user = UserId::new();
        let msg = braid_core::types::MessageId::new();

        assert!(rooms.start_ai_request(&conv, &user, &msg));
        assert!(!rooms.start_ai_request(&conv, &user, &msg));
        rooms.end_ai_request(&conv, &connections);
        assert!(rooms.start_ai_request(&conv, &user, &msg));
    }

    #[test]
    fn unregister_removes_from_joined_rooms() {
        let connections = ConnectionRegistry::new();
        let rooms = RoomRegistry::new();
        let conv = ConversationId::new();
        let user = UserId::new();
        let (conn_id, _rx) = make_session(&connections, &user);

        rooms.join(&conv, &conn_id, &connections);
        assert_eq!(rooms.active_users(&conv, &connections).len(), 1);

        connections.unregister(&conn_id, &rooms);
        assert_eq!(rooms.active_users(&conv, &connections).len(), 0);
    }
}
