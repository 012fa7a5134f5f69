use braid_core::types::{ConnId, ConversationId, UserId};
use braid_protocol::OutboundEvent;

use crate::connection::ConnectionRegistry;
use crate::room::RoomRegistry;

/// Thin adapter producing the presence envelopes of spec §4.3 and handing
/// them to `RoomRegistry::broadcast`. Kept as its own type (rather than
/// inlined at call sites) so the display-name derivation rule lives in one
/// place, mirroring how `skynet-users::resolver` centralizes user
/// display-name resolution away from its call sites.
pub struct PresenceBroadcaster<'a> {
    pub rooms: &'a RoomRegistry,
    pub connections: &'a ConnectionRegistry,
}

impl<'a> PresenceBroadcaster<'a> {
    pub fn new(rooms: &'a RoomRegistry, connections: &'a ConnectionRegistry) -> Self {
        Self { rooms, connections }
    }

    pub fn typing(
        &self,
        conversation_id: &ConversationId,
        sender: &ConnId,
        user_id: &UserId,
        display_name_source: &str,
        is_typing: bool,
    ) {
        self.rooms.broadcast(
            conversation_id,
            OutboundEvent::UserTyping {
                conversation_id: conversation_id.clone(),
                user_id: user_id.clone(),
                display_name: short_display_name(display_name_source),
                is_typing,
            },
            Some(sender),
            self.connections,
        );
    }
}

/// The local-part of an email when no explicit display name is set
/// (spec §4.9).
pub fn short_display_name(source: &str) -> String {
    source.split('@').next().unwrap_or(source).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_local_part_of_email() {
        assert_eq!(short_display_name("alice@example.com"), "alice");
    }

    #[test]
    fn passes_through_plain_names() {
        assert_eq!(short_display_name("Alice"), "Alice");
    }
}
