use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use braid_core::types::{ConversationId, UserId};

/// Tracks the cancellation token for a room's single in-flight AI request
/// (spec §5: "each generation is scoped to a cancellation token"; §4.8:
/// "an inbound `abort` frame from the same user on the same room cancels
/// the cancellation token").
///
/// Open question (spec §9) resolved: `samplingBranches` share ONE token.
/// The spec's single `ai_generating`/`ai_finished` envelope for a
/// multi-branch request implies one logical operation; cancelling one
/// sampled branch without the others would leave the room's AI slot in an
/// inconsistent half-aborted state with no protocol event to describe it.
pub struct CancellationRegistry {
    active: DashMap<ConversationId, (UserId, CancellationToken)>,
}

impl Default for CancellationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self {
            active: DashMap::new(),
        }
    }

    /// Registers a fresh token for the room's new admission, replacing any
    /// (already-completed) prior entry.
    pub fn begin(&self, conversation_id: ConversationId, user_id: UserId) -> CancellationToken {
        let token = CancellationToken::new();
        self.active.insert(conversation_id, (user_id, token.clone()));
        token
    }

    pub fn end(&self, conversation_id: &ConversationId) {
        self.active.remove(conversation_id);
    }

    /// Cancels the active token iff it belongs to `user_id`. Returns whether
    /// a slot was found and cancelled (spec §4.3 `abort` → `generation_aborted{success}`).
    pub fn abort(&self, conversation_id: &ConversationId, user_id: &UserId) -> bool {
        match self.active.get(conversation_id) {
            Some(entry) if &entry.0 == user_id => {
                entry.1.cancel();
                true
            }
            _ => false,
        }
    }
}
