use crate::error::Result;
use crate::types::{
    ApiKeyRecord, Branch, BranchMetaPatch, Conversation, GrantSummary, Message, Metrics,
    NewBranch, Participant, UiState, User,
};
use async_trait::async_trait;
use braid_core::types::{BranchId, ConversationId, MessageId, UserId};

/// The persistence seam every subsystem consumes (spec §6's Store interface).
///
/// Object-safe via `async_trait` so a single `Arc<dyn BranchStore>` can be
/// shared across the gateway's connection handlers, mirroring how the
/// teacher threads its `Arc<SessionManager>`/`Arc<ChannelManager>` through
/// `AppState`.
#[async_trait]
pub trait BranchStore: Send + Sync {
    async fn get_conversation(&self, id: &ConversationId) -> Result<Conversation>;
    async fn get_conversation_messages(&self, id: &ConversationId) -> Result<Vec<Message>>;
    async fn get_conversation_participants(&self, id: &ConversationId)
        -> Result<Vec<Participant>>;

    /// Creates a new message at a fresh tree point (`GetConversationMessages`
    /// has no message sharing `new_branch.parent_branch_id`).
    async fn create_message(
        &self,
        conversation_id: &ConversationId,
        new_branch: NewBranch,
    ) -> Result<Message>;

    /// Appends a sibling branch to an existing message (shared
    /// `parent_branch_id`). Becomes the message's active branch.
    async fn add_message_branch(
        &self,
        message_id: &MessageId,
        new_branch: NewBranch,
    ) -> Result<Branch>;

    async fn update_message_content(
        &self,
        message_id: &MessageId,
        branch_id: &BranchId,
        text: &str,
    ) -> Result<()>;

    async fn update_message_branch(
        &self,
        message_id: &MessageId,
        branch_id: &BranchId,
        patch: BranchMetaPatch,
    ) -> Result<()>;

    /// Deletes a branch (and its message if it was the branch's only one),
    /// cascading to any message whose active branch parented at it.
    /// Returns the ids of every message fully removed.
    async fn delete_message_branch(
        &self,
        message_id: &MessageId,
        branch_id: &BranchId,
        acting_user: &UserId,
    ) -> Result<Vec<MessageId>>;

    async fn get_message(&self, message_id: &MessageId) -> Result<Message>;

    /// Sets which branch is active for a message (used by restore and by
    /// the branch-placement rules of §4.6 when a new branch is created).
    async fn set_active_branch(&self, message_id: &MessageId, branch_id: &BranchId) -> Result<()>;

    async fn get_user(&self, id: &UserId) -> Result<User>;
    async fn get_user_by_username(&self, username: &str) -> Result<User>;
    async fn get_user_api_keys(&self, user_id: &UserId) -> Result<Vec<ApiKeyRecord>>;
    async fn get_user_grant_summary(&self, user_id: &UserId) -> Result<GrantSummary>;
    async fn get_applicable_grant_currencies(&self, model: &str) -> Result<Vec<String>>;
    async fn user_has_overspend_capability(&self, user_id: &UserId) -> Result<bool>;

    async fn can_user_chat_in_conversation(
        &self,
        user_id: &UserId,
        conversation_id: &ConversationId,
    ) -> Result<bool>;
    async fn can_user_delete_in_conversation(
        &self,
        user_id: &UserId,
        conversation_id: &ConversationId,
    ) -> Result<bool>;

    async fn add_metrics(&self, metrics: Metrics) -> Result<()>;
    async fn is_user_age_verified(&self, user_id: &UserId) -> Result<bool>;

    async fn get_ui_state(&self, user_id: &UserId, conversation_id: &ConversationId)
        -> Result<UiState>;
    async fn set_ui_state(
        &self,
        user_id: &UserId,
        conversation_id: &ConversationId,
        state: UiState,
    ) -> Result<()>;

    /// Monotonic counter bumped by every mutating call above. `TreeProjection`
    /// callers use this to cache the projected path (spec §4.4).
    async fn version(&self, conversation_id: &ConversationId) -> Result<u64>;
}
