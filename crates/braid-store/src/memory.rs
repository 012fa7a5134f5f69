use async_trait::async_trait;
use braid_core::types::{BranchId, ConversationId, MessageId, UserId};
use dashmap::DashMap;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::store::BranchStore;
use crate::types::{
    ApiKeyRecord, Branch, BranchMetaPatch, Conversation, GrantSummary, Message, Metrics,
    NewBranch, Participant, UiState, User,
};

#[derive(Default)]
struct ConversationMeta {
    next_order: u64,
    version: u64,
}

/// `DashMap`-backed reference implementation, grounded on the
/// `RoomRegistry`/`ConnectionRegistry` lock-per-registry pattern used
/// throughout the gateway crate. Good for tests and single-process
/// deployments; `SqliteStore` is the durable counterpart.
#[derive(Default)]
pub struct InMemoryStore {
    conversations: DashMap<ConversationId, Conversation>,
    participants: DashMap<ConversationId, Vec<Participant>>,
    messages: DashMap<MessageId, Message>,
    conversation_messages: DashMap<ConversationId, Vec<MessageId>>,
    message_conversation: DashMap<MessageId, ConversationId>,
    meta: DashMap<ConversationId, Mutex<ConversationMeta>>,

    users: DashMap<UserId, User>,
    usernames: DashMap<String, UserId>,
    api_keys: DashMap<UserId, Vec<ApiKeyRecord>>,
    grants: DashMap<UserId, GrantSummary>,
    overspend: DashMap<UserId, bool>,
    chat_permission: DashMap<(UserId, ConversationId), bool>,
    delete_permission: DashMap<(UserId, ConversationId), bool>,
    age_verified: DashMap<UserId, bool>,
    metrics: DashMap<ConversationId, Vec<Metrics>>,
    ui_state: DashMap<(UserId, ConversationId), UiState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test/seed helper: register a conversation directly.
    pub fn insert_conversation(&self, conversation: Conversation) {
        let id = conversation.id.clone();
        self.conversations.insert(id.clone(), conversation);
        self.meta.entry(id).or_insert_with(|| Mutex::new(ConversationMeta::default()));
    }

    pub fn insert_participant(&self, participant: Participant) {
        self.participants
            .entry(participant.conversation_id.clone())
            .or_default()
            .push(participant);
    }

    pub fn insert_user(&self, user: User) {
        self.usernames.insert(user.username.clone(), user.id.clone());
        self.users.insert(user.id.clone(), user);
    }

    pub fn set_api_keys(&self, user_id: UserId, keys: Vec<ApiKeyRecord>) {
        self.api_keys.insert(user_id, keys);
    }

    pub fn set_grant_summary(&self, user_id: UserId, summary: GrantSummary) {
        self.grants.insert(user_id, summary);
    }

    pub fn set_overspend_capability(&self, user_id: UserId, allowed: bool) {
        self.overspend.insert(user_id, allowed);
    }

    fn bump_version(&self, conversation_id: &ConversationId) -> u64 {
        let entry = self
            .meta
            .entry(conversation_id.clone())
            .or_insert_with(|| Mutex::new(ConversationMeta::default()));
        let mut guard = entry.lock();
        guard.version += 1;
        guard.version
    }

    fn next_order(&self, conversation_id: &ConversationId) -> u64 {
        let entry = self
            .meta
            .entry(conversation_id.clone())
            .or_insert_with(|| Mutex::new(ConversationMeta::default()));
        let mut guard = entry.lock();
        let order = guard.next_order;
        guard.next_order += 1;
        order
    }

    fn new_branch_from(new_branch: NewBranch) -> Branch {
        Branch {
            id: BranchId::new(),
            parent_branch_id: new_branch.parent_branch_id,
            content: new_branch.content,
            content_blocks: new_branch.content_blocks,
            role: new_branch.role,
            participant_id: new_branch.participant_id,
            model: new_branch.model,
            hidden_from_ai: new_branch.hidden_from_ai,
            private_to_user_id: new_branch.private_to_user_id,
            created_at: chrono::Utc::now(),
            attachments: new_branch.attachments,
        }
    }
}

#[async_trait]
impl BranchStore for InMemoryStore {
    async fn get_conversation(&self, id: &ConversationId) -> Result<Conversation> {
        self.conversations
            .get(id)
            .map(|c| c.clone())
            .ok_or_else(|| StoreError::NotFound(format!("conversation {id}")))
    }

    async fn get_conversation_messages(&self, id: &ConversationId) -> Result<Vec<Message>> {
        let ids = self
            .conversation_messages
            .get(id)
            .map(|v| v.clone())
            .unwrap_or_default();
        Ok(ids
            .into_iter()
            .filter_map(|mid| self.messages.get(&mid).map(|m| m.clone()))
            .collect())
    }

    async fn get_conversation_participants(
        &self,
        id: &ConversationId,
    ) -> Result<Vec<Participant>> {
        Ok(self.participants.get(id).map(|v| v.clone()).unwrap_or_default())
    }

    async fn create_message(
        &self,
        conversation_id: &ConversationId,
        new_branch: NewBranch,
    ) -> Result<Message> {
        let branch = Self::new_branch_from(new_branch);
        let message = Message {
            id: MessageId::new(),
            conversation_id: conversation_id.clone(),
            order: self.next_order(conversation_id),
            active_branch_id: branch.id.clone(),
            branches: vec![branch],
        };
        self.messages.insert(message.id.clone(), message.clone());
        self.message_conversation
            .insert(message.id.clone(), conversation_id.clone());
        self.conversation_messages
            .entry(conversation_id.clone())
            .or_default()
            .push(message.id.clone());
        self.bump_version(conversation_id);
        Ok(message)
    }

    async fn add_message_branch(
        &self,
        message_id: &MessageId,
        new_branch: NewBranch,
    ) -> Result<Branch> {
        let conversation_id = self
            .message_conversation
            .get(message_id)
            .map(|v| v.clone())
            .ok_or_else(|| StoreError::NotFound(format!("message {message_id}")))?;
        let branch = Self::new_branch_from(new_branch);
        let mut message = self
            .messages
            .get_mut(message_id)
            .ok_or_else(|| StoreError::NotFound(format!("message {message_id}")))?;
        message.branches.push(branch.clone());
        message.active_branch_id = branch.id.clone();
        self.bump_version(&conversation_id);
        Ok(branch)
    }

    async fn update_message_content(
        &self,
        message_id: &MessageId,
        branch_id: &BranchId,
        text: &str,
    ) -> Result<()> {
        let conversation_id = self
            .message_conversation
            .get(message_id)
            .map(|v| v.clone())
            .ok_or_else(|| StoreError::NotFound(format!("message {message_id}")))?;
        let mut message = self
            .messages
            .get_mut(message_id)
            .ok_or_else(|| StoreError::NotFound(format!("message {message_id}")))?;
        let branch = message
            .branches
            .iter_mut()
            .find(|b| &b.id == branch_id)
            .ok_or_else(|| StoreError::NotFound(format!("branch {branch_id}")))?;
        branch.content = text.to_string();
        self.bump_version(&conversation_id);
        Ok(())
    }

    async fn update_message_branch(
        &self,
        message_id: &MessageId,
        branch_id: &BranchId,
        patch: BranchMetaPatch,
    ) -> Result<()> {
        let conversation_id = self
            .message_conversation
            .get(message_id)
            .map(|v| v.clone())
            .ok_or_else(|| StoreError::NotFound(format!("message {message_id}")))?;
        let mut message = self
            .messages
            .get_mut(message_id)
            .ok_or_else(|| StoreError::NotFound(format!("message {message_id}")))?;
        let branch = message
            .branches
            .iter_mut()
            .find(|b| &b.id == branch_id)
            .ok_or_else(|| StoreError::NotFound(format!("branch {branch_id}")))?;
        if let Some(blocks) = patch.content_blocks {
            branch.content_blocks = blocks;
        }
        if let Some(hidden) = patch.hidden_from_ai {
            branch.hidden_from_ai = hidden;
        }
        if let Some(model) = patch.model {
            branch.model = model;
        }
        self.bump_version(&conversation_id);
        Ok(())
    }

    async fn delete_message_branch(
        &self,
        message_id: &MessageId,
        branch_id: &BranchId,
        _acting_user: &UserId,
    ) -> Result<Vec<MessageId>> {
        let conversation_id = self
            .message_conversation
            .get(message_id)
            .map(|v| v.clone())
            .ok_or_else(|| StoreError::NotFound(format!("message {message_id}")))?;

        let mut deleted = Vec::new();
        let message_only_branch = {
            let mut message = self
                .messages
                .get_mut(message_id)
                .ok_or_else(|| StoreError::NotFound(format!("message {message_id}")))?;
            message.branches.retain(|b| &b.id != branch_id);
            if message.active_branch_id == *branch_id {
                if let Some(first) = message.branches.first() {
                    message.active_branch_id = first.id.clone();
                }
            }
            message.branches.is_empty()
        };

        if message_only_branch {
            self.messages.remove(message_id);
            self.message_conversation.remove(message_id);
            if let Some(mut ids) = self.conversation_messages.get_mut(&conversation_id) {
                ids.retain(|id| id != message_id);
            }
            deleted.push(message_id.clone());
        }

        // Cascade: any message whose active branch parents at the deleted
        // branch id is orphaned and removed too (spec §4.6 delete).
        if deleted.contains(message_id) {
            let descendants: Vec<MessageId> = self
                .messages
                .iter()
                .filter(|entry| {
                    entry
                        .value()
                        .branches
                        .iter()
                        .any(|b| b.parent_branch_id == branch_id.as_str())
                })
                .map(|entry| entry.key().clone())
                .collect();
            for desc in descendants {
                self.messages.remove(&desc);
                self.message_conversation.remove(&desc);
                if let Some(mut ids) = self.conversation_messages.get_mut(&conversation_id) {
                    ids.retain(|id| id != &desc);
                }
                deleted.push(desc);
            }
        }

        self.bump_version(&conversation_id);
        Ok(deleted)
    }

    async fn get_message(&self, message_id: &MessageId) -> Result<Message> {
        self.messages
            .get(message_id)
            .map(|m| m.clone())
            .ok_or_else(|| StoreError::NotFound(format!("message {message_id}")))
    }

    async fn set_active_branch(&self, message_id: &MessageId, branch_id: &BranchId) -> Result<()> {
        let conversation_id = self
            .message_conversation
            .get(message_id)
            .map(|v| v.clone())
            .ok_or_else(|| StoreError::NotFound(format!("message {message_id}")))?;
        let mut message = self
            .messages
            .get_mut(message_id)
            .ok_or_else(|| StoreError::NotFound(format!("message {message_id}")))?;
        if !message.branches.iter().any(|b| &b.id == branch_id) {
            return Err(StoreError::NotFound(format!("branch {branch_id}")));
        }
        message.active_branch_id = branch_id.clone();
        drop(message);
        self.bump_version(&conversation_id);
        Ok(())
    }

    async fn get_user(&self, id: &UserId) -> Result<User> {
        self.users
            .get(id)
            .map(|u| u.clone())
            .ok_or_else(|| StoreError::NotFound(format!("user {id}")))
    }

    async fn get_user_by_username(&self, username: &str) -> Result<User> {
        let id = self
            .usernames
            .get(username)
            .map(|v| v.clone())
            .ok_or_else(|| StoreError::NotFound(format!("user {username}")))?;
        self.get_user(&id).await
    }

    async fn get_user_api_keys(&self, user_id: &UserId) -> Result<Vec<ApiKeyRecord>> {
        Ok(self.api_keys.get(user_id).map(|v| v.clone()).unwrap_or_default())
    }

    async fn get_user_grant_summary(&self, user_id: &UserId) -> Result<GrantSummary> {
        Ok(self.grants.get(user_id).map(|v| v.clone()).unwrap_or_default())
    }

    async fn get_applicable_grant_currencies(&self, _model: &str) -> Result<Vec<String>> {
        Ok(vec!["usd".to_string()])
    }

    async fn user_has_overspend_capability(&self, user_id: &UserId) -> Result<bool> {
        Ok(self.overspend.get(user_id).map(|v| *v).unwrap_or(false))
    }

    async fn can_user_chat_in_conversation(
        &self,
        user_id: &UserId,
        conversation_id: &ConversationId,
    ) -> Result<bool> {
        Ok(self
            .chat_permission
            .get(&(user_id.clone(), conversation_id.clone()))
            .map(|v| *v)
            .unwrap_or(true))
    }

    async fn can_user_delete_in_conversation(
        &self,
        user_id: &UserId,
        conversation_id: &ConversationId,
    ) -> Result<bool> {
        Ok(self
            .delete_permission
            .get(&(user_id.clone(), conversation_id.clone()))
            .map(|v| *v)
            .unwrap_or(true))
    }

    async fn add_metrics(&self, metrics: Metrics) -> Result<()> {
        self.metrics
            .entry(metrics.conversation_id.clone())
            .or_default()
            .push(metrics);
        Ok(())
    }

    async fn is_user_age_verified(&self, user_id: &UserId) -> Result<bool> {
        Ok(self.age_verified.get(user_id).map(|v| *v).unwrap_or(true))
    }

    async fn get_ui_state(
        &self,
        user_id: &UserId,
        conversation_id: &ConversationId,
    ) -> Result<UiState> {
        Ok(self
            .ui_state
            .get(&(user_id.clone(), conversation_id.clone()))
            .map(|v| v.clone())
            .unwrap_or_default())
    }

    async fn set_ui_state(
        &self,
        user_id: &UserId,
        conversation_id: &ConversationId,
        state: UiState,
    ) -> Result<()> {
        self.ui_state
            .insert((user_id.clone(), conversation_id.clone()), state);
        Ok(())
    }

    async fn version(&self, conversation_id: &ConversationId) -> Result<u64> {
        Ok(self
            .meta
            .get(conversation_id)
            .map(|m| m.lock().version)
            .unwrap_or(0))
    }
}

/// Helper only used by tests constructing ids outside the `id_type!` macro's
/// `new()` (kept here so call sites don't need to depend on `uuid` directly).
#[allow(dead_code)]
pub(crate) fn fresh_uuid() -> Uuid {
    Uuid::now_v7()
}
