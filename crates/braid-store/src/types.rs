use braid_core::types::{
    BranchId, BranchRole, ConversationFormat, ConversationId, ConversationMode, MessageId,
    ParticipantId, ParticipantRole, UserId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// §3 Conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub owner: UserId,
    pub title: String,
    pub model: String,
    pub format: ConversationFormat,
    pub settings: ConversationSettings,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSettings {
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            max_tokens: 4096,
            top_p: None,
            top_k: None,
        }
    }
}

/// §3 Participant. A `standard` conversation has an implicit single
/// assistant derived from `Conversation.model`; a `prefill` conversation
/// carries an explicit set of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub conversation_id: ConversationId,
    pub name: String,
    pub role: ParticipantRole,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub conversation_mode: Option<ConversationMode>,
    pub is_active: bool,
    pub settings: ParticipantSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParticipantSettings {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// §3 Message — a container for sibling `Branch`es at one tree point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub order: u64,
    pub branches: Vec<Branch>,
    pub active_branch_id: BranchId,
}

impl Message {
    pub fn active_branch(&self) -> Option<&Branch> {
        self.branches.iter().find(|b| b.id == self.active_branch_id)
    }

    pub fn branch(&self, id: &BranchId) -> Option<&Branch> {
        self.branches.iter().find(|b| &b.id == id)
    }
}

/// §3 Branch — one alternative at a tree node carrying the actual content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    pub id: BranchId,
    /// `"root"` for tree roots (braid_core::types::ROOT_BRANCH).
    pub parent_branch_id: String,
    pub content: String,
    pub content_blocks: Option<Vec<ContentBlock>>,
    pub role: BranchRole,
    pub participant_id: Option<ParticipantId>,
    pub model: Option<String>,
    pub hidden_from_ai: bool,
    pub private_to_user_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentBlock {
    Thinking { text: String },
    Text { text: String },
    Tool { name: String, input: serde_json::Value },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub filename: String,
    pub mime_type: String,
    pub url: String,
}

/// §3 UI state (per user × conversation). Lifetime = user's lifetime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UiState {
    pub read_branch_ids: Vec<BranchId>,
    pub is_detached: bool,
    /// messageId -> branchId override, active only for this viewer.
    pub detached_branches: HashMap<MessageId, BranchId>,
}

/// Parameters for creating a new message (first branch at a fresh tree point).
#[derive(Debug, Clone)]
pub struct NewBranch {
    pub parent_branch_id: String,
    pub content: String,
    pub content_blocks: Option<Vec<ContentBlock>>,
    pub role: BranchRole,
    pub participant_id: Option<ParticipantId>,
    pub model: Option<String>,
    pub hidden_from_ai: bool,
    pub private_to_user_id: Option<UserId>,
    pub attachments: Vec<Attachment>,
}

/// Patch applied by `UpdateMessageBranch` — only `Some` fields are changed.
#[derive(Debug, Clone, Default)]
pub struct BranchMetaPatch {
    pub content_blocks: Option<Option<Vec<ContentBlock>>>,
    pub hidden_from_ai: Option<bool>,
    pub model: Option<Option<String>>,
}

/// A user's recorded API key for a provider — presence alone satisfies
/// one arm of `CreditGate::Allowed` (spec §4.7).
#[derive(Debug, Clone)]
pub struct ApiKeyRecord {
    pub provider: String,
}

/// Grant balances by currency code (spec §4.7, §6 `GetUserGrantSummary`).
#[derive(Debug, Clone, Default)]
pub struct GrantSummary {
    pub balances: HashMap<String, f64>,
}

impl GrantSummary {
    pub fn balance(&self, currency: &str) -> f64 {
        self.balances.get(currency).copied().unwrap_or(0.0)
    }
}

/// Per-call usage/cost metrics persisted via `AddMetrics`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metrics {
    pub conversation_id: ConversationId,
    pub model: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost: f64,
    pub currency: String,
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub display_name: String,
    pub has_overspend_capability: bool,
}
