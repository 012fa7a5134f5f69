use braid_core::types::{BranchId, ConversationId, MessageId, UserId};
use braid_store::types::{ContentBlock, Message, Metrics};
use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;

/// A room's single-flight AI slot, echoed back on `room_joined` /
/// `ai_request_queued` so a freshly-joined (or bounced) client knows
/// whether a generation is already in flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveAiRequest {
    pub user_id: UserId,
    pub message_id: MessageId,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomUser {
    pub user_id: UserId,
    pub joined_at: chrono::DateTime<chrono::Utc>,
}

/// Server → client frames (spec §4.3). Internally tagged on `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent {
    Connected,

    Error {
        code: ErrorCode,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        suggestion: Option<String>,
    },

    Pong {
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    RoomJoined {
        conversation_id: ConversationId,
        active_users: Vec<RoomUser>,
        #[serde(skip_serializing_if = "Option::is_none")]
        active_request: Option<ActiveAiRequest>,
    },

    RoomLeft {
        conversation_id: ConversationId,
    },

    UserJoined {
        conversation_id: ConversationId,
        user_id: UserId,
    },

    UserLeft {
        conversation_id: ConversationId,
        user_id: UserId,
    },

    UserTyping {
        conversation_id: ConversationId,
        user_id: UserId,
        display_name: String,
        is_typing: bool,
    },

    AiGenerating {
        conversation_id: ConversationId,
    },

    AiFinished {
        conversation_id: ConversationId,
    },

    MessageCreated {
        conversation_id: ConversationId,
        message: Message,
    },

    MessageEdited {
        conversation_id: ConversationId,
        message: Message,
    },

    MessageDeleted {
        conversation_id: ConversationId,
        message_id: MessageId,
        branch_id: BranchId,
        deleted_messages: Vec<MessageId>,
    },

    MessageRestored {
        conversation_id: ConversationId,
        message: Message,
    },

    MessageBranchRestored {
        conversation_id: ConversationId,
        message_id: MessageId,
        branch_id: BranchId,
    },

    MessageSplit {
        conversation_id: ConversationId,
        original_message_id: MessageId,
        new_message_ids: Vec<MessageId>,
    },

    BranchVisibilityChanged {
        conversation_id: ConversationId,
        message_id: MessageId,
        branch_id: BranchId,
        hidden_from_ai: bool,
    },

    Stream {
        conversation_id: ConversationId,
        message_id: MessageId,
        branch_id: BranchId,
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        content_blocks: Option<Vec<ContentBlock>>,
        #[serde(default)]
        aborted: bool,
        #[serde(default)]
        done: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },

    MetricsUpdate {
        conversation_id: ConversationId,
        metrics: Metrics,
    },

    ContentBlocked {
        conversation_id: ConversationId,
        reason: String,
        categories: Vec<String>,
    },

    AiRequestQueued {
        conversation_id: ConversationId,
        active_request: ActiveAiRequest,
    },

    GenerationAborted {
        conversation_id: ConversationId,
        success: bool,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Usage {
    pub tokens_in: u64,
    pub tokens_out: u64,
}
