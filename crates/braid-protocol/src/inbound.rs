use braid_core::types::{BranchId, ConversationId, MessageId, ParticipantId};
use braid_store::types::Attachment;
use serde::{Deserialize, Serialize};

/// Client → server frames (spec §4.3). Internally tagged on `type`; an
/// unrecognized `type`, a missing required field, or malformed JSON at the
/// envelope layer is the caller's problem to turn into a single `error`
/// frame — this type only decodes frames that already parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    Ping,

    JoinRoom {
        conversation_id: ConversationId,
    },

    LeaveRoom {
        conversation_id: ConversationId,
    },

    Typing {
        conversation_id: ConversationId,
        is_typing: bool,
    },

    Abort {
        conversation_id: ConversationId,
    },

    Chat {
        conversation_id: ConversationId,
        message_id: MessageId,
        content: String,
        #[serde(default)]
        parent_branch_id: Option<String>,
        #[serde(default)]
        participant_id: Option<ParticipantId>,
        #[serde(default)]
        responder_id: Option<ParticipantId>,
        #[serde(default)]
        attachments: Vec<Attachment>,
        #[serde(default)]
        hidden_from_ai: bool,
        #[serde(default)]
        sampling_branches: Option<u32>,
    },

    #[serde(rename = "continue")]
    Continue {
        conversation_id: ConversationId,
        message_id: MessageId,
        #[serde(default)]
        parent_branch_id: Option<String>,
        #[serde(default)]
        responder_id: Option<ParticipantId>,
        #[serde(default)]
        sampling_branches: Option<u32>,
    },

    Regenerate {
        conversation_id: ConversationId,
        message_id: MessageId,
        branch_id: BranchId,
        #[serde(default)]
        parent_branch_id: Option<String>,
        #[serde(default)]
        sampling_branches: Option<u32>,
    },

    Edit {
        conversation_id: ConversationId,
        message_id: MessageId,
        branch_id: BranchId,
        content: String,
        #[serde(default)]
        responder_id: Option<ParticipantId>,
        #[serde(default)]
        skip_regeneration: bool,
        #[serde(default)]
        sampling_branches: Option<u32>,
    },

    Delete {
        conversation_id: ConversationId,
        message_id: MessageId,
        branch_id: BranchId,
    },
}

impl InboundMessage {
    /// The conversation this frame addresses, when it addresses one —
    /// every variant except `Ping` does.
    pub fn conversation_id(&self) -> Option<&ConversationId> {
        match self {
            InboundMessage::Ping => None,
            InboundMessage::JoinRoom { conversation_id }
            | InboundMessage::LeaveRoom { conversation_id }
            | InboundMessage::Typing { conversation_id, .. }
            | InboundMessage::Abort { conversation_id }
            | InboundMessage::Chat { conversation_id, .. }
            | InboundMessage::Continue { conversation_id, .. }
            | InboundMessage::Regenerate { conversation_id, .. }
            | InboundMessage::Edit { conversation_id, .. }
            | InboundMessage::Delete { conversation_id, .. } => Some(conversation_id),
        }
    }
}
