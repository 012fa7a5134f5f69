use std::sync::Arc;

use braid_core::types::{
    BranchId, BranchRole, ConnId, ConversationId, MessageId, ParticipantId, ParticipantRole,
    UserId, ROOT_BRANCH,
};
use braid_core::ContentFilter;
use braid_protocol::OutboundEvent;
use braid_rooms::{ConnectionRegistry, RoomRegistry, SessionMessage};
use braid_store::types::{Attachment, BranchMetaPatch, NewBranch, Participant};
use braid_store::BranchStore;

/// What the gateway should do after an op returns successfully.
#[derive(Debug, Clone)]
pub enum NextStep {
    /// Nothing further — e.g. `hiddenFromAi`, or a `prefill` `chat` with no
    /// `responderId`.
    None,
    /// Run §4.8 generation into the named branches of `assistant_message_id`.
    Generate {
        responder_participant_id: Option<ParticipantId>,
        assistant_message_id: MessageId,
        assistant_branch_ids: Vec<BranchId>,
    },
}

#[derive(Debug, Clone)]
pub struct OpOutcome {
    pub next: NextStep,
}

/// Staged conversation procedures (spec §4.6). Each public method runs the
/// shared preflight, applies the branch-placement rules, persists through
/// `BranchStore`, and broadcasts — then reports whether the gateway should
/// hand off to `GenerationCoordinator`.
///
/// Grounded on `skynet-agent`'s staged `provider::complete`-then-`stream`
/// flow for the persist-then-broadcast-then-maybe-generate shape, and on
/// `skynet-users::permissions::PermissionChecker`'s precedence style for
/// the preflight chain.
pub struct ConversationOps<'a> {
    pub store: &'a dyn BranchStore,
    pub rooms: &'a RoomRegistry,
    pub connections: &'a ConnectionRegistry,
    pub content_filter: &'a dyn ContentFilter,
}

impl<'a> ConversationOps<'a> {
    pub fn new(
        store: &'a dyn BranchStore,
        rooms: &'a RoomRegistry,
        connections: &'a ConnectionRegistry,
        content_filter: &'a dyn ContentFilter,
    ) -> Self {
        Self {
            store,
            rooms,
            connections,
            content_filter,
        }
    }

    fn reply(&self, actor_conn: &ConnId, event: OutboundEvent) {
        if let Some(handle) = self.connections.get(actor_conn) {
            handle.send(SessionMessage::Event(event));
        }
    }

    /// Common preflight: conversation exists, permission, age gate, and
    /// (when `text` is `Some`) content filtering. Returns `Ok(None)` when
    /// the op should stop having already replied to the caller.
    async fn preflight(
        &self,
        conversation_id: &ConversationId,
        user_id: &UserId,
        actor_conn: &ConnId,
        text: Option<&str>,
        for_delete: bool,
    ) -> braid_core::Result<Option<()>> {
        self.store.get_conversation(conversation_id).await?;

        let permitted = if for_delete {
            self.store
                .can_user_delete_in_conversation(user_id, conversation_id)
                .await?
        } else {
            self.store
                .can_user_chat_in_conversation(user_id, conversation_id)
                .await?
        };
        if !permitted {
            self.reply(
                actor_conn,
                OutboundEvent::Error {
                    code: braid_protocol::ErrorCode::PermissionDenied,
                    message: "not permitted in this conversation".to_string(),
                    suggestion: None,
                },
            );
            return Ok(None);
        }

        if !self.store.is_user_age_verified(user_id).await? {
            self.reply(
                actor_conn,
                OutboundEvent::Error {
                    code: braid_protocol::ErrorCode::PermissionDenied,
                    message: "age verification required".to_string(),
                    suggestion: None,
                },
            );
            return Ok(None);
        }

        if let Some(text) = text {
            let result = self.content_filter.check(text).await;
            if result.blocked {
                self.reply(
                    actor_conn,
                    OutboundEvent::ContentBlocked {
                        conversation_id: conversation_id.clone(),
                        reason: result.reason.unwrap_or_default(),
                        categories: result.categories,
                    },
                );
                return Ok(None);
            }
        }

        Ok(Some(()))
    }

    /// Branch-placement rules shared by `chat`/`continue`/`regenerate`/`edit`.
    /// Returns the resolved parent branch id, plus, when a message already
    /// exists parented there, that message's id (so the caller appends a
    /// sibling branch instead of creating a new message).
    async fn resolve_placement(
        &self,
        conversation_id: &ConversationId,
        user_id: &UserId,
        parent_branch_id: Option<String>,
    ) -> braid_core::Result<(String, Option<MessageId>)> {
        let messages = self.store.get_conversation_messages(conversation_id).await?;

        let parent = match parent_branch_id {
            Some(p) => p,
            None => {
                let ui_state = self.store.get_ui_state(user_id, conversation_id).await?;
                let path = braid_store::project(&messages, &ui_state, user_id);
                path.last()
                    .map(|step| step.branch_id.as_str().to_string())
                    .unwrap_or_else(|| ROOT_BRANCH.to_string())
            }
        };

        let existing = messages
            .iter()
            .find(|m| m.branches.iter().any(|b| b.parent_branch_id == parent))
            .map(|m| m.id.clone());

        Ok((parent, existing))
    }

    async fn place_branch(
        &self,
        conversation_id: &ConversationId,
        existing_message: Option<MessageId>,
        new_branch: NewBranch,
    ) -> braid_core::Result<(MessageId, BranchId)> {
        match existing_message {
            Some(message_id) => {
                let branch = self.store.add_message_branch(&message_id, new_branch).await?;
                Ok((message_id, branch.id))
            }
            None => {
                let message = self.store.create_message(conversation_id, new_branch).await?;
                let branch_id = message.active_branch_id.clone();
                Ok((message.id, branch_id))
            }
        }
    }

    async fn resolve_standard_assistant(
        &self,
        conversation_id: &ConversationId,
    ) -> braid_core::Result<Option<Participant>> {
        let participants = self
            .store
            .get_conversation_participants(conversation_id)
            .await?;
        Ok(participants
            .into_iter()
            .find(|p| p.role == ParticipantRole::Assistant && p.is_active))
    }

    async fn resolve_responder(
        &self,
        conversation_id: &ConversationId,
        responder_id: Option<ParticipantId>,
    ) -> braid_core::Result<Option<Participant>> {
        let participants = self
            .store
            .get_conversation_participants(conversation_id)
            .await?;
        if let Some(id) = responder_id {
            return Ok(participants.into_iter().find(|p| p.id == id));
        }
        Ok(participants
            .into_iter()
            .find(|p| p.role == ParticipantRole::Assistant && p.is_active))
    }

    /// `chat` — spec §4.6. `client_message_id` is the id the client
    /// optimistically rendered under; it is not the id the store assigns —
    /// the client reconciles its optimistic bubble against the real
    /// `message_created` broadcast, not this value.
    #[allow(clippy::too_many_arguments)]
    pub async fn chat(
        &self,
        conversation_id: &ConversationId,
        user_id: &UserId,
        actor_conn: &ConnId,
        _client_message_id: MessageId,
        content: String,
        parent_branch_id: Option<String>,
        participant_id: Option<ParticipantId>,
        responder_id: Option<ParticipantId>,
        attachments: Vec<Attachment>,
        hidden_from_ai: bool,
        sampling_branches: u32,
    ) -> braid_core::Result<OpOutcome> {
        if self
            .preflight(conversation_id, user_id, actor_conn, Some(&content), false)
            .await?
            .is_none()
        {
            return Ok(OpOutcome { next: NextStep::None });
        }

        let conversation = self.store.get_conversation(conversation_id).await?;
        let (parent, existing) = self
            .resolve_placement(conversation_id, user_id, parent_branch_id)
            .await?;

        let new_branch = NewBranch {
            parent_branch_id: parent.clone(),
            content,
            content_blocks: None,
            role: BranchRole::User,
            participant_id,
            model: None,
            hidden_from_ai,
            private_to_user_id: None,
            attachments,
        };
        let (created_message_id, created_branch_id) = self
            .place_branch(conversation_id, existing, new_branch)
            .await?;
        let created = self.store.get_message(&created_message_id).await?;

        self.rooms.broadcast(
            conversation_id,
            OutboundEvent::MessageCreated {
                conversation_id: conversation_id.clone(),
                message: created,
            },
            None,
            self.connections,
        );

        if hidden_from_ai {
            return Ok(OpOutcome { next: NextStep::None });
        }

        let responder = match conversation.format {
            braid_core::types::ConversationFormat::Standard => {
                self.resolve_standard_assistant(conversation_id).await?
            }
            braid_core::types::ConversationFormat::Prefill => match responder_id {
                None => return Ok(OpOutcome { next: NextStep::None }),
                Some(id) => {
                    let found = self.resolve_responder(conversation_id, Some(id)).await?;
                    if found.is_none() {
                        self.reply(
                            actor_conn,
                            OutboundEvent::Error {
                                code: braid_protocol::ErrorCode::NotFound,
                                message: "responder not found".to_string(),
                                suggestion: None,
                            },
                        );
                        return Ok(OpOutcome { next: NextStep::None });
                    }
                    found
                }
            },
        };

        // A `chat` always opens a fresh thread point: the responder's
        // branch parents at the user branch just created, never overwriting
        // it, mirroring `edit`'s follow-up-message creation (spec §4.6,
        // scenario 1 — two messages, not one).
        let assistant_new_branch = NewBranch {
            parent_branch_id: created_branch_id.as_str().to_string(),
            content: String::new(),
            content_blocks: None,
            role: BranchRole::Assistant,
            participant_id: responder.as_ref().map(|p| p.id.clone()),
            model: responder.as_ref().and_then(|p| p.model.clone()),
            hidden_from_ai: false,
            private_to_user_id: None,
            attachments: vec![],
        };
        let assistant_message_id = self
            .store
            .create_message(conversation_id, assistant_new_branch)
            .await?
            .id;

        self.start_generation(
            conversation_id,
            &assistant_message_id,
            created_branch_id.as_str(),
            responder,
            sampling_branches,
        )
        .await
    }

    /// `continue` — spec §4.6.
    pub async fn continue_(
        &self,
        conversation_id: &ConversationId,
        user_id: &UserId,
        actor_conn: &ConnId,
        parent_branch_id: Option<String>,
        responder_id: Option<ParticipantId>,
        sampling_branches: u32,
    ) -> braid_core::Result<OpOutcome> {
        if self
            .preflight(conversation_id, user_id, actor_conn, None, false)
            .await?
            .is_none()
        {
            return Ok(OpOutcome { next: NextStep::None });
        }

        let conversation = self.store.get_conversation(conversation_id).await?;
        let (parent, existing) = self
            .resolve_placement(conversation_id, user_id, parent_branch_id)
            .await?;

        let responder = match conversation.format {
            braid_core::types::ConversationFormat::Standard => {
                self.resolve_standard_assistant(conversation_id).await?
            }
            braid_core::types::ConversationFormat::Prefill => {
                self.resolve_responder(conversation_id, responder_id).await?
            }
        };

        let new_branch = NewBranch {
            parent_branch_id: parent.clone(),
            content: String::new(),
            content_blocks: None,
            role: BranchRole::Assistant,
            participant_id: responder.as_ref().map(|p| p.id.clone()),
            model: responder.as_ref().and_then(|p| p.model.clone()),
            hidden_from_ai: false,
            private_to_user_id: None,
            attachments: vec![],
        };
        let (message_id, _) = self
            .place_branch(conversation_id, existing, new_branch)
            .await?;

        self.start_generation(conversation_id, &message_id, &parent, responder, sampling_branches)
            .await
    }

    /// `regenerate` — spec §4.6.
    pub async fn regenerate(
        &self,
        conversation_id: &ConversationId,
        user_id: &UserId,
        actor_conn: &ConnId,
        message_id: MessageId,
        branch_id: BranchId,
        sampling_branches: u32,
    ) -> braid_core::Result<OpOutcome> {
        if self
            .preflight(conversation_id, user_id, actor_conn, None, false)
            .await?
            .is_none()
        {
            return Ok(OpOutcome { next: NextStep::None });
        }

        let existing_message = self.store.get_message(&message_id).await?;
        let Some(original) = existing_message.branch(&branch_id) else {
            self.reply(
                actor_conn,
                OutboundEvent::Error {
                    code: braid_protocol::ErrorCode::NotFound,
                    message: "branch not found".to_string(),
                    suggestion: None,
                },
            );
            return Ok(OpOutcome { next: NextStep::None });
        };
        let parent = original.parent_branch_id.clone();
        let original_participant = original.participant_id.clone();

        let responder = match original_participant {
            Some(id) => self.resolve_responder(conversation_id, Some(id)).await?,
            None => {
                let conversation = self.store.get_conversation(conversation_id).await?;
                match conversation.format {
                    braid_core::types::ConversationFormat::Standard => {
                        self.resolve_standard_assistant(conversation_id).await?
                    }
                    braid_core::types::ConversationFormat::Prefill => None,
                }
            }
        };

        let sibling = self
            .store
            .add_message_branch(
                &message_id,
                NewBranch {
                    parent_branch_id: parent.clone(),
                    content: String::new(),
                    content_blocks: None,
                    role: BranchRole::Assistant,
                    participant_id: responder.as_ref().map(|p| p.id.clone()),
                    model: responder.as_ref().and_then(|p| p.model.clone()),
                    hidden_from_ai: false,
                    private_to_user_id: None,
                    attachments: vec![],
                },
            )
            .await?;

        self.start_generation(conversation_id, &message_id, &parent, responder, sampling_branches.max(1))
            .await
            .map(|mut outcome| {
                if let NextStep::Generate { assistant_branch_ids, .. } = &mut outcome.next {
                    if assistant_branch_ids.is_empty() {
                        assistant_branch_ids.push(sibling.id.clone());
                    }
                }
                outcome
            })
    }

    /// `edit` — spec §4.6.
    pub async fn edit(
        &self,
        conversation_id: &ConversationId,
        user_id: &UserId,
        actor_conn: &ConnId,
        message_id: MessageId,
        branch_id: BranchId,
        content: String,
        responder_id: Option<ParticipantId>,
        skip_regeneration: bool,
        sampling_branches: u32,
    ) -> braid_core::Result<OpOutcome> {
        if self
            .preflight(conversation_id, user_id, actor_conn, Some(&content), false)
            .await?
            .is_none()
        {
            return Ok(OpOutcome { next: NextStep::None });
        }

        let message = self.store.get_message(&message_id).await?;
        let Some(target) = message.branch(&branch_id) else {
            self.reply(
                actor_conn,
                OutboundEvent::Error {
                    code: braid_protocol::ErrorCode::NotFound,
                    message: "branch not found".to_string(),
                    suggestion: None,
                },
            );
            return Ok(OpOutcome { next: NextStep::None });
        };
        let parent = target.parent_branch_id.clone();
        let target_role = target.role;

        let new_branch = self
            .store
            .add_message_branch(
                &message_id,
                NewBranch {
                    parent_branch_id: parent.clone(),
                    content,
                    content_blocks: None,
                    role: target_role,
                    participant_id: None,
                    model: None,
                    hidden_from_ai: false,
                    private_to_user_id: None,
                    attachments: vec![],
                },
            )
            .await?;

        let edited = self.store.get_message(&message_id).await?;
        self.rooms.broadcast(
            conversation_id,
            OutboundEvent::MessageEdited {
                conversation_id: conversation_id.clone(),
                message: edited,
            },
            None,
            self.connections,
        );

        if matches!(target_role, BranchRole::Assistant) || skip_regeneration {
            return Ok(OpOutcome { next: NextStep::None });
        }

        let messages = self.store.get_conversation_messages(conversation_id).await?;
        let ui_state = self.store.get_ui_state(user_id, conversation_id).await?;
        let path = braid_store::project(&messages, &ui_state, user_id);
        let follow_up = path
            .iter()
            .position(|step| step.branch_id == branch_id)
            .and_then(|idx| path.get(idx + 1))
            .map(|step| step.message.id.clone());

        let conversation = self.store.get_conversation(conversation_id).await?;
        let responder = match conversation.format {
            braid_core::types::ConversationFormat::Standard => {
                self.resolve_standard_assistant(conversation_id).await?
            }
            braid_core::types::ConversationFormat::Prefill => {
                self.resolve_responder(conversation_id, responder_id).await?
            }
        };

        let assistant_new_branch = NewBranch {
            parent_branch_id: new_branch.id.as_str().to_string(),
            content: String::new(),
            content_blocks: None,
            role: BranchRole::Assistant,
            participant_id: responder.as_ref().map(|p| p.id.clone()),
            model: responder.as_ref().and_then(|p| p.model.clone()),
            hidden_from_ai: false,
            private_to_user_id: None,
            attachments: vec![],
        };

        let assistant_message_id = match follow_up {
            Some(existing_message_id) => {
                self.store
                    .add_message_branch(&existing_message_id, assistant_new_branch)
                    .await?;
                existing_message_id
            }
            None => {
                self.store
                    .create_message(conversation_id, assistant_new_branch)
                    .await?
                    .id
            }
        };

        self.start_generation(
            conversation_id,
            &assistant_message_id,
            new_branch.id.as_str(),
            responder,
            sampling_branches.max(1),
        )
        .await
    }

    /// `delete` — spec §4.6.
    pub async fn delete(
        &self,
        conversation_id: &ConversationId,
        user_id: &UserId,
        actor_conn: &ConnId,
        message_id: MessageId,
        branch_id: BranchId,
    ) -> braid_core::Result<OpOutcome> {
        if self
            .preflight(conversation_id, user_id, actor_conn, None, true)
            .await?
            .is_none()
        {
            return Ok(OpOutcome { next: NextStep::None });
        }

        let deleted_messages = self
            .store
            .delete_message_branch(&message_id, &branch_id, user_id)
            .await?;

        self.rooms.broadcast(
            conversation_id,
            OutboundEvent::MessageDeleted {
                conversation_id: conversation_id.clone(),
                message_id,
                branch_id,
                deleted_messages,
            },
            None,
            self.connections,
        );

        Ok(OpOutcome { next: NextStep::None })
    }

    /// Shared tail of `chat`/`continue`/`regenerate`/`edit`: broadcasts
    /// `ai_generating` and returns the `Generate` next-step, or — if the
    /// room already has an active AI slot — nothing (the gateway's
    /// `GenerationCoordinator` call will itself discover the slot is busy
    /// and emit `ai_request_queued`; admission is its job, not ours).
    async fn start_generation(
        &self,
        conversation_id: &ConversationId,
        assistant_message_id: &MessageId,
        parent_branch_id: &str,
        responder: Option<Participant>,
        sampling_branches: u32,
    ) -> braid_core::Result<OpOutcome> {
        let n = sampling_branches.max(1);
        let mut assistant_branch_ids = Vec::new();
        let message = self.store.get_message(assistant_message_id).await?;
        assistant_branch_ids.push(message.active_branch_id.clone());

        for _ in 1..n {
            let branch = self
                .store
                .add_message_branch(
                    assistant_message_id,
                    NewBranch {
                        parent_branch_id: parent_branch_id.to_string(),
                        content: String::new(),
                        content_blocks: None,
                        role: BranchRole::Assistant,
                        participant_id: responder.as_ref().map(|p| p.id.clone()),
                        model: responder.as_ref().and_then(|p| p.model.clone()),
                        hidden_from_ai: false,
                        private_to_user_id: None,
                        attachments: vec![],
                    },
                )
                .await?;
            assistant_branch_ids.push(branch.id);
        }

        Ok(OpOutcome {
            next: NextStep::Generate {
                responder_participant_id: responder.map(|p| p.id),
                assistant_message_id: assistant_message_id.clone(),
                assistant_branch_ids,
            },
        })
    }
}
