use std::sync::Arc;

use braid_conversation::{ConversationOps, NextStep};
use braid_core::types::{ConnId, ConversationId, UserId};
use braid_generation::GenerationCoordinator;
use braid_protocol::{ErrorCode, InboundMessage, OutboundEvent};
use braid_rooms::{PresenceBroadcaster, SessionMessage};
use tracing::warn;

use crate::app::AppState;

/// Routes one decoded inbound frame to the collaborator that owns it (spec
/// §4.3). `Chat`/`Continue`/`Regenerate`/`Edit` hand off to
/// `GenerationCoordinator` as a background task when they return
/// `NextStep::Generate`, so the connection's frame loop keeps accepting
/// frames (notably `abort`) while a response streams.
pub async fn dispatch(state: &Arc<AppState>, user_id: &UserId, conn_id: &ConnId, msg: InboundMessage) {
    match msg {
        InboundMessage::Ping => {
            reply(state, conn_id, OutboundEvent::Pong { timestamp: chrono::Utc::now() });
        }

        InboundMessage::JoinRoom { conversation_id } => {
            state.rooms.join(&conversation_id, conn_id, &state.connections);
            let active_users = state.rooms.active_users(&conversation_id, &state.connections);
            let active_request = state.rooms.active_request(&conversation_id);
            reply(
                state,
                conn_id,
                OutboundEvent::RoomJoined {
                    conversation_id,
                    active_users,
                    active_request,
                },
            );
        }

        InboundMessage::LeaveRoom { conversation_id } => {
            state.rooms.leave(&conversation_id, conn_id, &state.connections);
            reply(state, conn_id, OutboundEvent::RoomLeft { conversation_id });
        }

        InboundMessage::Typing { conversation_id, is_typing } => {
            let display_name_source = display_name_source(state, user_id).await;
            PresenceBroadcaster::new(&state.rooms, &state.connections).typing(
                &conversation_id,
                conn_id,
                user_id,
                &display_name_source,
                is_typing,
            );
        }

        InboundMessage::Abort { conversation_id } => {
            let success = coordinator(state).abort(&conversation_id, user_id);
            state.rooms.broadcast(
                &conversation_id,
                OutboundEvent::GenerationAborted {
                    conversation_id: conversation_id.clone(),
                    success,
                },
                None,
                &state.connections,
            );
        }

        InboundMessage::Chat {
            conversation_id,
            message_id,
            content,
            parent_branch_id,
            participant_id,
            responder_id,
            attachments,
            hidden_from_ai,
            sampling_branches,
        } => {
            let outcome = ops(state)
                .chat(
                    &conversation_id,
                    user_id,
                    conn_id,
                    message_id,
                    content,
                    parent_branch_id,
                    participant_id,
                    responder_id,
                    attachments,
                    hidden_from_ai,
                    sampling_branches.unwrap_or(1),
                )
                .await;
            handle_outcome(state, &conversation_id, user_id, conn_id, outcome);
        }

        InboundMessage::Continue {
            conversation_id,
            message_id: _,
            parent_branch_id,
            responder_id,
            sampling_branches,
        } => {
            let outcome = ops(state)
                .continue_(
                    &conversation_id,
                    user_id,
                    conn_id,
                    parent_branch_id,
                    responder_id,
                    sampling_branches.unwrap_or(1),
                )
                .await;
            handle_outcome(state, &conversation_id, user_id, conn_id, outcome);
        }

        InboundMessage::Regenerate {
            conversation_id,
            message_id,
            branch_id,
            parent_branch_id: _,
            sampling_branches,
        } => {
            let outcome = ops(state)
                .regenerate(
                    &conversation_id,
                    user_id,
                    conn_id,
                    message_id,
                    branch_id,
                    sampling_branches.unwrap_or(1),
                )
                .await;
            handle_outcome(state, &conversation_id, user_id, conn_id, outcome);
        }

        InboundMessage::Edit {
            conversation_id,
            message_id,
            branch_id,
            content,
            responder_id,
            skip_regeneration,
            sampling_branches,
        } => {
            let outcome = ops(state)
                .edit(
                    &conversation_id,
                    user_id,
                    conn_id,
                    message_id,
                    branch_id,
                    content,
                    responder_id,
                    skip_regeneration,
                    sampling_branches.unwrap_or(1),
                )
                .await;
            handle_outcome(state, &conversation_id, user_id, conn_id, outcome);
        }

        InboundMessage::Delete { conversation_id, message_id, branch_id } => {
            if let Err(e) = ops(state)
                .delete(&conversation_id, user_id, conn_id, message_id, branch_id)
                .await
            {
                reply_error(state, conn_id, &e);
            }
        }
    }
}

fn ops(state: &Arc<AppState>) -> ConversationOps<'_> {
    ConversationOps::new(
        state.store.as_ref(),
        &state.rooms,
        &state.connections,
        state.content_filter.as_ref(),
    )
}

fn coordinator(state: &Arc<AppState>) -> GenerationCoordinator<'_> {
    GenerationCoordinator {
        store: state.store.as_ref(),
        rooms: &state.rooms,
        connections: &state.connections,
        content_filter: state.content_filter.as_ref(),
        model_client: state.model_client.as_ref(),
        pricing: state.pricing.as_ref(),
        cancellation: &state.cancellation,
        cli_mode: state.cli_mode,
    }
}

fn handle_outcome(
    state: &Arc<AppState>,
    conversation_id: &ConversationId,
    user_id: &UserId,
    conn_id: &ConnId,
    outcome: braid_core::Result<braid_conversation::OpOutcome>,
) {
    match outcome {
        Ok(outcome) => spawn_if_generating(state, conversation_id, user_id, conn_id, outcome.next),
        Err(e) => reply_error(state, conn_id, &e),
    }
}

/// Spawns §4.8 generation as a detached task. `state` is cloned and moved
/// into the task so the borrowed-reference `GenerationCoordinator` can be
/// built from inside the `'static` future — the clone, not the caller's
/// borrow, is what the coordinator's lifetime is tied to.
fn spawn_if_generating(
    state: &Arc<AppState>,
    conversation_id: &ConversationId,
    user_id: &UserId,
    conn_id: &ConnId,
    next: NextStep,
) {
    let NextStep::Generate {
        responder_participant_id,
        assistant_message_id,
        assistant_branch_ids,
    } = next
    else {
        return;
    };

    let state = state.clone();
    let conversation_id = conversation_id.clone();
    let user_id = user_id.clone();
    let conn_id = conn_id.clone();

    tokio::spawn(async move {
        let result = coordinator(&state)
            .generate(
                &conversation_id,
                &user_id,
                &conn_id,
                &assistant_message_id,
                &assistant_branch_ids,
                responder_participant_id,
            )
            .await;

        if let Err(e) = result {
            warn!(%conversation_id, error = %e, "generation failed");
            state.rooms.broadcast(
                &conversation_id,
                OutboundEvent::Error {
                    code: ErrorCode::from(&e),
                    message: e.to_string(),
                    suggestion: None,
                },
                None,
                &state.connections,
            );
        }
    });
}

async fn display_name_source(state: &Arc<AppState>, user_id: &UserId) -> String {
    match state.store.get_user(user_id).await {
        Ok(user) => user.display_name,
        Err(_) => user_id.as_str().to_string(),
    }
}

fn reply(state: &Arc<AppState>, conn_id: &ConnId, event: OutboundEvent) {
    if let Some(handle) = state.connections.get(conn_id) {
        handle.send(SessionMessage::Event(event));
    }
}

fn reply_error(state: &Arc<AppState>, conn_id: &ConnId, error: &braid_core::BraidError) {
    reply(
        state,
        conn_id,
        OutboundEvent::Error {
            code: ErrorCode::from(error),
            message: error.to_string(),
            suggestion: None,
        },
    );
}
