use std::sync::Arc;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use braid_core::config::MAX_PAYLOAD_BYTES;
use braid_core::types::ConnId;
use braid_protocol::{InboundMessage, OutboundEvent};
use braid_rooms::SessionMessage;
use braid_store::types::User;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::app::AppState;
use crate::ws::dispatch;

/// Query params carried on the WS handshake URL (spec §6). `token` is the
/// gateway's own shared secret, checked against `config.gateway.auth_token`;
/// `user` names the already-authenticated identity an outer HTTP layer
/// would normally forward (spec §1's outer auth is out of scope here, so we
/// just resolve it by username).
#[derive(Debug, Deserialize)]
pub struct HandshakeParams {
    token: Option<String>,
    user: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HandshakeParams>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state, params))
}

async fn handle_connection(socket: WebSocket, state: Arc<AppState>, params: HandshakeParams) {
    let user = match authenticate(&state, &params).await {
        Ok(user) => user,
        Err(reason) => {
            warn!(%reason, "WS handshake rejected");
            close_with_policy_violation(socket, &reason).await;
            return;
        }
    };

    let conn_id = ConnId::new();
    info!(%conn_id, user_id = %user.id, "WS connection established");

    let (mut sink, mut stream) = socket.split();
    let (tx, mut session_rx) = mpsc::unbounded_channel();
    state.connections.register(conn_id.clone(), user.id.clone(), tx);

    if send_event(&mut sink, &OutboundEvent::Connected).await.is_err() {
        state.connections.unregister(&conn_id, &state.rooms);
        return;
    }

    loop {
        tokio::select! {
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if text.len() > MAX_PAYLOAD_BYTES {
                            warn!(%conn_id, size = text.len(), "payload too large, closing");
                            break;
                        }
                        match serde_json::from_str::<InboundMessage>(&text) {
                            Ok(msg) => dispatch::dispatch(&state, &user.id, &conn_id, msg).await,
                            Err(e) => {
                                let _ = send_event(
                                    &mut sink,
                                    &OutboundEvent::Error {
                                        code: braid_protocol::ErrorCode::InvalidInput,
                                        message: format!("malformed frame: {e}"),
                                        suggestion: None,
                                    },
                                )
                                .await;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        if let Some(handle) = state.connections.get(&conn_id) {
                            handle.mark_alive();
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(%conn_id, error = %e, "WS read error, closing");
                        break;
                    }
                    _ => {}
                }
            }

            outgoing = session_rx.recv() => {
                match outgoing {
                    Some(SessionMessage::Event(event)) => {
                        if send_event(&mut sink, &event).await.is_err() {
                            break;
                        }
                    }
                    Some(SessionMessage::Probe) => {
                        if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                            break;
                        }
                    }
                    Some(SessionMessage::Close) | None => break,
                }
            }
        }
    }

    state.connections.unregister(&conn_id, &state.rooms);
    info!(%conn_id, "WS connection closed");
}

async fn authenticate(state: &AppState, params: &HandshakeParams) -> Result<User, String> {
    if let Some(expected) = &state.config.gateway.auth_token {
        match &params.token {
            Some(token) if token == expected => {}
            _ => return Err("invalid token".to_string()),
        }
    }

    let username = params
        .user
        .as_deref()
        .ok_or_else(|| "missing user".to_string())?;
    state
        .store
        .get_user_by_username(username)
        .await
        .map_err(|e| e.to_string())
}

async fn close_with_policy_violation(mut socket: WebSocket, reason: &str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: 1008,
            reason: reason.to_string().into(),
        })))
        .await;
}

async fn send_event(
    sink: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    event: &OutboundEvent,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(event).unwrap_or_default();
    sink.send(Message::Text(json.into()))
        .await
        .map_err(axum::Error::new)
}
