use std::collections::VecDeque;
use std::time::Duration;

use braid_core::types::ConversationId;
use braid_protocol::{InboundMessage, OutboundEvent};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::backoff::{self, MAX_ATTEMPTS};
use crate::state::{ClientEvent, ConnectionState};

/// How often the client sends an application-level `ping` while connected
/// (spec §4.11).
const PING_INTERVAL: Duration = Duration::from_secs(15);
/// Voluntary close if no server frame (including pongs) arrives for this long.
const SILENCE_TIMEOUT: Duration = Duration::from_secs(45);
/// How often the silence watchdog checks elapsed time; must be smaller than
/// [`SILENCE_TIMEOUT`] to catch it promptly.
const WATCHDOG_TICK: Duration = Duration::from_secs(5);
/// Delay between a visibility-triggered reconnect completing and the
/// automatic re-join of the last room, per spec §4.11's "after a short
/// settle delay".
const VISIBILITY_SETTLE_DELAY: Duration = Duration::from_millis(250);

enum Command {
    Send(InboundMessage),
    JoinRoom(ConversationId),
    VisibilityResumed,
    Close,
}

/// Handle to a running client connection. Cloning is cheap; every clone
/// shares the same underlying actor task via its command channel, the way
/// the teacher's `Channel` adapters are driven through a handle rather than
/// touched directly (`skynet-channels::manager::ChannelManager`).
#[derive(Clone)]
pub struct ClientSession {
    commands: mpsc::UnboundedSender<Command>,
}

impl ClientSession {
    /// Spawn the actor task and return a handle plus its event receiver.
    /// The caller drives nothing else — reconnection, backoff, keepalive,
    /// and buffering all happen inside the spawned task.
    pub fn connect(url: String) -> (ClientSession, mpsc::UnboundedReceiver<ClientEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        tokio::spawn(run(url, cmd_rx, event_tx));
        (ClientSession { commands: cmd_tx }, event_rx)
    }

    /// Enqueue a frame to send. Buffered if not currently connected, sent
    /// immediately otherwise.
    pub fn send(&self, message: InboundMessage) {
        let _ = self.commands.send(Command::Send(message));
    }

    /// Idempotent: no-op if `id` is already the last joined room. Otherwise
    /// leaves the previous room (if any) before joining the new one.
    pub fn join_room(&self, id: ConversationId) {
        let _ = self.commands.send(Command::JoinRoom(id));
    }

    /// Notify the session that the embedding app became visible again. A
    /// no-op while already connected; while disconnected or backing off it
    /// resets the attempt counter and reconnects immediately.
    pub fn notify_visible(&self) {
        let _ = self.commands.send(Command::VisibilityResumed);
    }

    /// Intentional disconnect. The actor closes the socket and exits
    /// without scheduling a reconnect.
    pub fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }
}

async fn run(
    url: String,
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<ClientEvent>,
) {
    let mut state = ConnectionState::Disconnected;
    let mut attempt: u32 = 0;
    let mut outbound: VecDeque<InboundMessage> = VecDeque::new();
    let mut last_room: Option<ConversationId> = None;
    let mut woken_by_visibility = false;

    let emit_state = |events: &mpsc::UnboundedSender<ClientEvent>, s: ConnectionState| {
        let _ = events.send(ClientEvent::StateChanged(s));
    };

    loop {
        match state {
            ConnectionState::Disconnected | ConnectionState::Reconnecting => {
                state = ConnectionState::Connecting;
                emit_state(&events, state);

                match tokio_tungstenite::connect_async(&url).await {
                    Ok((ws, _response)) => {
                        attempt = 0;
                        state = ConnectionState::Connected;
                        emit_state(&events, state);

                        let settle = woken_by_visibility;
                        woken_by_visibility = false;

                        match run_connected(
                            ws,
                            &mut commands,
                            &events,
                            &mut outbound,
                            &mut last_room,
                            settle,
                        )
                        .await
                        {
                            ConnectedExit::Intentional => {
                                state = ConnectionState::Disconnected;
                                emit_state(&events, state);
                                return;
                            }
                            ConnectedExit::Dropped => {
                                state = ConnectionState::Reconnecting;
                                emit_state(&events, state);
                            }
                        }
                    }
                    Err(error) => {
                        attempt += 1;
                        if attempt >= MAX_ATTEMPTS {
                            tracing::warn!(%error, attempt, "giving up after repeated connect failures");
                            state = ConnectionState::Failed;
                            emit_state(&events, state);
                            continue;
                        }

                        let delay = backoff::delay_for(attempt);
                        tracing::warn!(%error, attempt, ?delay, "connect failed, backing off");
                        match wait_or_wake(&mut commands, delay, &mut outbound, &mut last_room).await
                        {
                            WaitOutcome::Shutdown => return,
                            WaitOutcome::WokenByVisibility => {
                                attempt = 0;
                                woken_by_visibility = true;
                            }
                            WaitOutcome::Elapsed => {}
                        }
                        state = ConnectionState::Reconnecting;
                        emit_state(&events, state);
                    }
                }
            }
            ConnectionState::Failed => {
                match commands.recv().await {
                    Some(Command::VisibilityResumed) => {
                        attempt = 0;
                        woken_by_visibility = true;
                        state = ConnectionState::Reconnecting;
                        emit_state(&events, state);
                    }
                    Some(Command::Close) | None => return,
                    Some(Command::Send(msg)) => outbound.push_back(msg),
                    Some(Command::JoinRoom(id)) => {
                        enqueue_join_room(&mut outbound, &mut last_room, id)
                    }
                }
            }
            ConnectionState::Connecting | ConnectionState::Connected => unreachable!(),
        }
    }
}

enum WaitOutcome {
    /// The backoff delay elapsed naturally.
    Elapsed,
    /// A visibility-resume signal cut the wait short; reset the attempt
    /// counter and apply the settle-before-rejoin behavior on reconnect.
    WokenByVisibility,
    /// The caller closed the session; stop retrying entirely.
    Shutdown,
}

/// Sleep for `delay`, but wake early on [`Command::VisibilityResumed`] or
/// [`Command::Close`]. Plain `Send`/`JoinRoom` commands arriving mid-backoff
/// are buffered and the sleep continues.
async fn wait_or_wake(
    commands: &mut mpsc::UnboundedReceiver<Command>,
    delay: Duration,
    outbound: &mut VecDeque<InboundMessage>,
    last_room: &mut Option<ConversationId>,
) -> WaitOutcome {
    let deadline = Instant::now() + delay;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return WaitOutcome::Elapsed;
        }
        tokio::select! {
            _ = tokio::time::sleep(remaining) => return WaitOutcome::Elapsed,
            cmd = commands.recv() => match cmd {
                Some(Command::VisibilityResumed) => return WaitOutcome::WokenByVisibility,
                Some(Command::Close) | None => return WaitOutcome::Shutdown,
                Some(Command::Send(msg)) => outbound.push_back(msg),
                Some(Command::JoinRoom(id)) => enqueue_join_room(outbound, last_room, id),
            },
        }
    }
}

fn enqueue_join_room(
    outbound: &mut VecDeque<InboundMessage>,
    last_room: &mut Option<ConversationId>,
    id: ConversationId,
) {
    if last_room.as_ref() == Some(&id) {
        return;
    }
    if let Some(old) = last_room.take() {
        outbound.push_back(InboundMessage::LeaveRoom {
            conversation_id: old,
        });
    }
    outbound.push_back(InboundMessage::JoinRoom {
        conversation_id: id.clone(),
    });
    *last_room = Some(id);
}

enum ConnectedExit {
    /// Caller asked to close; do not reconnect.
    Intentional,
    /// Socket dropped, server closed, or the silence watchdog fired.
    Dropped,
}

async fn run_connected(
    ws: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    events: &mpsc::UnboundedSender<ClientEvent>,
    outbound: &mut VecDeque<InboundMessage>,
    last_room: &mut Option<ConversationId>,
    settle_before_rejoin: bool,
) -> ConnectedExit {
    let (mut sink, mut stream) = ws.split();

    if settle_before_rejoin {
        tokio::time::sleep(VISIBILITY_SETTLE_DELAY).await;
        if let Some(room) = last_room.clone() {
            outbound.push_back(InboundMessage::JoinRoom {
                conversation_id: room,
            });
        }
    } else if let Some(room) = last_room.clone() {
        outbound.push_back(InboundMessage::JoinRoom {
            conversation_id: room,
        });
    }

    while let Some(frame) = outbound.pop_front() {
        if send_frame(&mut sink, &frame).await.is_err() {
            requeue_front(outbound, frame);
            return ConnectedExit::Dropped;
        }
    }

    let mut ping_ticker = tokio::time::interval(PING_INTERVAL);
    ping_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut watchdog_ticker = tokio::time::interval(WATCHDOG_TICK);
    watchdog_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last_frame_at = Instant::now();

    loop {
        tokio::select! {
            cmd = commands.recv() => match cmd {
                Some(Command::Send(msg)) => {
                    if send_frame(&mut sink, &msg).await.is_err() {
                        outbound.push_back(msg);
                        return ConnectedExit::Dropped;
                    }
                }
                Some(Command::JoinRoom(id)) => {
                    let mut pending = VecDeque::new();
                    enqueue_join_room(&mut pending, last_room, id);
                    while let Some(frame) = pending.pop_front() {
                        if send_frame(&mut sink, &frame).await.is_err() {
                            outbound.extend(pending);
                            outbound.push_back(frame);
                            return ConnectedExit::Dropped;
                        }
                    }
                }
                Some(Command::VisibilityResumed) => {
                    tracing::trace!("visibility-resumed ignored while already connected");
                }
                Some(Command::Close) | None => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    return ConnectedExit::Intentional;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => {
                    last_frame_at = Instant::now();
                    match serde_json::from_str::<OutboundEvent>(&text) {
                        Ok(event) => {
                            let _ = events.send(ClientEvent::Frame(event));
                        }
                        Err(error) => {
                            tracing::warn!(%error, "could not decode server frame");
                        }
                    }
                }
                Some(Ok(WsMessage::Pong(_))) | Some(Ok(WsMessage::Ping(_))) => {
                    last_frame_at = Instant::now();
                }
                Some(Ok(WsMessage::Close(_))) | None => return ConnectedExit::Dropped,
                Some(Ok(_)) => {}
                Some(Err(error)) => {
                    tracing::warn!(%error, "websocket read error");
                    return ConnectedExit::Dropped;
                }
            },
            _ = ping_ticker.tick() => {
                if send_frame(&mut sink, &InboundMessage::Ping).await.is_err() {
                    return ConnectedExit::Dropped;
                }
            }
            _ = watchdog_ticker.tick() => {
                if last_frame_at.elapsed() > SILENCE_TIMEOUT {
                    tracing::warn!("no server frame in {:?}, closing voluntarily", SILENCE_TIMEOUT);
                    let _ = sink.send(WsMessage::Close(None)).await;
                    return ConnectedExit::Dropped;
                }
            }
        }
    }
}

fn requeue_front(outbound: &mut VecDeque<InboundMessage>, frame: InboundMessage) {
    outbound.push_front(frame);
}

async fn send_frame<S>(
    sink: &mut futures_util::stream::SplitSink<S, WsMessage>,
    message: &InboundMessage,
) -> Result<(), ()>
where
    S: futures_util::Sink<WsMessage> + Unpin,
{
    let text = serde_json::to_string(message).map_err(|_| ())?;
    sink.send(WsMessage::Text(text)).await.map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_room_is_idempotent() {
        let mut outbound = VecDeque::new();
        let mut last_room = None;
        let id = ConversationId::new();

        enqueue_join_room(&mut outbound, &mut last_room, id.clone());
        enqueue_join_room(&mut outbound, &mut last_room, id.clone());

        assert_eq!(outbound.len(), 1);
        assert_eq!(last_room, Some(id));
    }

    #[test]
    fn switching_rooms_leaves_the_old_one_first() {
        let mut outbound = VecDeque::new();
        let mut last_room = None;
        let first = ConversationId::new();
        let second = ConversationId::new();

        enqueue_join_room(&mut outbound, &mut last_room, first.clone());
        outbound.clear(); // pretend the first join was already flushed
        enqueue_join_room(&mut outbound, &mut last_room, second.clone());

        assert_eq!(outbound.len(), 2);
        match &outbound[0] {
            InboundMessage::LeaveRoom { conversation_id } => assert_eq!(conversation_id, &first),
            other => panic!("expected LeaveRoom, got {other:?}"),
        }
        match &outbound[1] {
            InboundMessage::JoinRoom { conversation_id } => assert_eq!(conversation_id, &second),
            other => panic!("expected JoinRoom, got {other:?}"),
        }
        assert_eq!(last_room, Some(second));
    }
}
