use std::sync::Arc;
use std::time::Duration;

use braid_client::{ClientEvent, ClientSession};
use braid_conversation::system_prompt::CliModeConfig;
use braid_core::config::{BraidConfig, DatabaseConfig, GatewayConfig, GenerationConfig};
use braid_core::types::{ConversationFormat, ConversationId, MessageId, UserId};
use braid_core::SimpleContentFilter;
use braid_generation::{
    CancellationRegistry, ModelClient, ModelError, ModelRequest, ModelStreamEvent, MockModelClient,
    ModelPrice, TablePricing, Usage,
};
use braid_protocol::{InboundMessage, OutboundEvent};
use braid_rooms::{ConnectionRegistry, RoomRegistry};
use braid_store::memory::InMemoryStore;
use braid_store::types::{Conversation, ConversationSettings, User};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

use crate::app::{build_router, AppState};

/// A `ModelClient` that sleeps before producing its chunks — long enough for
/// a second inbound frame to arrive while the first generation is still
/// admitted, so single-flight queuing tests aren't a race against an
/// instantaneous mock.
struct SlowModelClient {
    delay: Duration,
    chunks: Vec<&'static str>,
}

#[async_trait::async_trait]
impl ModelClient for SlowModelClient {
    async fn stream(
        &self,
        _request: ModelRequest,
        _cancel: CancellationToken,
        tx: mpsc::Sender<ModelStreamEvent>,
    ) -> Result<Usage, ModelError> {
        tokio::time::sleep(self.delay).await;
        for chunk in &self.chunks {
            let _ = tx
                .send(ModelStreamEvent::Delta { text: chunk.to_string(), blocks: None })
                .await;
        }
        Ok(Usage::default())
    }
}

async fn spawn_server(state: AppState) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = build_router(Arc::new(state));
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    addr
}

fn seed_user_and_conversation(
    store: &InMemoryStore,
    username: &str,
    model: &str,
) -> (UserId, ConversationId) {
    let user_id = UserId::new();
    store.insert_user(User {
        id: user_id.clone(),
        username: username.to_string(),
        display_name: username.to_string(),
        has_overspend_capability: false,
    });
    let conversation_id = ConversationId::new();
    let now = chrono::Utc::now();
    store.insert_conversation(Conversation {
        id: conversation_id.clone(),
        owner: user_id.clone(),
        title: "test".to_string(),
        model: model.to_string(),
        format: ConversationFormat::Standard,
        settings: ConversationSettings::default(),
        archived: false,
        created_at: now,
        updated_at: now,
    });
    (user_id, conversation_id)
}

/// Drains `rx` until a frame matching `matches` arrives, ignoring
/// state-change events and any frame that doesn't match along the way.
async fn recv_frame_until<F>(rx: &mut UnboundedReceiver<ClientEvent>, mut matches: F) -> OutboundEvent
where
    F: FnMut(&OutboundEvent) -> bool,
{
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed");
        if let ClientEvent::Frame(frame) = event {
            if matches(&frame) {
                return frame;
            }
        }
    }
}

fn test_state(store: InMemoryStore, model_client: impl ModelClient + 'static, pricing: TablePricing) -> AppState {
    AppState {
        config: BraidConfig {
            gateway: GatewayConfig {
                port: 0,
                bind: "127.0.0.1".to_string(),
                auth_token: None,
            },
            database: DatabaseConfig::default(),
            generation: GenerationConfig::default(),
            pricing: Default::default(),
        },
        connections: ConnectionRegistry::new(),
        rooms: RoomRegistry::new(),
        cancellation: CancellationRegistry::new(),
        store: Arc::new(store),
        content_filter: Arc::new(SimpleContentFilter::new(vec![])),
        model_client: Arc::new(model_client),
        pricing: Arc::new(pricing),
        cli_mode: CliModeConfig {
            enabled: true,
            message_threshold: 10,
        },
    }
}

/// End-to-end: a `chat` frame creates the user message, admits a generation,
/// streams the mocked completion to a single terminal `stream{done:true}`,
/// and publishes the resulting metrics — spec §4.6/§4.8's full round trip.
#[tokio::test]
async fn chat_triggers_generation_and_streams_to_completion() {
    let store = InMemoryStore::new();
    let (_user_id, conversation_id) = seed_user_and_conversation(&store, "alice", "mock/test");

    let state = test_state(
        store,
        MockModelClient::new(vec!["Hel", "lo!"], Usage { tokens_in: 3, tokens_out: 2 }),
        TablePricing::new().with_price(
            "mock/test",
            ModelPrice {
                input_per_million: 1.0,
                output_per_million: 1.0,
            },
        ),
    );

    let addr = spawn_server(state).await;
    let (session, mut events) = ClientSession::connect(format!("ws://{addr}/ws?user=alice"));

    recv_frame_until(&mut events, |e| matches!(e, OutboundEvent::Connected)).await;

    session.join_room(conversation_id.clone());
    recv_frame_until(&mut events, |e| matches!(e, OutboundEvent::RoomJoined { .. })).await;

    session.send(InboundMessage::Chat {
        conversation_id: conversation_id.clone(),
        message_id: MessageId::new(),
        content: "hi there".to_string(),
        parent_branch_id: None,
        participant_id: None,
        responder_id: None,
        attachments: vec![],
        hidden_from_ai: false,
        sampling_branches: None,
    });

    recv_frame_until(&mut events, |e| matches!(e, OutboundEvent::MessageCreated { .. })).await;
    recv_frame_until(&mut events, |e| matches!(e, OutboundEvent::AiGenerating { .. })).await;

    let done = recv_frame_until(&mut events, |e| matches!(e, OutboundEvent::Stream { done: true, .. })).await;
    match done {
        OutboundEvent::Stream { content, aborted, usage, .. } => {
            assert_eq!(content, "Hello!");
            assert!(!aborted);
            assert!(usage.is_some());
        }
        _ => unreachable!(),
    }

    recv_frame_until(&mut events, |e| matches!(e, OutboundEvent::MetricsUpdate { .. })).await;
    recv_frame_until(&mut events, |e| matches!(e, OutboundEvent::AiFinished { .. })).await;

    session.close();
}

/// A second `chat` sent while a generation is in flight gets bounced with
/// `ai_request_queued` rather than starting a second generation — the
/// single-flight guarantee of spec §4.2, exercised end to end over the wire.
#[tokio::test]
async fn concurrent_chat_is_queued_not_started() {
    let store = InMemoryStore::new();
    let (_user_id, conversation_id) = seed_user_and_conversation(&store, "bob", "mock/test");

    let state = test_state(
        store,
        SlowModelClient { delay: Duration::from_millis(300), chunks: vec!["a", "b", "c"] },
        TablePricing::new(),
    );

    let addr = spawn_server(state).await;
    let (session, mut events) = ClientSession::connect(format!("ws://{addr}/ws?user=bob"));
    recv_frame_until(&mut events, |e| matches!(e, OutboundEvent::Connected)).await;
    session.join_room(conversation_id.clone());
    recv_frame_until(&mut events, |e| matches!(e, OutboundEvent::RoomJoined { .. })).await;

    session.send(InboundMessage::Chat {
        conversation_id: conversation_id.clone(),
        message_id: MessageId::new(),
        content: "first".to_string(),
        parent_branch_id: None,
        participant_id: None,
        responder_id: None,
        attachments: vec![],
        hidden_from_ai: false,
        sampling_branches: None,
    });
    recv_frame_until(&mut events, |e| matches!(e, OutboundEvent::AiGenerating { .. })).await;

    session.send(InboundMessage::Continue {
        conversation_id: conversation_id.clone(),
        message_id: MessageId::new(),
        parent_branch_id: None,
        responder_id: None,
        sampling_branches: None,
    });

    recv_frame_until(&mut events, |e| matches!(e, OutboundEvent::AiRequestQueued { .. })).await;

    session.close();
}

/// A handshake naming an unknown user is refused — the gateway never sends
/// `connected` and closes the socket instead (spec §6).
#[tokio::test]
async fn unknown_username_never_reaches_connected() {
    let store = InMemoryStore::new();
    let state = test_state(store, MockModelClient::new(vec![], Usage::default()), TablePricing::new());

    let addr = spawn_server(state).await;
    let (_session, mut events) = ClientSession::connect(format!("ws://{addr}/ws?user=nobody"));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(200), events.recv()).await {
            Ok(Some(ClientEvent::Frame(OutboundEvent::Connected))) => {
                panic!("unauthenticated handshake should never reach connected")
            }
            Ok(Some(_)) => {}
            Ok(None) => break,
            Err(_) => continue,
        }
    }
}
