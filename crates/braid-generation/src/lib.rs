pub mod cancellation;
pub mod coordinator;
pub mod error_classifier;
pub mod model_client;
pub mod pricing;

pub use cancellation::CancellationRegistry;
pub use coordinator::GenerationCoordinator;
pub use error_classifier::{classify, Classified};
pub use model_client::{
    MockModelClient, ModelClient, ModelError, ModelRequest, ModelStreamEvent, NormalizedMessage,
    SamplingSettings, Usage,
};
pub use pricing::{ModelPrice, Pricing, TablePricing};

#[cfg(test)]
mod tests {
    use super::*;
    use braid_conversation::system_prompt::CliModeConfig;
    use braid_core::types::{
        BranchRole, ConnId, ConversationFormat, ConversationId, MessageId, UserId, ROOT_BRANCH,
    };
    use braid_core::SimpleContentFilter;
    use braid_rooms::{ConnectionRegistry, RoomRegistry, SessionMessage};
    use braid_store::memory::InMemoryStore;
    use braid_store::types::{Conversation, ConversationSettings, NewBranch, User};
    use braid_store::BranchStore;
    use tokio::sync::mpsc;

    fn seed_conversation(store: &InMemoryStore, owner: &UserId, model: &str) -> ConversationId {
        let id = ConversationId::new();
        let now = chrono::Utc::now();
        store.insert_conversation(Conversation {
            id: id.clone(),
            owner: owner.clone(),
            title: "test".to_string(),
            model: model.to_string(),
            format: ConversationFormat::Standard,
            settings: ConversationSettings::default(),
            archived: false,
            created_at: now,
            updated_at: now,
        });
        id
    }

    fn new_branch(role: BranchRole, parent: &str, content: &str) -> NewBranch {
        NewBranch {
            parent_branch_id: parent.to_string(),
            content: content.to_string(),
            content_blocks: None,
            role,
            participant_id: None,
            model: None,
            hidden_from_ai: false,
            private_to_user_id: None,
            attachments: vec![],
        }
    }

    #[tokio::test]
    async fn generate_streams_and_persists_a_completed_branch() {
        let store = InMemoryStore::new();
        let rooms = RoomRegistry::new();
        let connections = ConnectionRegistry::new();

        let owner = UserId::new();
        store.insert_user(User {
            id: owner.clone(),
            username: "owner".to_string(),
            display_name: "Owner".to_string(),
            has_overspend_capability: false,
        });
        let conversation_id = seed_conversation(&store, &owner, "gpt/test");

        let root = store
            .create_message(&conversation_id, new_branch(BranchRole::User, ROOT_BRANCH, "hello"))
            .await
            .unwrap();
        let assistant = store
            .create_message(
                &conversation_id,
                new_branch(BranchRole::Assistant, root.active_branch_id.as_str(), ""),
            )
            .await
            .unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        let conn_id = ConnId::new();
        connections.register(conn_id.clone(), owner.clone(), tx);
        rooms.join(&conversation_id, &conn_id, &connections);

        let cancellation = CancellationRegistry::new();
        let content_filter = SimpleContentFilter::new(vec![]);
        let model_client = MockModelClient::new(
            vec!["hel", "lo!"],
            Usage {
                tokens_in: 5,
                tokens_out: 2,
            },
        );
        let pricing = TablePricing::new().with_price(
            "gpt/test",
            ModelPrice {
                input_per_million: 1.0,
                output_per_million: 2.0,
            },
        );

        let coordinator = GenerationCoordinator {
            store: &store,
            rooms: &rooms,
            connections: &connections,
            content_filter: &content_filter,
            model_client: &model_client,
            pricing: &pricing,
            cancellation: &cancellation,
            cli_mode: CliModeConfig {
                enabled: true,
                message_threshold: 10,
            },
        };

        coordinator
            .generate(
                &conversation_id,
                &owner,
                &conn_id,
                &assistant.id,
                &[assistant.active_branch_id.clone()],
                None,
            )
            .await
            .unwrap();

        let persisted = store.get_message(&assistant.id).await.unwrap();
        assert_eq!(persisted.active_branch().unwrap().content, "hello!");
        assert!(rooms.active_request(&conversation_id).is_none());
    }

    #[tokio::test]
    async fn generate_queues_when_a_request_is_already_in_flight() {
        let store = InMemoryStore::new();
        let rooms = RoomRegistry::new();
        let connections = ConnectionRegistry::new();

        let owner = UserId::new();
        store.insert_user(User {
            id: owner.clone(),
            username: "owner2".to_string(),
            display_name: "Owner2".to_string(),
            has_overspend_capability: false,
        });
        let conversation_id = seed_conversation(&store, &owner, "gpt/test");
        let existing_message_id = MessageId::new();
        assert!(rooms.start_ai_request(&conversation_id, &owner, &existing_message_id));

        let root = store
            .create_message(&conversation_id, new_branch(BranchRole::User, ROOT_BRANCH, "hi"))
            .await
            .unwrap();
        let assistant = store
            .create_message(
                &conversation_id,
                new_branch(BranchRole::Assistant, root.active_branch_id.as_str(), ""),
            )
            .await
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn_id = ConnId::new();
        connections.register(conn_id.clone(), owner.clone(), tx);
        rooms.join(&conversation_id, &conn_id, &connections);

        let cancellation = CancellationRegistry::new();
        let content_filter = SimpleContentFilter::new(vec![]);
        let model_client = MockModelClient::new(vec!["unused"], Usage::default());
        let pricing = TablePricing::new();
        let coordinator = GenerationCoordinator {
            store: &store,
            rooms: &rooms,
            connections: &connections,
            content_filter: &content_filter,
            model_client: &model_client,
            pricing: &pricing,
            cancellation: &cancellation,
            cli_mode: CliModeConfig {
                enabled: true,
                message_threshold: 10,
            },
        };

        coordinator
            .generate(
                &conversation_id,
                &owner,
                &conn_id,
                &assistant.id,
                &[assistant.active_branch_id.clone()],
                None,
            )
            .await
            .unwrap();

        let mut saw_queued = false;
        while let Ok(msg) = rx.try_recv() {
            if let SessionMessage::Event(braid_protocol::OutboundEvent::AiRequestQueued { .. }) = msg {
                saw_queued = true;
            }
        }
        assert!(saw_queued);
    }

    #[tokio::test]
    async fn cancelled_branch_is_persisted_with_partial_text_and_marked_aborted() {
        let store = InMemoryStore::new();
        let rooms = RoomRegistry::new();
        let connections = ConnectionRegistry::new();

        let owner = UserId::new();
        store.insert_user(User {
            id: owner.clone(),
            username: "owner3".to_string(),
            display_name: "Owner3".to_string(),
            has_overspend_capability: false,
        });
        let conversation_id = seed_conversation(&store, &owner, "gpt/test");

        let root = store
            .create_message(&conversation_id, new_branch(BranchRole::User, ROOT_BRANCH, "hi"))
            .await
            .unwrap();
        let assistant = store
            .create_message(
                &conversation_id,
                new_branch(BranchRole::Assistant, root.active_branch_id.as_str(), ""),
            )
            .await
            .unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        let conn_id = ConnId::new();
        connections.register(conn_id.clone(), owner.clone(), tx);
        rooms.join(&conversation_id, &conn_id, &connections);

        let cancellation = CancellationRegistry::new();
        let content_filter = SimpleContentFilter::new(vec![]);
        let model_client = MockModelClient::failing("upstream request aborted by client");
        let pricing = TablePricing::new();
        let coordinator = GenerationCoordinator {
            store: &store,
            rooms: &rooms,
            connections: &connections,
            content_filter: &content_filter,
            model_client: &model_client,
            pricing: &pricing,
            cancellation: &cancellation,
            cli_mode: CliModeConfig {
                enabled: true,
                message_threshold: 10,
            },
        };

        coordinator
            .generate(
                &conversation_id,
                &owner,
                &conn_id,
                &assistant.id,
                &[assistant.active_branch_id.clone()],
                None,
            )
            .await
            .unwrap();

        assert!(rooms.active_request(&conversation_id).is_none());
    }
}
