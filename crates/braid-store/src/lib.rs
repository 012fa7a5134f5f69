pub mod error;
pub mod memory;
pub mod projection;
pub mod sqlite;
pub mod store;
pub mod types;

pub use error::{Result, StoreError};
pub use memory::InMemoryStore;
pub use projection::{project, ProjectionCache, VisibleStep};
pub use sqlite::SqliteStore;
pub use store::BranchStore;

#[cfg(test)]
mod tests {
    use super::*;
    use braid_core::types::{BranchRole, ConversationFormat, UserId};
    use types::{Conversation, ConversationSettings, NewBranch};

    fn conversation(id: braid_core::types::ConversationId, owner: UserId) -> Conversation {
        Conversation {
            id,
            owner,
            title: "test".into(),
            model: "test-model".into(),
            format: ConversationFormat::Standard,
            settings: ConversationSettings::default(),
            archived: false,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn create_message_then_branch_appends_sibling() {
        let store = InMemoryStore::new();
        let user = UserId::new();
        let conv_id = braid_core::types::ConversationId::new();
        store.insert_conversation(conversation(conv_id.clone(), user.clone()));

        let msg = store
            .create_message(
                &conv_id,
                NewBranch {
                    parent_branch_id: braid_core::types::ROOT_BRANCH.to_string(),
                    content: "hi".into(),
                    content_blocks: None,
                    role: BranchRole::User,
                    participant_id: None,
                    model: None,
                    hidden_from_ai: false,
                    private_to_user_id: None,
                    attachments: vec![],
                },
            )
            .await
            .unwrap();
        assert_eq!(msg.branches.len(), 1);

        let sibling = store
            .add_message_branch(
                &msg.id,
                NewBranch {
                    parent_branch_id: braid_core::types::ROOT_BRANCH.to_string(),
                    content: "hi again".into(),
                    content_blocks: None,
                    role: BranchRole::User,
                    participant_id: None,
                    model: None,
                    hidden_from_ai: false,
                    private_to_user_id: None,
                    attachments: vec![],
                },
            )
            .await
            .unwrap();

        let reloaded = store.get_message(&msg.id).await.unwrap();
        assert_eq!(reloaded.branches.len(), 2);
        assert_eq!(reloaded.active_branch_id, sibling.id);
    }

    #[tokio::test]
    async fn delete_only_branch_removes_message() {
        let store = InMemoryStore::new();
        let user = UserId::new();
        let conv_id = braid_core::types::ConversationId::new();
        store.insert_conversation(conversation(conv_id.clone(), user.clone()));

        let msg = store
            .create_message(
                &conv_id,
                NewBranch {
                    parent_branch_id: braid_core::types::ROOT_BRANCH.to_string(),
                    content: "hi".into(),
                    content_blocks: None,
                    role: BranchRole::User,
                    participant_id: None,
                    model: None,
                    hidden_from_ai: false,
                    private_to_user_id: None,
                    attachments: vec![],
                },
            )
            .await
            .unwrap();

        let deleted = store
            .delete_message_branch(&msg.id, &msg.active_branch_id, &user)
            .await
            .unwrap();
        assert_eq!(deleted, vec![msg.id.clone()]);
        assert!(store.get_message(&msg.id).await.is_err());
    }

    #[tokio::test]
    async fn version_bumps_on_mutation() {
        let store = InMemoryStore::new();
        let user = UserId::new();
        let conv_id = braid_core::types::ConversationId::new();
        store.insert_conversation(conversation(conv_id.clone(), user));
        let v0 = store.version(&conv_id).await.unwrap();

        store
            .create_message(
                &conv_id,
                NewBranch {
                    parent_branch_id: braid_core::types::ROOT_BRANCH.to_string(),
                    content: "hi".into(),
                    content_blocks: None,
                    role: BranchRole::User,
                    participant_id: None,
                    model: None,
                    hidden_from_ai: false,
                    private_to_user_id: None,
                    attachments: vec![],
                },
            )
            .await
            .unwrap();

        let v1 = store.version(&conv_id).await.unwrap();
        assert!(v1 > v0);
    }
}
