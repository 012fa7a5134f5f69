use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use braid_core::types::{BranchId, ConversationId, MessageId, UserId};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::instrument;

use crate::error::{Result, StoreError};
use crate::store::BranchStore;
use crate::types::{
    ApiKeyRecord, Branch, BranchMetaPatch, Conversation, GrantSummary, Message, Metrics,
    NewBranch, Participant, UiState, User,
};

/// Initialise the braidchat schema. Safe to call on every startup.
///
/// Messages and branches are stored as JSON blobs next to their indexed
/// identity columns — the tree shape and content-block payloads are rich
/// enough that a fully-normalized schema buys little, and this keeps the
/// read/write path a single row each way, matching the teacher's
/// upsert-then-read-back style.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS conversations (
            id         TEXT PRIMARY KEY,
            data       TEXT NOT NULL,
            version    INTEGER NOT NULL DEFAULT 0
        );
        CREATE TABLE IF NOT EXISTS participants (
            conversation_id TEXT NOT NULL,
            data            TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_participants_conv ON participants(conversation_id);
        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL,
            msg_order       INTEGER NOT NULL,
            data            TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_messages_conv ON messages(conversation_id, msg_order);
        CREATE TABLE IF NOT EXISTS users (
            id       TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            data     TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS api_keys (
            user_id  TEXT NOT NULL,
            provider TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS grants (
            user_id  TEXT PRIMARY KEY,
            data     TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS overspend_capability (
            user_id TEXT PRIMARY KEY,
            allowed INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS metrics (
            conversation_id TEXT NOT NULL,
            data            TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS ui_state (
            user_id         TEXT NOT NULL,
            conversation_id TEXT NOT NULL,
            data            TEXT NOT NULL,
            PRIMARY KEY (user_id, conversation_id)
        );",
    )?;
    Ok(())
}

/// `rusqlite::Connection` wrapped in a `Mutex`, following
/// `skynet-sessions::manager::SessionManager`. One connection is plenty for
/// a single-node deployment; mutating calls are offloaded to
/// `spawn_blocking` so they don't stall the async runtime.
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let conn = db.lock().expect("sqlite connection mutex poisoned");
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::NotFound(format!("blocking task join error: {e}")))?
    }
}

#[async_trait]
impl BranchStore for SqliteStore {
    #[instrument(skip(self))]
    async fn get_conversation(&self, id: &ConversationId) -> Result<Conversation> {
        let id = id.clone();
        self.with_conn(move |conn| {
            let data: String = conn
                .query_row(
                    "SELECT data FROM conversations WHERE id = ?1",
                    params![id.as_str()],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or_else(|| StoreError::NotFound(format!("conversation {id}")))?;
            Ok(serde_json::from_str(&data)?)
        })
        .await
    }

    async fn get_conversation_messages(&self, id: &ConversationId) -> Result<Vec<Message>> {
        let id = id.clone();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT data FROM messages WHERE conversation_id = ?1 ORDER BY msg_order ASC",
            )?;
            let rows = stmt.query_map(params![id.as_str()], |row| {
                let data: String = row.get(0)?;
                Ok(data)
            })?;
            let mut messages = Vec::new();
            for row in rows {
                messages.push(serde_json::from_str(&row?)?);
            }
            Ok(messages)
        })
        .await
    }

    async fn get_conversation_participants(
        &self,
        id: &ConversationId,
    ) -> Result<Vec<Participant>> {
        let id = id.clone();
        self.with_conn(move |conn| {
            let mut stmt =
                conn.prepare("SELECT data FROM participants WHERE conversation_id = ?1")?;
            let rows = stmt.query_map(params![id.as_str()], |row| {
                let data: String = row.get(0)?;
                Ok(data)
            })?;
            let mut participants = Vec::new();
            for row in rows {
                participants.push(serde_json::from_str(&row?)?);
            }
            Ok(participants)
        })
        .await
    }

    async fn create_message(
        &self,
        conversation_id: &ConversationId,
        new_branch: NewBranch,
    ) -> Result<Message> {
        let conversation_id = conversation_id.clone();
        self.with_conn(move |conn| {
            let branch = Branch {
                id: BranchId::new(),
                parent_branch_id: new_branch.parent_branch_id,
                content: new_branch.content,
                content_blocks: new_branch.content_blocks,
                role: new_branch.role,
                participant_id: new_branch.participant_id,
                model: new_branch.model,
                hidden_from_ai: new_branch.hidden_from_ai,
                private_to_user_id: new_branch.private_to_user_id,
                created_at: chrono::Utc::now(),
                attachments: new_branch.attachments,
            };
            let order: i64 = conn
                .query_row(
                    "SELECT COALESCE(MAX(msg_order), -1) + 1 FROM messages WHERE conversation_id = ?1",
                    params![conversation_id.as_str()],
                    |row| row.get(0),
                )?;
            let message = Message {
                id: MessageId::new(),
                conversation_id: conversation_id.clone(),
                order: order as u64,
                active_branch_id: branch.id.clone(),
                branches: vec![branch],
            };
            let data = serde_json::to_string(&message)?;
            conn.execute(
                "INSERT INTO messages (id, conversation_id, msg_order, data) VALUES (?1, ?2, ?3, ?4)",
                params![message.id.as_str(), conversation_id.as_str(), order, data],
            )?;
            bump_version(conn, &conversation_id)?;
            Ok(message)
        })
        .await
    }

    async fn add_message_branch(
        &self,
        message_id: &MessageId,
        new_branch: NewBranch,
    ) -> Result<Branch> {
        let message_id = message_id.clone();
        self.with_conn(move |conn| {
            let (conversation_id, mut message) = load_message(conn, &message_id)?;
            let branch = Branch {
                id: BranchId::new(),
                parent_branch_id: new_branch.parent_branch_id,
                content: new_branch.content,
                content_blocks: new_branch.content_blocks,
                role: new_branch.role,
                participant_id: new_branch.participant_id,
                model: new_branch.model,
                hidden_from_ai: new_branch.hidden_from_ai,
                private_to_user_id: new_branch.private_to_user_id,
                created_at: chrono::Utc::now(),
                attachments: new_branch.attachments,
            };
            message.active_branch_id = branch.id.clone();
            message.branches.push(branch.clone());
            save_message(conn, &message)?;
            bump_version(conn, &conversation_id)?;
            Ok(branch)
        })
        .await
    }

    async fn update_message_content(
        &self,
        message_id: &MessageId,
        branch_id: &BranchId,
        text: &str,
    ) -> Result<()> {
        let message_id = message_id.clone();
        let branch_id = branch_id.clone();
        let text = text.to_string();
        self.with_conn(move |conn| {
            let (conversation_id, mut message) = load_message(conn, &message_id)?;
            let branch = message
                .branches
                .iter_mut()
                .find(|b| b.id == branch_id)
                .ok_or_else(|| StoreError::NotFound(format!("branch {branch_id}")))?;
            branch.content = text;
            save_message(conn, &message)?;
            bump_version(conn, &conversation_id)?;
            Ok(())
        })
        .await
    }

    async fn update_message_branch(
        &self,
        message_id: &MessageId,
        branch_id: &BranchId,
        patch: BranchMetaPatch,
    ) -> Result<()> {
        let message_id = message_id.clone();
        let branch_id = branch_id.clone();
        self.with_conn(move |conn| {
            let (conversation_id, mut message) = load_message(conn, &message_id)?;
            let branch = message
                .branches
                .iter_mut()
                .find(|b| b.id == branch_id)
                .ok_or_else(|| StoreError::NotFound(format!("branch {branch_id}")))?;
            if let Some(blocks) = patch.content_blocks {
                branch.content_blocks = blocks;
            }
            if let Some(hidden) = patch.hidden_from_ai {
                branch.hidden_from_ai = hidden;
            }
            if let Some(model) = patch.model {
                branch.model = model;
            }
            save_message(conn, &message)?;
            bump_version(conn, &conversation_id)?;
            Ok(())
        })
        .await
    }

    async fn delete_message_branch(
        &self,
        message_id: &MessageId,
        branch_id: &BranchId,
        _acting_user: &UserId,
    ) -> Result<Vec<MessageId>> {
        let message_id = message_id.clone();
        let branch_id = branch_id.clone();
        self.with_conn(move |conn| {
            let (conversation_id, mut message) = load_message(conn, &message_id)?;
            message.branches.retain(|b| b.id != branch_id);

            let mut deleted = Vec::new();
            if message.branches.is_empty() {
                conn.execute(
                    "DELETE FROM messages WHERE id = ?1",
                    params![message_id.as_str()],
                )?;
                deleted.push(message_id.clone());
            } else {
                if message.active_branch_id == branch_id {
                    message.active_branch_id = message.branches[0].id.clone();
                }
                save_message(conn, &message)?;
            }

            if deleted.contains(&message_id) {
                let descendants = find_descendants(conn, &conversation_id, &branch_id)?;
                for desc in descendants {
                    conn.execute("DELETE FROM messages WHERE id = ?1", params![desc.as_str()])?;
                    deleted.push(desc);
                }
            }

            bump_version(conn, &conversation_id)?;
            Ok(deleted)
        })
        .await
    }

    async fn get_message(&self, message_id: &MessageId) -> Result<Message> {
        let message_id = message_id.clone();
        self.with_conn(move |conn| Ok(load_message(conn, &message_id)?.1))
            .await
    }

    async fn set_active_branch(&self, message_id: &MessageId, branch_id: &BranchId) -> Result<()> {
        let message_id = message_id.clone();
        let branch_id = branch_id.clone();
        self.with_conn(move |conn| {
            let (conversation_id, mut message) = load_message(conn, &message_id)?;
            if !message.branches.iter().any(|b| b.id == branch_id) {
                return Err(StoreError::NotFound(format!("branch {branch_id}")));
            }
            message.active_branch_id = branch_id;
            save_message(conn, &message)?;
            bump_version(conn, &conversation_id)?;
            Ok(())
        })
        .await
    }

    async fn get_user(&self, id: &UserId) -> Result<User> {
        let id = id.clone();
        self.with_conn(move |conn| {
            let data: String = conn
                .query_row(
                    "SELECT data FROM users WHERE id = ?1",
                    params![id.as_str()],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or_else(|| StoreError::NotFound(format!("user {id}")))?;
            Ok(serde_json::from_str(&data)?)
        })
        .await
    }

    async fn get_user_by_username(&self, username: &str) -> Result<User> {
        let username = username.to_string();
        self.with_conn(move |conn| {
            let data: String = conn
                .query_row(
                    "SELECT data FROM users WHERE username = ?1",
                    params![username],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or_else(|| StoreError::NotFound(format!("user {username}")))?;
            Ok(serde_json::from_str(&data)?)
        })
        .await
    }

    async fn get_user_api_keys(&self, user_id: &UserId) -> Result<Vec<ApiKeyRecord>> {
        let user_id = user_id.clone();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare("SELECT provider FROM api_keys WHERE user_id = ?1")?;
            let rows = stmt.query_map(params![user_id.as_str()], |row| {
                Ok(ApiKeyRecord {
                    provider: row.get(0)?,
                })
            })?;
            Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
        })
        .await
    }

    async fn get_user_grant_summary(&self, user_id: &UserId) -> Result<GrantSummary> {
        let user_id = user_id.clone();
        self.with_conn(move |conn| {
            let data: Option<String> = conn
                .query_row(
                    "SELECT data FROM grants WHERE user_id = ?1",
                    params![user_id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(match data {
                Some(d) => serde_json::from_str(&d)?,
                None => GrantSummary::default(),
            })
        })
        .await
    }

    async fn get_applicable_grant_currencies(&self, _model: &str) -> Result<Vec<String>> {
        Ok(vec!["usd".to_string()])
    }

    async fn user_has_overspend_capability(&self, user_id: &UserId) -> Result<bool> {
        let user_id = user_id.clone();
        self.with_conn(move |conn| {
            let allowed: Option<i64> = conn
                .query_row(
                    "SELECT allowed FROM overspend_capability WHERE user_id = ?1",
                    params![user_id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(allowed.unwrap_or(0) != 0)
        })
        .await
    }

    async fn can_user_chat_in_conversation(
        &self,
        _user_id: &UserId,
        _conversation_id: &ConversationId,
    ) -> Result<bool> {
        Ok(true)
    }

    async fn can_user_delete_in_conversation(
        &self,
        _user_id: &UserId,
        _conversation_id: &ConversationId,
    ) -> Result<bool> {
        Ok(true)
    }

    async fn add_metrics(&self, metrics: Metrics) -> Result<()> {
        self.with_conn(move |conn| {
            let data = serde_json::to_string(&metrics)?;
            conn.execute(
                "INSERT INTO metrics (conversation_id, data) VALUES (?1, ?2)",
                params![metrics.conversation_id.as_str(), data],
            )?;
            Ok(())
        })
        .await
    }

    async fn is_user_age_verified(&self, _user_id: &UserId) -> Result<bool> {
        Ok(true)
    }

    async fn get_ui_state(
        &self,
        user_id: &UserId,
        conversation_id: &ConversationId,
    ) -> Result<UiState> {
        let user_id = user_id.clone();
        let conversation_id = conversation_id.clone();
        self.with_conn(move |conn| {
            let data: Option<String> = conn
                .query_row(
                    "SELECT data FROM ui_state WHERE user_id = ?1 AND conversation_id = ?2",
                    params![user_id.as_str(), conversation_id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(match data {
                Some(d) => serde_json::from_str(&d)?,
                None => UiState::default(),
            })
        })
        .await
    }

    async fn set_ui_state(
        &self,
        user_id: &UserId,
        conversation_id: &ConversationId,
        state: UiState,
    ) -> Result<()> {
        let user_id = user_id.clone();
        let conversation_id = conversation_id.clone();
        self.with_conn(move |conn| {
            let data = serde_json::to_string(&state)?;
            conn.execute(
                "INSERT INTO ui_state (user_id, conversation_id, data) VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id, conversation_id) DO UPDATE SET data = excluded.data",
                params![user_id.as_str(), conversation_id.as_str(), data],
            )?;
            Ok(())
        })
        .await
    }

    async fn version(&self, conversation_id: &ConversationId) -> Result<u64> {
        let conversation_id = conversation_id.clone();
        self.with_conn(move |conn| {
            let version: i64 = conn
                .query_row(
                    "SELECT version FROM conversations WHERE id = ?1",
                    params![conversation_id.as_str()],
                    |row| row.get(0),
                )
                .optional()?
                .unwrap_or(0);
            Ok(version as u64)
        })
        .await
    }
}

fn load_message(conn: &Connection, message_id: &MessageId) -> Result<(ConversationId, Message)> {
    let (conversation_id, data): (String, String) = conn.query_row(
        "SELECT conversation_id, data FROM messages WHERE id = ?1",
        params![message_id.as_str()],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .optional()?
    .ok_or_else(|| StoreError::NotFound(format!("message {message_id}")))?;
    Ok((conversation_id.into(), serde_json::from_str(&data)?))
}

fn save_message(conn: &Connection, message: &Message) -> Result<()> {
    let data = serde_json::to_string(message)?;
    conn.execute(
        "UPDATE messages SET data = ?2 WHERE id = ?1",
        params![message.id.as_str(), data],
    )?;
    Ok(())
}

fn find_descendants(
    conn: &Connection,
    conversation_id: &ConversationId,
    parent_branch: &BranchId,
) -> Result<Vec<MessageId>> {
    let mut stmt = conn.prepare("SELECT id, data FROM messages WHERE conversation_id = ?1")?;
    let rows = stmt.query_map(params![conversation_id.as_str()], |row| {
        let id: String = row.get(0)?;
        let data: String = row.get(1)?;
        Ok((id, data))
    })?;
    let mut descendants = Vec::new();
    for row in rows {
        let (id, data) = row?;
        let message: Message = serde_json::from_str(&data)?;
        if message
            .branches
            .iter()
            .any(|b| b.parent_branch_id == parent_branch.as_str())
        {
            descendants.push(MessageId::from(id));
        }
    }
    Ok(descendants)
}

fn bump_version(conn: &Connection, conversation_id: &ConversationId) -> Result<()> {
    conn.execute(
        "UPDATE conversations SET version = version + 1 WHERE id = ?1",
        params![conversation_id.as_str()],
    )?;
    Ok(())
}
