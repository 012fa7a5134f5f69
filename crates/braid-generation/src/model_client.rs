use async_trait::async_trait;
use braid_core::types::BranchRole;
use braid_store::types::ContentBlock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// One turn of normalized context sent to the provider — already filtered
/// for `hiddenFromAi` and alternating user/assistant (spec §6).
#[derive(Debug, Clone)]
pub struct NormalizedMessage {
    pub role: BranchRole,
    pub content: String,
}

/// Sampling knobs collected from participant settings ∪ conversation
/// defaults (spec §4.8 step 3).
#[derive(Debug, Clone, Copy)]
pub struct SamplingSettings {
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
}

/// A single normalized generation request (spec §6's `ModelClient` request).
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub model: String,
    pub system_prompt: String,
    pub messages: Vec<NormalizedMessage>,
    pub sampling: SamplingSettings,
    pub prefill: bool,
}

/// Per-chunk events a provider stream emits, mirrored on the wire as
/// `stream` frames by the coordinator (spec §4.8 step 4).
#[derive(Debug, Clone)]
pub enum ModelStreamEvent {
    Delta {
        text: String,
        blocks: Option<Vec<ContentBlock>>,
    },
    Error {
        message: String,
    },
}

/// Final usage record a provider call yields once the stream completes.
#[derive(Debug, Clone, Copy, Default)]
pub struct Usage {
    pub tokens_in: u64,
    pub tokens_out: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("{0}")]
    Provider(String),
    #[error("cancelled")]
    Cancelled,
}

/// The consumed collaborator that turns a normalized request into a
/// provider-specific streaming RPC (spec §6). Grounded on
/// `skynet_agent::provider::LlmProvider::send_stream`'s channel-based
/// streaming shape, adapted to return the final `Usage` once the provider
/// signals completion rather than emitting a `Done` variant through the
/// channel — the coordinator needs the usage value synchronously to debit
/// credits (§4.8 step 6), so it is the `Result`'s payload rather than one
/// more event to match on.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn stream(
        &self,
        request: ModelRequest,
        cancel: CancellationToken,
        tx: mpsc::Sender<ModelStreamEvent>,
    ) -> Result<Usage, ModelError>;
}

/// Canned-chunk test double (spec §9: "mock-framework-heavy tests → driven
/// by the Store/ModelClient/... interfaces: test doubles implement these
/// directly"). Emits each configured chunk with no delay, then returns the
/// configured usage — or, if `fail_with` is set, an error instead.
pub struct MockModelClient {
    pub chunks: Vec<String>,
    pub usage: Usage,
    pub fail_with: Option<String>,
}

impl MockModelClient {
    pub fn new(chunks: Vec<&str>, usage: Usage) -> Self {
        Self {
            chunks: chunks.into_iter().map(String::from).collect(),
            usage,
            fail_with: None,
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            chunks: vec![],
            usage: Usage::default(),
            fail_with: Some(message.into()),
        }
    }
}

#[async_trait]
impl ModelClient for MockModelClient {
    async fn stream(
        &self,
        _request: ModelRequest,
        cancel: CancellationToken,
        tx: mpsc::Sender<ModelStreamEvent>,
    ) -> Result<Usage, ModelError> {
        if let Some(message) = &self.fail_with {
            return Err(ModelError::Provider(message.clone()));
        }
        for chunk in &self.chunks {
            if cancel.is_cancelled() {
                return Err(ModelError::Cancelled);
            }
            let _ = tx
                .send(ModelStreamEvent::Delta {
                    text: chunk.clone(),
                    blocks: None,
                })
                .await;
        }
        if cancel.is_cancelled() {
            return Err(ModelError::Cancelled);
        }
        Ok(self.usage)
    }
}
