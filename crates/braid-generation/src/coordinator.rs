use braid_conversation::system_prompt::{self, CliModeConfig, ModelCapabilities};
use braid_conversation::CreditGate;
use braid_core::types::{BranchId, ConnId, ConversationId, MessageId, ParticipantId, UserId};
use braid_core::ContentFilter;
use braid_protocol::{OutboundEvent, Usage as WireUsage};
use braid_rooms::{ConnectionRegistry, RoomRegistry, SessionMessage};
use braid_store::types::Metrics;
use braid_store::BranchStore;
use futures_util::future::join_all;
use tokio::sync::mpsc;

use crate::cancellation::CancellationRegistry;
use crate::error_classifier::{classify, Classified};
use crate::model_client::{
    ModelClient, ModelError, ModelRequest, ModelStreamEvent, NormalizedMessage, SamplingSettings,
    Usage,
};
use crate::pricing::Pricing;

/// Providers known to support prefill-mode generation (spec §4.5), checked
/// alongside each model's own provider-prefix exactly as the composer's
/// condition reads in spec.md.
const PREFILL_CAPABLE_PROVIDERS: &[&str] = &["anthropic", "bedrock"];

fn provider_of(model: &str) -> &str {
    model.split('/').next().unwrap_or(model)
}

enum BranchResult {
    Completed(Usage),
    Cancelled,
    Failed(Classified),
}

struct BranchOutcome {
    branch_id: BranchId,
    final_text: String,
    result: BranchResult,
}

/// Admission, streaming fan-out, cancellation, filtering, and billing for
/// one generation request (spec §4.8). One instance is built per call — it
/// borrows the long-lived registries and collaborators rather than owning
/// them, mirroring `ConversationOps`'s borrow-everything shape.
pub struct GenerationCoordinator<'a> {
    pub store: &'a dyn BranchStore,
    pub rooms: &'a RoomRegistry,
    pub connections: &'a ConnectionRegistry,
    pub content_filter: &'a dyn ContentFilter,
    pub model_client: &'a dyn ModelClient,
    pub pricing: &'a dyn Pricing,
    pub cancellation: &'a CancellationRegistry,
    pub cli_mode: CliModeConfig,
}

impl<'a> GenerationCoordinator<'a> {
    /// Cancels the active generation in `conversation_id` iff it belongs to
    /// `user_id` — the `abort` inbound frame's handler (spec §4.3, §4.8).
    pub fn abort(&self, conversation_id: &ConversationId, user_id: &UserId) -> bool {
        self.cancellation.abort(conversation_id, user_id)
    }

    /// Runs one generation request end to end (spec §4.8's 7 steps).
    /// `assistant_branch_ids` holds one id per sampled branch (length 1
    /// unless `samplingBranches` > 1); all of them share the room's single
    /// AI slot and one cancellation token (spec §9 open question, resolved
    /// in DESIGN.md: shared, since the protocol only has one
    /// `ai_generating`/`ai_finished` pair per admission).
    pub async fn generate(
        &self,
        conversation_id: &ConversationId,
        user_id: &UserId,
        actor_conn: &ConnId,
        assistant_message_id: &MessageId,
        assistant_branch_ids: &[BranchId],
        responder_participant_id: Option<ParticipantId>,
    ) -> braid_core::Result<()> {
        // Spec §4.7: credit gate is evaluated immediately before admitting
        // the request, against the responder's resolved model — before the
        // room's AI slot is claimed, so a denied request never occupies it.
        let model = self
            .resolve_model(conversation_id, responder_participant_id.clone())
            .await?;

        if !CreditGate::new(self.store).allowed(user_id, &model).await? {
            if let Some(handle) = self.connections.get(actor_conn) {
                handle.send(SessionMessage::Event(OutboundEvent::Error {
                    code: braid_protocol::ErrorCode::InsufficientCredits,
                    message: "insufficient credits for this model".to_string(),
                    suggestion: None,
                }));
            }
            return Ok(());
        }

        if self.pricing.price(&model).await.is_none() {
            if let Some(handle) = self.connections.get(actor_conn) {
                handle.send(SessionMessage::Event(OutboundEvent::Error {
                    code: braid_protocol::ErrorCode::PricingNotConfigured,
                    message: "no pricing configured for this model".to_string(),
                    suggestion: None,
                }));
            }
            return Ok(());
        }

        // Step 1: admission.
        if !self
            .rooms
            .start_ai_request(conversation_id, user_id, assistant_message_id)
        {
            if let Some(active) = self.rooms.active_request(conversation_id) {
                if let Some(handle) = self.connections.get(actor_conn) {
                    handle.send(SessionMessage::Event(OutboundEvent::AiRequestQueued {
                        conversation_id: conversation_id.clone(),
                        active_request: active,
                    }));
                }
            }
            return Ok(());
        }

        let token = self
            .cancellation
            .begin(conversation_id.clone(), user_id.clone());

        // Step 2: announce.
        self.rooms.broadcast(
            conversation_id,
            OutboundEvent::AiGenerating {
                conversation_id: conversation_id.clone(),
            },
            None,
            self.connections,
        );

        // Step 3: build the request (context + system prompt + sampling).
        let request = self
            .build_request(conversation_id, assistant_message_id, responder_participant_id)
            .await?;

        // Step 4: stream every sampled branch concurrently, sharing `token`.
        let branch_futures = assistant_branch_ids.iter().map(|branch_id| {
            let (tx, rx) = mpsc::channel(32);
            let branch_id = branch_id.clone();
            let request = request.clone();
            let token = token.clone();
            let forward = forward_stream(
                conversation_id,
                assistant_message_id,
                &branch_id,
                rx,
                self.rooms,
                self.connections,
            );
            let produce = self.model_client.stream(request, token, tx);
            run_branch(branch_id, produce, forward)
        });
        let outcomes = join_all(branch_futures).await;

        let any_cancelled = outcomes
            .iter()
            .any(|o| matches!(o.result, BranchResult::Cancelled));

        // Step 5: content-filter and persist each branch's final text.
        let mut total_usage = Usage::default();
        for outcome in &outcomes {
            match &outcome.result {
                BranchResult::Completed(usage) => {
                    let filtered = self.content_filter.check(&outcome.final_text).await;
                    let final_text = if filtered.blocked {
                        "[Content filtered]".to_string()
                    } else {
                        outcome.final_text.clone()
                    };
                    self.store
                        .update_message_content(assistant_message_id, &outcome.branch_id, &final_text)
                        .await?;
                    self.rooms.broadcast(
                        conversation_id,
                        OutboundEvent::Stream {
                            conversation_id: conversation_id.clone(),
                            message_id: assistant_message_id.clone(),
                            branch_id: outcome.branch_id.clone(),
                            content: final_text,
                            content_blocks: None,
                            aborted: false,
                            done: true,
                            usage: Some(WireUsage {
                                tokens_in: usage.tokens_in,
                                tokens_out: usage.tokens_out,
                            }),
                        },
                        None,
                        self.connections,
                    );
                    total_usage.tokens_in += usage.tokens_in;
                    total_usage.tokens_out += usage.tokens_out;
                }
                BranchResult::Cancelled => {
                    self.store
                        .update_message_content(
                            assistant_message_id,
                            &outcome.branch_id,
                            &outcome.final_text,
                        )
                        .await?;
                    self.rooms.broadcast(
                        conversation_id,
                        OutboundEvent::Stream {
                            conversation_id: conversation_id.clone(),
                            message_id: assistant_message_id.clone(),
                            branch_id: outcome.branch_id.clone(),
                            content: outcome.final_text.clone(),
                            content_blocks: None,
                            aborted: true,
                            done: true,
                            usage: None,
                        },
                        None,
                        self.connections,
                    );
                }
                BranchResult::Failed(classified) => {
                    self.store
                        .update_message_content(
                            assistant_message_id,
                            &outcome.branch_id,
                            &outcome.final_text,
                        )
                        .await?;
                    self.rooms.broadcast(
                        conversation_id,
                        OutboundEvent::Error {
                            code: classified.code,
                            message: classified.message.clone(),
                            suggestion: classified.suggestion.clone(),
                        },
                        None,
                        self.connections,
                    );
                }
            }
        }

        if any_cancelled {
            self.rooms.broadcast(
                conversation_id,
                OutboundEvent::GenerationAborted {
                    conversation_id: conversation_id.clone(),
                    success: true,
                },
                None,
                self.connections,
            );
        }

        // Step 6: debit cost and publish aggregate usage for the request.
        if total_usage.tokens_in > 0 || total_usage.tokens_out > 0 {
            if let Some(price) = self.pricing.price(&request.model).await {
                let metrics = Metrics {
                    conversation_id: conversation_id.clone(),
                    model: request.model.clone(),
                    tokens_in: total_usage.tokens_in,
                    tokens_out: total_usage.tokens_out,
                    cost: price.cost(total_usage),
                    currency: self.pricing.currency(&request.model),
                };
                self.store.add_metrics(metrics.clone()).await?;
                self.rooms.broadcast(
                    conversation_id,
                    OutboundEvent::MetricsUpdate {
                        conversation_id: conversation_id.clone(),
                        metrics,
                    },
                    None,
                    self.connections,
                );
            }
        }

        // Step 7: release the slot.
        self.cancellation.end(conversation_id);
        self.rooms.end_ai_request(conversation_id, self.connections);
        Ok(())
    }

    /// Resolves the model that will actually serve this request — the
    /// responder's own model override if one is set, else the
    /// conversation's default — so the credit gate and pricing lookup can
    /// run before the room's AI slot is claimed (spec §4.7).
    async fn resolve_model(
        &self,
        conversation_id: &ConversationId,
        responder_participant_id: Option<ParticipantId>,
    ) -> braid_core::Result<String> {
        let conversation = self.store.get_conversation(conversation_id).await?;
        let responder = match responder_participant_id {
            Some(id) => self
                .store
                .get_conversation_participants(conversation_id)
                .await?
                .into_iter()
                .find(|p| p.id == id),
            None => None,
        };
        Ok(responder
            .and_then(|p| p.model)
            .unwrap_or(conversation.model))
    }

    async fn build_request(
        &self,
        conversation_id: &ConversationId,
        assistant_message_id: &MessageId,
        responder_participant_id: Option<ParticipantId>,
    ) -> braid_core::Result<ModelRequest> {
        let conversation = self.store.get_conversation(conversation_id).await?;
        let messages = self.store.get_conversation_messages(conversation_id).await?;

        let responder = match responder_participant_id {
            Some(id) => self
                .store
                .get_conversation_participants(conversation_id)
                .await?
                .into_iter()
                .find(|p| p.id == id),
            None => None,
        };
        let responder = responder.as_ref();
        let ui_state = self
            .store
            .get_ui_state(&conversation.owner, conversation_id)
            .await?;
        let path = braid_store::project(&messages, &ui_state, &conversation.owner);

        let mut normalized = Vec::new();
        for step in path.iter() {
            if step.message.id == *assistant_message_id {
                break;
            }
            let Some(branch) = step.message.branch(&step.branch_id) else {
                continue;
            };
            if branch.hidden_from_ai {
                continue;
            }
            normalized.push(NormalizedMessage {
                role: branch.role,
                content: branch.content.clone(),
            });
        }

        let model = responder
            .and_then(|p| p.model.clone())
            .unwrap_or_else(|| conversation.model.clone());
        let capabilities = ModelCapabilities {
            supports_prefill: PREFILL_CAPABLE_PROVIDERS.contains(&provider_of(&model)),
        };

        let participant_name = responder.map(|p| p.name.as_str()).unwrap_or("Assistant");
        let system_prompt_text = responder.and_then(|p| p.system_prompt.as_deref());
        let conversation_mode = responder.and_then(|p| p.conversation_mode);

        let system_prompt = system_prompt::compose(
            participant_name,
            system_prompt_text,
            conversation.format,
            normalized.len() as u32,
            capabilities,
            conversation_mode,
            self.cli_mode,
        );

        let settings = responder.map(|p| &p.settings);
        let sampling = SamplingSettings {
            temperature: settings
                .and_then(|s| s.temperature)
                .unwrap_or(conversation.settings.temperature),
            max_tokens: settings
                .and_then(|s| s.max_tokens)
                .unwrap_or(conversation.settings.max_tokens),
            top_p: conversation.settings.top_p,
            top_k: conversation.settings.top_k,
        };

        Ok(ModelRequest {
            model,
            system_prompt,
            messages: normalized,
            sampling,
            prefill: matches!(conversation.format, braid_core::types::ConversationFormat::Prefill),
        })
    }
}

async fn run_branch(
    branch_id: BranchId,
    produce: impl std::future::Future<Output = Result<Usage, ModelError>>,
    forward: impl std::future::Future<Output = String>,
) -> BranchOutcome {
    let (produced, final_text) = tokio::join!(produce, forward);
    let result = match produced {
        Ok(usage) => BranchResult::Completed(usage),
        Err(ModelError::Cancelled) => BranchResult::Cancelled,
        Err(ModelError::Provider(message)) => {
            let classified = classify(&message);
            if matches!(classified.code, braid_protocol::ErrorCode::Aborted) {
                BranchResult::Cancelled
            } else {
                BranchResult::Failed(classified)
            }
        }
    };
    BranchOutcome {
        branch_id,
        final_text,
        result,
    }
}

/// Drains one branch's chunk channel, accumulating the growing content and
/// broadcasting a `stream` delta per chunk (spec §4.8 step 4). Returns the
/// fully accumulated text once the producer side closes the channel.
async fn forward_stream(
    conversation_id: &ConversationId,
    message_id: &MessageId,
    branch_id: &BranchId,
    mut rx: mpsc::Receiver<ModelStreamEvent>,
    rooms: &RoomRegistry,
    connections: &ConnectionRegistry,
) -> String {
    let mut content = String::new();
    while let Some(event) = rx.recv().await {
        match event {
            ModelStreamEvent::Delta { text, blocks } => {
                content.push_str(&text);
                rooms.broadcast(
                    conversation_id,
                    OutboundEvent::Stream {
                        conversation_id: conversation_id.clone(),
                        message_id: message_id.clone(),
                        branch_id: branch_id.clone(),
                        content: text,
                        content_blocks: blocks,
                        aborted: false,
                        done: false,
                        usage: None,
                    },
                    None,
                    connections,
                );
            }
            ModelStreamEvent::Error { .. } => {
                // A mid-stream provider warning that doesn't end the stream;
                // the terminal classification comes from `produce`'s `Result`.
            }
        }
    }
    content
}
