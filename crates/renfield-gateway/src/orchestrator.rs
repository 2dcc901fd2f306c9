//! Orchestrator (§4.17): the ten-step conversation pipeline one `/ws` or
//! `/api/chat/send` turn runs through. Built as an `async_stream` of domain
//! events the caller maps onto the wire envelopes it actually speaks
//! (chat WS, REST, satellite), mirroring how `AgentLoop::run` structures a
//! cancellable step-by-step stream.

use std::sync::Arc;

use renfield_agent::agent_loop::AgentLoop;
use renfield_agent::agent_router::{default_manifests, AgentRouter};
use renfield_agent::complexity::{classify as classify_complexity, Complexity};
use renfield_agent::gateway::{CallOptions, LlmRole};
use renfield_agent::intent::IntentClassifier;
use renfield_agent::provider::{Message as LlmMessage, MessageRole as LlmMessageRole};
use renfield_agent::AgentEvent;
use renfield_core::permissions::{Permission, Role};
use renfield_core::{RoomId, UserId};
use renfield_memory::ReconcileOutcome;
use renfield_retrieval::retriever::HybridConfig;
use renfield_sessions::types::{MessageRole as SessionMessageRole, RagSourceRef};
use tracing::{info, warn};

use crate::app::AppState;
use crate::collaborators::AgentToolCatalog;

/// Turn-level events the caller maps to its transport's wire shapes.
#[derive(Debug, Clone)]
pub enum TurnEvent {
    AgentRole { name: String },
    TextDelta { text: String },
    ToolCall { name: String, parameters: serde_json::Value, reason: String },
    ToolResult { name: String, result: Option<serde_json::Value>, error: Option<String> },
    Done { sources: Option<Vec<String>>, tts_handled: bool, agent_steps: Option<u32> },
}

pub struct TurnInput {
    pub conversation_id: String,
    pub user_id: Option<UserId>,
    pub room_id: Option<RoomId>,
    pub message: String,
    pub use_rag: bool,
    pub knowledge_base_id: Option<String>,
    pub caller_role: Option<Role>,
    /// True when this turn came in over voice (satellite) or the caller
    /// explicitly asked for TTS (§4.17 step 11).
    pub wants_tts: bool,
}

/// Runs one turn to completion, calling `emit` for every event in order.
/// Dropping the future mid-poll is the orchestrator's cancellation point
/// (§4.17 "Cancellation"): whatever's already been accumulated in `reply`
/// still gets persisted and handed to memory extraction because both run
/// after the streaming call, not interleaved with it.
pub async fn run_turn<F>(state: &Arc<AppState>, input: TurnInput, mut emit: F)
where
    F: FnMut(TurnEvent),
{
    let user_id_str = input.user_id.as_ref().map(|u| u.as_str().to_string()).unwrap_or_else(|| "anonymous".to_string());
    let has_kb_all = input.caller_role.as_ref().is_some_and(|r| r.has(&Permission::new("kb.all")));

    // Step 3: short-term context, sized per path (final size picked once the
    // gate below knows which path this turn takes).
    let history_for_agent = state.sessions.recent_messages(&input.conversation_id, state.config.agent.conv_context_messages).unwrap_or_default();
    let history_for_fast_path = state.sessions.recent_messages(&input.conversation_id, 10).unwrap_or_default();

    // Step 4: long-term memories.
    let mut memory_context: Vec<String> = Vec::new();
    if state.config.memory.enabled {
        if let Ok(embedding) = state.llm.embed(LlmRole::Intent, &input.message).await {
            match state.memory.retrieve(&user_id_str, &embedding, 3, state.config.memory.retrieval_threshold) {
                Ok(scored) => memory_context = scored.into_iter().map(|s| s.memory.content).collect(),
                Err(e) => warn!(error = %e, "memory retrieval failed"),
            }
        }
    }

    // Step 5: knowledge, only when the caller asked for RAG (the Agent
    // Router's knowledge role does its own retrieval inside the Agent Loop
    // instead, so this step is skipped on the complex path below).
    let mut knowledge_context: Vec<RagSourceRef> = Vec::new();
    let mut knowledge_snippets: Vec<String> = Vec::new();
    if input.use_rag && state.config.rag.enabled {
        let accessible = match &input.knowledge_base_id {
            Some(id) => vec![id.clone()],
            None => state.knowledge.accessible_knowledge_bases(&user_id_str, has_kb_all).unwrap_or_default(),
        };
        if !accessible.is_empty() {
            if let Ok(embedding) = state.llm.embed(LlmRole::Rag, &input.message).await {
                let cfg = HybridConfig {
                    top_k: state.config.rag.top_k,
                    hybrid_enabled: state.config.rag.hybrid_enabled,
                    similarity_threshold: state.config.rag.similarity_threshold,
                    rrf_k: state.config.rag.hybrid_rrf_k,
                    weight_dense: state.config.rag.hybrid_weight_dense,
                    weight_bm25: state.config.rag.hybrid_weight_bm25,
                    context_window_chunks: state.config.rag.context_window_chunks,
                };
                match state.knowledge.retrieve(&input.message, &embedding, &accessible, &cfg) {
                    Ok(scored) => {
                        for s in scored {
                            knowledge_snippets.push(s.chunk.content.clone());
                            knowledge_context.push(RagSourceRef {
                                document_id: s.chunk.document_id,
                                chunk_id: s.chunk.id,
                                title: s.chunk.filename,
                                score: s.score,
                            });
                        }
                    }
                    Err(e) => warn!(error = %e, "knowledge retrieval failed"),
                }
            }
        }
    }

    // Step 6: feedback few-shots.
    let feedback_examples: Vec<renfield_agent::intent::FeedbackExample> = state
        .feedback
        .lookup(&input.message, 3)
        .unwrap_or_default()
        .into_iter()
        .map(|f| renfield_agent::intent::FeedbackExample {
            situation: f.situation,
            chosen_intent_or_tool: f.chosen_intent_or_tool,
            correction: f.correction,
        })
        .collect();

    // Step 7: gate.
    let mut tool_result: Option<(String, Result<serde_json::Value, String>)> = None;
    let mut llm_role = LlmRole::Chat;
    let mut agent_steps: Option<u32> = None;

    match classify_complexity(&input.message) {
        Complexity::Simple => {
            let classifier = IntentClassifier::new(&state.llm);
            let known_intents = state.tools.catalog().await.into_iter().map(|d| d.name).collect::<Vec<_>>();
            let room_context = input.room_id.as_ref().map(|r| r.as_str().to_string());
            let ranked = classifier
                .classify(&input.message, room_context.as_deref(), &known_intents, &[], &feedback_examples)
                .await;

            if let Some(top) = ranked.first() {
                if top.name != "general.conversation" {
                    emit(TurnEvent::ToolCall {
                        name: top.name.clone(),
                        parameters: top.parameters.clone(),
                        reason: format!("intent classifier confidence {:.2}", top.confidence),
                    });
                    let outcome = state.tools.execute(&top.name, top.parameters.clone(), input.caller_role.as_ref()).await;
                    let (result_value, error) = match &outcome {
                        Ok(v) => (Some(v.clone()), None),
                        Err(e) => (None, Some(e.to_string())),
                    };
                    emit(TurnEvent::ToolResult { name: top.name.clone(), result: result_value, error: error.clone() });
                    tool_result = Some((top.name.clone(), outcome.map_err(|e| e.to_string())));
                }
            }
        }
        Complexity::Complex => {
            let role = AgentRouter::new(&state.llm)
                .with_router_timeout_secs(state.config.agent.router_timeout_secs)
                .route(&input.message)
                .await;
            emit(TurnEvent::AgentRole { name: role.as_str().to_string() });

            let manifests = default_manifests();
            let Some(manifest) = manifests.iter().find(|m| m.role == role) else {
                warn!(role = role.as_str(), "no manifest for routed agent role, falling back to chat");
                return run_fast_path(state, &input, &history_for_fast_path, &memory_context, &knowledge_snippets, &knowledge_context, None, llm_role, &mut emit).await;
            };

            let catalog = AgentToolCatalog::new(state.tools.clone(), input.caller_role.clone()).await;
            let agent_loop = AgentLoop::new(&state.llm, &catalog)
                .with_step_timeout_secs(state.config.agent.step_timeout_secs)
                .with_total_timeout_secs(state.config.agent.total_timeout_secs)
                .with_conv_context_messages(state.config.agent.conv_context_messages);

            let caller_user = input.user_id.clone().unwrap_or_else(|| UserId::from("anonymous"));
            let context: Vec<LlmMessage> = history_for_agent.iter().map(to_llm_message).collect();

            let mut reply = String::new();
            let mut steps_used = 0u32;
            let stream = agent_loop.run(manifest, input.message.clone(), context, caller_user);
            futures_util::pin_mut!(stream);
            while let Some(event) = futures_util::StreamExt::next(&mut stream).await {
                match event {
                    AgentEvent::Thinking { .. } => {}
                    AgentEvent::ToolCall { name, params, reason } => emit(TurnEvent::ToolCall { name, parameters: params, reason }),
                    AgentEvent::ToolResult { name, result } => {
                        let (r, e) = match result {
                            Ok(v) => (Some(v), None),
                            Err(e) => (None, Some(e)),
                        };
                        emit(TurnEvent::ToolResult { name, result: r, error: e });
                    }
                    AgentEvent::FinalToken { text } => {
                        reply.push_str(&text);
                        emit(TurnEvent::TextDelta { text });
                    }
                    AgentEvent::Done { steps_used: n } => steps_used = n,
                }
            }
            agent_steps = Some(steps_used);

            persist_and_extract(state, &input, &reply, &knowledge_context).await;
            emit(TurnEvent::Done { sources: sources_list(&knowledge_context), tts_handled: false, agent_steps });
            maybe_tts_and_route(state, &input, &reply).await;
            return;
        }
    }

    llm_role = if knowledge_snippets.is_empty() { LlmRole::Chat } else { LlmRole::Rag };
    run_fast_path(state, &input, &history_for_fast_path, &memory_context, &knowledge_snippets, &knowledge_context, tool_result, llm_role, &mut emit).await;
}

#[allow(clippy::too_many_arguments)]
async fn run_fast_path<F>(
    state: &Arc<AppState>,
    input: &TurnInput,
    history: &[renfield_sessions::types::Message],
    memory_context: &[String],
    knowledge_snippets: &[String],
    knowledge_sources: &[RagSourceRef],
    tool_result: Option<(String, Result<serde_json::Value, String>)>,
    llm_role: LlmRole,
    emit: &mut F,
) where
    F: FnMut(TurnEvent),
{
    let system = build_system_prompt(memory_context, knowledge_snippets, tool_result.as_ref());
    let mut messages: Vec<LlmMessage> = history.iter().map(to_llm_message).collect();
    messages.push(LlmMessage { role: LlmMessageRole::User, content: input.message.clone() });

    let mut reply = String::new();
    match state.llm.chat_stream(llm_role, messages, CallOptions { system, ..Default::default() }).await {
        Ok(mut stream) => {
            while let Some(event) = stream.rx.recv().await {
                match event {
                    renfield_agent::stream::StreamEvent::TextDelta { text } => {
                        reply.push_str(&text);
                        emit(TurnEvent::TextDelta { text });
                    }
                    renfield_agent::stream::StreamEvent::Done { .. } => break,
                    renfield_agent::stream::StreamEvent::Error { message } => {
                        warn!(error = %message, "chat stream failed");
                        break;
                    }
                }
            }
        }
        Err(e) => warn!(error = %e, "could not start chat stream"),
    }

    persist_and_extract(state, input, &reply, knowledge_sources).await;
    emit(TurnEvent::Done { sources: sources_list(knowledge_sources), tts_handled: false, agent_steps: None });
    maybe_tts_and_route(state, input, &reply).await;
}

fn build_system_prompt(memory_context: &[String], knowledge_snippets: &[String], tool_result: Option<&(String, Result<serde_json::Value, String>)>) -> String {
    let mut s = String::from("You are Renfield, a helpful home voice assistant. Answer concisely and cite sources when you used retrieved knowledge.\n");
    if !memory_context.is_empty() {
        s.push_str("What you remember about this user:\n");
        for m in memory_context {
            s.push_str("- ");
            s.push_str(m);
            s.push('\n');
        }
    }
    if !knowledge_snippets.is_empty() {
        s.push_str("Retrieved knowledge:\n");
        for k in knowledge_snippets {
            s.push_str("- ");
            s.push_str(k);
            s.push('\n');
        }
    }
    if let Some((name, result)) = tool_result {
        match result {
            Ok(v) => s.push_str(&format!("Tool '{name}' returned: {v}\n")),
            Err(e) => s.push_str(&format!("Tool '{name}' failed: {e}\n")),
        }
    }
    s
}

fn to_llm_message(m: &renfield_sessions::types::Message) -> LlmMessage {
    let role = match m.role {
        SessionMessageRole::User => LlmMessageRole::User,
        SessionMessageRole::Assistant => LlmMessageRole::Assistant,
        SessionMessageRole::System => LlmMessageRole::System,
        SessionMessageRole::Tool => LlmMessageRole::User,
    };
    LlmMessage { role, content: m.content.clone() }
}

fn sources_list(sources: &[RagSourceRef]) -> Option<Vec<String>> {
    if sources.is_empty() {
        None
    } else {
        Some(sources.iter().map(|s| s.title.clone()).collect())
    }
}

/// Step 9 (persist) plus step 10 (background memory extraction), run
/// together since both happen after the streaming call completes and
/// neither is on the client-visible critical path.
async fn persist_and_extract(state: &Arc<AppState>, input: &TurnInput, reply: &str, _knowledge_sources: &[RagSourceRef]) {
    if let Err(e) = state.sessions.append_message(&input.conversation_id, SessionMessageRole::User, &input.message, None) {
        warn!(error = %e, "failed to persist user message");
    }
    if let Err(e) = state.sessions.append_message(&input.conversation_id, SessionMessageRole::Assistant, reply, None) {
        warn!(error = %e, "failed to persist assistant message");
    }

    if !state.config.memory.extraction_enabled || reply.trim().is_empty() {
        return;
    }
    let state = state.clone();
    let user_id = input.user_id.as_ref().map(|u| u.as_str().to_string()).unwrap_or_else(|| "anonymous".to_string());
    let user_turn = input.message.clone();
    let assistant_turn = reply.to_string();
    tokio::spawn(async move {
        extract_memories(&state, &user_id, &user_turn, &assistant_turn).await;
    });
}

async fn extract_memories(state: &Arc<AppState>, user_id: &str, user_turn: &str, assistant_turn: &str) {
    let schema = serde_json::json!({
        "type": "object",
        "required": ["memories"],
        "properties": {
            "memories": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["category", "content", "importance"]
                }
            }
        }
    });
    let prompt = format!(
        "From this exchange, extract any durable facts, preferences, instructions or corrections worth remembering about the user long-term. Return an empty list if there's nothing durable.\nUser: {user_turn}\nAssistant: {assistant_turn}\nRespond as JSON: {{\"memories\": [{{\"category\": \"preference\"|\"fact\"|\"instruction\"|\"correction\"|\"context\", \"content\": string, \"importance\": number}}]}}."
    );
    let options = CallOptions { system: "You extract durable long-term memories from a conversation turn.".to_string(), ..Default::default() };
    let Ok(value) = state.llm.complete_json(LlmRole::Intent, &prompt, &schema, options).await else { return };
    let Some(candidates) = value.get("memories").and_then(|v| v.as_array()) else { return };

    for c in candidates {
        let (Some(category_str), Some(content), Some(importance)) =
            (c.get("category").and_then(|v| v.as_str()), c.get("content").and_then(|v| v.as_str()), c.get("importance").and_then(|v| v.as_f64()))
        else {
            continue;
        };
        let Ok(embedding) = state.llm.embed(LlmRole::Intent, content).await else { continue };
        let category = match category_str {
            "preference" => renfield_memory::MemoryCategory::Preference,
            "instruction" => renfield_memory::MemoryCategory::Instruction,
            "correction" => renfield_memory::MemoryCategory::Correction,
            "context" => renfield_memory::MemoryCategory::Context,
            _ => renfield_memory::MemoryCategory::Fact,
        };

        if state.config.memory.contradiction_resolution_enabled {
            match state
                .memory
                .reconcile(
                    user_id,
                    content,
                    &embedding,
                    state.conflict_classifier.as_ref(),
                    state.config.memory.contradiction_threshold,
                    state.config.memory.dedup_threshold,
                )
                .await
            {
                Ok(ReconcileOutcome::Add) => {
                    if let Err(e) = state.memory.insert(user_id, category, content, &embedding, importance as f32, state.config.memory.dedup_threshold, state.config.memory.max_per_user) {
                        warn!(error = %e, "memory insert after reconcile failed");
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "memory reconcile failed"),
            }
        } else if let Err(e) = state.memory.insert(user_id, category, content, &embedding, importance as f32, state.config.memory.dedup_threshold, state.config.memory.max_per_user) {
            warn!(error = %e, "memory insert failed");
        }
    }
}

/// Step 11: only fires for voice-originated turns or an explicit `tts=true`.
/// The client transport (not this function) decides whether it plays the
/// result locally, based on the `tts_handled` flag already emitted above.
async fn maybe_tts_and_route(state: &Arc<AppState>, input: &TurnInput, reply: &str) {
    if !input.wants_tts || reply.trim().is_empty() {
        return;
    }
    let Some(room) = &input.room_id else { return };
    match state.tts.synthesize_text(reply).await {
        Ok(url) => {
            let smart_home = state.smart_home();
            let router = renfield_devices::output_router::OutputRouter::new(&state.devices, &smart_home);
            let prefs: Vec<renfield_devices::output_router::OutputPreference> = Vec::new();
            if let Err(e) = router.route(room, &url, 0.7, &prefs, None).await {
                info!(room = room.as_str(), error = %e, "no output target accepted TTS playback");
            }
        }
        Err(e) => warn!(error = %e, "tts synthesis failed"),
    }
}
