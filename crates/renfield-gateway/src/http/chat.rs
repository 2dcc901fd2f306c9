//! POST /api/chat/send — the non-streaming fallback for clients that can't
//! hold a WebSocket open. Runs the same turn as `/ws` but buffers every
//! `TurnEvent` into one JSON response instead of streaming it.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use renfield_core::SessionKey;
use serde::{Deserialize, Serialize};

use crate::app::AppState;
use crate::error::GatewayError;
use crate::orchestrator::{self, TurnEvent, TurnInput};

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub message: String,
    pub session_id: Option<String>,
    #[serde(default)]
    pub use_rag: bool,
    pub knowledge_base_id: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct SendResponse {
    pub session_id: String,
    pub reply: String,
    pub sources: Option<Vec<String>>,
    pub tts_handled: bool,
    pub agent_steps: Option<u32>,
}

pub async fn send_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SendRequest>,
) -> Result<Json<SendResponse>, GatewayError> {
    let key = match &req.session_id {
        Some(id) => SessionKey::parse(id).map_err(renfield_core::RenfieldError::InputInvalid)?,
        None => SessionKey::generate(),
    };

    let session = state.sessions.get_or_create(key.clone());
    let mut guard = session.lock().await;
    let conversation_id = state.sessions.ensure_conversation(&mut guard)?;
    let input = TurnInput {
        conversation_id,
        user_id: guard.user_id.clone(),
        room_id: guard.room_id.clone(),
        message: req.message,
        use_rag: req.use_rag,
        knowledge_base_id: req.knowledge_base_id,
        caller_role: None,
        wants_tts: false,
    };
    drop(guard);

    let mut response = SendResponse { session_id: key.as_str().to_string(), ..Default::default() };
    let mut reply = String::new();
    orchestrator::run_turn(&state, input, |event| match event {
        TurnEvent::TextDelta { text } => reply.push_str(&text),
        TurnEvent::Done { sources, tts_handled, agent_steps } => {
            response.sources = sources;
            response.tts_handled = tts_handled;
            response.agent_steps = agent_steps;
        }
        TurnEvent::AgentRole { .. } | TurnEvent::ToolCall { .. } | TurnEvent::ToolResult { .. } => {}
    })
    .await;
    response.reply = reply;

    Ok(Json(response))
}
