//! `/api/voice/*` — REST counterparts to the voice pipeline steps the
//! Orchestrator runs inline over the satellite WS. Useful for clients that
//! record audio out of band (a web form upload) rather than streaming PCM
//! over a socket.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::app::AppState;
use crate::error::GatewayError;

#[derive(Debug, Serialize)]
pub struct SttResponse {
    pub text: String,
}

/// POST /api/voice/stt — multipart upload with an `audio` field.
pub async fn stt_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<SttResponse>, GatewayError> {
    let mut audio: Option<Vec<u8>> = None;
    let mut content_type = "audio/wav".to_string();

    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() != Some("audio") {
            continue;
        }
        if let Some(ct) = field.content_type() {
            content_type = ct.to_string();
        }
        audio = field.bytes().await.ok().map(|b| b.to_vec());
    }

    let audio = audio.ok_or_else(|| {
        GatewayError(renfield_core::RenfieldError::InputInvalid("missing 'audio' multipart field".to_string()))
    })?;

    let text = state.stt.transcribe(audio, &content_type).await?;
    Ok(Json(SttResponse { text }))
}

#[derive(Debug, Deserialize)]
pub struct TtsRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct TtsResponse {
    pub url: String,
}

/// POST /api/voice/tts — synthesize and return the cache-relative URL the
/// caller then fetches from `tts_cache_handler`.
pub async fn tts_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TtsRequest>,
) -> Result<Json<TtsResponse>, GatewayError> {
    let url = state.tts.synthesize_text(&req.text).await?;
    Ok(Json(TtsResponse { url }))
}

/// GET /api/voice/tts-cache/:id — serves a previously synthesized clip out
/// of the configured cache directory.
pub async fn tts_cache_handler(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    if id.contains('/') || id.contains("..") {
        return StatusCode::BAD_REQUEST.into_response();
    }
    let path: PathBuf = [state.config.voice.tts_cache_dir.as_str(), id.as_str()].iter().collect();
    match tokio::fs::read(&path).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, "audio/mpeg")], bytes).into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}
