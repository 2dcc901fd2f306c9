//! The three WebSocket endpoints (§6.1): chat, device, satellite. Each
//! connection gets its own task that owns the split `WebSocket` sink and
//! drives a `tokio::select!` loop over inbound frames, outbound turn
//! events, and (for chat) the shared notification fan-out.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use renfield_core::{ConnId, DeviceId, RoomId, SessionKey};
use renfield_devices::types::{DeviceCapabilities, DeviceKind};
use renfield_devices::DeviceError;
use renfield_protocol::envelopes::{
    ChatAgentRole, ChatAgentToolCall, ChatAgentToolResult, ChatClientMessage, ChatDone, ChatStream,
    DeviceConfigAck, DeviceRegister, SatelliteAudioChunk, SatelliteSessionEnd, SatelliteSessionStart,
};
use renfield_protocol::methods;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::app::AppState;
use crate::error::chat_error;
use crate::orchestrator::{self, TurnEvent, TurnInput};

pub use crate::ws::broadcast::ConnectionRegistry;

fn turn_event_to_json(event: TurnEvent) -> Value {
    match event {
        TurnEvent::AgentRole { name } => serde_json::to_value(ChatAgentRole { kind: methods::CHAT_AGENT_ROLE, name }),
        TurnEvent::TextDelta { text } => serde_json::to_value(ChatStream::new(text)),
        TurnEvent::ToolCall { name, parameters, reason } => serde_json::to_value(ChatAgentToolCall {
            kind: methods::CHAT_AGENT_TOOL_CALL,
            name,
            parameters,
            reason: Some(reason),
        }),
        TurnEvent::ToolResult { name, result, error } => {
            serde_json::to_value(ChatAgentToolResult { kind: methods::CHAT_AGENT_TOOL_RESULT, name, result, error })
        }
        TurnEvent::Done { sources, tts_handled, agent_steps } => {
            serde_json::to_value(ChatDone { kind: methods::CHAT_DONE, sources, tts_handled, agent_steps })
        }
    }
    .unwrap_or_else(|_| serde_json::json!({"type": "error", "code": "internal", "message": "failed to encode event"}))
}

async fn send_json(sink: &mut futures_util::stream::SplitSink<WebSocket, Message>, value: &Value) -> bool {
    let text = serde_json::to_string(value).unwrap_or_default();
    sink.send(Message::Text(text.into())).await.is_ok()
}

/// GET /ws
pub async fn chat_ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_chat(socket, state))
}

async fn handle_chat(socket: WebSocket, state: Arc<AppState>) {
    let conn_id = ConnId::new();
    info!(conn_id = %conn_id.as_str(), "chat WS connected");

    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<TurnEvent>();
    let mut notif_rx = state.chat_connections.subscribe();

    let mut session_key: Option<SessionKey> = None;

    loop {
        tokio::select! {
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if text.len() > state.config.ws.max_message_bytes {
                            warn!(conn_id = %conn_id.as_str(), "chat message too large, dropping connection");
                            break;
                        }
                        let parsed: ChatClientMessage = match serde_json::from_str(&text) {
                            Ok(p) => p,
                            Err(e) => {
                                warn!(conn_id = %conn_id.as_str(), error = %e, "malformed chat envelope");
                                continue;
                            }
                        };
                        if parsed.kind != methods::CHAT_CLIENT_MESSAGE {
                            continue;
                        }
                        let Some(content) = parsed.content else { continue };

                        let key = match &parsed.session_id {
                            Some(id) => SessionKey::parse(id).unwrap_or_else(|_| SessionKey::generate()),
                            None => session_key.clone().unwrap_or_else(SessionKey::generate),
                        };
                        session_key = Some(key.clone());

                        let session = state.sessions.get_or_create(key);
                        let state_for_turn = state.clone();
                        let out_tx = out_tx.clone();
                        tokio::spawn(async move {
                            // Holding the session lock for the whole turn serializes
                            // overlapping turns on the same session (§4.12, §5).
                            let mut guard = session.lock().await;
                            let conversation_id = match state_for_turn.sessions.ensure_conversation(&mut guard) {
                                Ok(id) => id,
                                Err(e) => {
                                    warn!(error = %e, "could not create conversation");
                                    return;
                                }
                            };
                            let input = TurnInput {
                                conversation_id,
                                user_id: guard.user_id.clone(),
                                room_id: guard.room_id.clone(),
                                message: content,
                                use_rag: parsed.use_rag,
                                knowledge_base_id: parsed.knowledge_base_id.clone(),
                                caller_role: None,
                                wants_tts: false,
                            };
                            orchestrator::run_turn(&state_for_turn, input, move |event| {
                                let _ = out_tx.send(event);
                            })
                            .await;
                        });
                    }
                    Some(Ok(Message::Ping(data))) => { let _ = sink.send(Message::Pong(data)).await; }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(conn_id = %conn_id.as_str(), error = %e, "chat WS read error");
                        break;
                    }
                    _ => {}
                }
            }
            Some(event) = out_rx.recv() => {
                if !send_json(&mut sink, &turn_event_to_json(event)).await {
                    break;
                }
            }
            Ok(payload) = notif_rx.recv() => {
                if sink.send(Message::Text(payload.into())).await.is_err() {
                    break;
                }
            }
        }
    }

    if let Some(key) = session_key {
        state.sessions.close(&key);
    }
    info!(conn_id = %conn_id.as_str(), "chat WS closed");
}

/// `DeviceTransport` backed by an mpsc channel to this connection's send
/// task — `DeviceManager::send_to`/`broadcast_to_room` call `send_json`
/// from arbitrary tasks, so the transport can't own the `WebSocket` sink
/// directly.
struct WsDeviceTransport {
    tx: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl renfield_devices::DeviceTransport for WsDeviceTransport {
    async fn send_json(&self, payload: Value) -> Result<(), DeviceError> {
        let text = serde_json::to_string(&payload).map_err(|e| DeviceError::SendFailed(e.to_string()))?;
        self.tx.send(text).map_err(|_| DeviceError::SendFailed("connection closed".to_string()))
    }

    fn is_alive(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// GET /ws/device
pub async fn device_ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_device(socket, state, addr))
}

async fn handle_device(socket: WebSocket, state: Arc<AppState>, addr: SocketAddr) {
    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let mut device_id: Option<DeviceId> = None;

    loop {
        tokio::select! {
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if device_id.is_none() {
                            match serde_json::from_str::<DeviceRegister>(&text) {
                                Ok(reg) => {
                                    let id = DeviceId::from(reg.device_id.clone());
                                    let kind = match reg.kind.as_str() {
                                        "satellite" => DeviceKind::Satellite,
                                        "web_panel" => DeviceKind::WebPanel,
                                        "web_tablet" => DeviceKind::WebTablet,
                                        "web_kiosk" => DeviceKind::WebKiosk,
                                        _ => DeviceKind::WebBrowser,
                                    };
                                    let capabilities = DeviceCapabilities {
                                        has_microphone: reg.capabilities.iter().any(|c| c == "audio_in"),
                                        has_speaker: reg.capabilities.iter().any(|c| c == "audio_out"),
                                        has_display: reg.capabilities.iter().any(|c| c == "display"),
                                        supports_local_wake_word: reg.capabilities.iter().any(|c| c == "wake_word"),
                                    };
                                    let room = reg.room.as_deref().map(RoomId::from);
                                    let transport = Arc::new(WsDeviceTransport { tx: out_tx.clone() });
                                    state.devices.register(id.clone(), kind, room, capabilities, Some(addr.ip()), transport);
                                    info!(device_id = %id.as_str(), "device registered");
                                    device_id = Some(id);
                                }
                                Err(e) => {
                                    warn!(error = %e, "malformed device registration, closing");
                                    break;
                                }
                            }
                            continue;
                        }

                        let Some(id) = &device_id else { continue };
                        if let Ok(ack) = serde_json::from_str::<DeviceConfigAck>(&text) {
                            let applied = ack.failed_keywords.is_empty();
                            state.devices.record_config_ack(id, applied);
                            continue;
                        }
                        if let Ok(v) = serde_json::from_str::<Value>(&text) {
                            if v.get("type").and_then(|t| t.as_str()) == Some(methods::DEVICE_HEARTBEAT) {
                                state.devices.heartbeat(id);
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => { let _ = sink.send(Message::Pong(data)).await; }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(error = %e, "device WS read error");
                        break;
                    }
                    _ => {}
                }
            }
            Some(text) = out_rx.recv() => {
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
        }
    }

    if let Some(id) = device_id {
        state.devices.unregister(&id);
        info!(device_id = %id.as_str(), "device disconnected");
    }
}

#[derive(Deserialize)]
pub struct SatelliteQuery {
    pub device_id: Option<String>,
}

/// GET /ws/satellite
pub async fn satellite_ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<SatelliteQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_satellite(socket, state, query.device_id))
}

async fn handle_satellite(socket: WebSocket, state: Arc<AppState>, device_id: Option<String>) {
    let (mut sink, mut stream) = socket.split();
    let mut session_key: Option<SessionKey> = None;
    let max_audio = state.sessions.max_audio_buffer_size();

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Binary(data)) => {
                let Some(key) = &session_key else { continue };
                let session = state.sessions.get_or_create(key.clone());
                let mut guard = session.lock().await;
                if let Err(e) = guard.push_audio(&data, max_audio) {
                    warn!(error = %e, "satellite audio buffer rejected chunk");
                }
            }
            Ok(Message::Text(text)) => {
                if let Ok(start) = serde_json::from_str::<SatelliteSessionStart>(&text) {
                    if start.kind == methods::SATELLITE_SESSION_START {
                        let device = device_id.clone().unwrap_or_else(|| "unknown-satellite".to_string());
                        let stable = start.session_id.and_then(|s| SessionKey::parse(&s).ok());
                        let key = renfield_sessions::manager::SessionManager::satellite_key(&device, stable, chrono::Utc::now());
                        session_key = Some(key.clone());
                        // Room assignment for a satellite session comes from its
                        // `/ws/device` registration, not this audio channel; left
                        // unset here and filled in administratively if needed.
                        let _ = state.sessions.get_or_create(key);
                        continue;
                    }
                }
                if let Ok(chunk) = serde_json::from_str::<SatelliteAudioChunk>(&text) {
                    if chunk.kind == methods::SATELLITE_AUDIO_CHUNK {
                        if let Ok(bytes) = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, &chunk.data_b64) {
                            if let Some(key) = &session_key {
                                let session = state.sessions.get_or_create(key.clone());
                                let mut guard = session.lock().await;
                                if let Err(e) = guard.push_audio(&bytes, max_audio) {
                                    warn!(error = %e, "satellite audio buffer rejected chunk");
                                }
                            }
                        }
                        continue;
                    }
                }
                if let Ok(end) = serde_json::from_str::<SatelliteSessionEnd>(&text) {
                    if end.kind == methods::SATELLITE_SESSION_END {
                        let Some(key) = session_key.clone() else { continue };
                        let session = state.sessions.get_or_create(key.clone());
                        let audio = {
                            let mut guard = session.lock().await;
                            guard.take_audio()
                        };
                        if audio.is_empty() {
                            continue;
                        }
                        if let Err(e) = run_satellite_turn(&state, session, audio).await {
                            let payload = serde_json::to_value(chat_error(&e.0)).unwrap_or_default();
                            let _ = send_json(&mut sink, &payload).await;
                        }
                    }
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }
}

async fn run_satellite_turn(
    state: &Arc<AppState>,
    session: Arc<tokio::sync::Mutex<renfield_sessions::types::SessionState>>,
    audio: Vec<u8>,
) -> Result<(), crate::error::GatewayError> {
    let transcript = state.stt.transcribe(audio.clone(), "audio/pcm").await?;

    let mut guard = session.lock().await;
    if let Some(speaker_id) = &state.speaker_id {
        if let Some((user, confidence)) = speaker_id.identify(&audio).await {
            if confidence >= 0.7 {
                guard.user_id = Some(user);
            }
        }
    }
    let conversation_id = state.sessions.ensure_conversation(&mut guard)?;
    let input = TurnInput {
        conversation_id,
        user_id: guard.user_id.clone(),
        room_id: guard.room_id.clone(),
        message: transcript,
        use_rag: true,
        knowledge_base_id: None,
        caller_role: None,
        wants_tts: true,
    };
    let state = state.clone();
    orchestrator::run_turn(&state, input, |_event| {}).await;
    Ok(())
}
