//! Wires the trait seams every subsystem crate exposes (so it never depends
//! on its siblings directly) to the concrete collaborators this binary owns:
//! the LLM Gateway, the Tool Registry, and the Device Manager.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use renfield_agent::agent_loop::ToolCatalog;
use renfield_agent::gateway::{CallOptions, LlmGateway, LlmRole};
use renfield_agent::provider::{Message, MessageRole};
use renfield_core::types::UserId;
use renfield_devices::output_router::{SmartHomeMediaPlayerState, SmartHomeMediaState};
use renfield_memory::{ConflictClassifier, ConflictDecision};
use renfield_notify::poller::ToolExecutor as NotifyToolExecutor;
use renfield_notify::reminder_scheduler::ActiveRoomLookup;
use renfield_notify::service::{Embedder, Enricher, TtsSynthesizer, UrgencyClassifier};
use renfield_notify::types::Urgency;
use renfield_tools::registry::ToolRegistry;
use serde_json::{json, Value};
use tracing::warn;

/// `ToolCatalog` seen by one Agent Loop turn, scoped to the caller's role
/// permissions for that turn (§4.9). `ToolRegistry::catalog` is async but
/// `ToolCatalog::tool_names` isn't (Agent Loop reads it on every step), so
/// the orchestrator snapshots the catalog once at turn start and hands the
/// names in here rather than re-fetching mid-loop.
pub struct AgentToolCatalog {
    registry: Arc<ToolRegistry>,
    role: Option<renfield_core::permissions::Role>,
    names: Vec<String>,
}

impl AgentToolCatalog {
    pub async fn new(registry: Arc<ToolRegistry>, role: Option<renfield_core::permissions::Role>) -> Self {
        let names = registry.catalog().await.into_iter().map(|d| d.name).collect();
        Self { registry, role, names }
    }
}

#[async_trait]
impl ToolCatalog for AgentToolCatalog {
    fn tool_names(&self) -> Vec<String> {
        self.names.clone()
    }

    async fn execute(&self, tool_name: &str, params: Value, _caller_user: &UserId) -> Result<Value, String> {
        self.registry
            .execute(tool_name, params, self.role.as_ref())
            .await
            .map_err(|e| e.to_string())
    }
}

/// Backs `renfield-notify`'s proactive event poller with the Tool Registry,
/// so capability servers surfacing scheduled events (calendar reminders,
/// package deliveries) reach `NotificationService::ingest` the same way a
/// direct tool call would.
pub struct RegistryToolExecutor {
    registry: Arc<ToolRegistry>,
}

impl RegistryToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl NotifyToolExecutor for RegistryToolExecutor {
    async fn execute(&self, server: &str, tool: &str, args: Value) -> Result<Value, String> {
        let qualified = format!("mcp.{server}.{tool}");
        self.registry.execute(&qualified, args, None).await.map_err(|e| e.to_string())
    }
}

/// Classifies a raw event's urgency via the `intent` role (§4.14 step 4).
pub struct LlmUrgencyClassifier {
    gateway: Arc<LlmGateway>,
}

impl LlmUrgencyClassifier {
    pub fn new(gateway: Arc<LlmGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl UrgencyClassifier for LlmUrgencyClassifier {
    async fn classify(&self, title: &str, message: &str) -> Option<Urgency> {
        let schema = json!({"required": ["urgency"]});
        let prompt = format!(
            "Classify the urgency of this household event as exactly one of \"critical\", \"info\", or \"low\".\nTitle: {title}\nMessage: {message}\nRespond as JSON: {{\"urgency\": \"...\"}}"
        );
        let result = self
            .gateway
            .complete_json(LlmRole::Intent, &prompt, &schema, CallOptions::default())
            .await
            .ok()?;
        result.get("urgency")?.as_str()?.parse().ok()
    }
}

/// Rewrites a raw event into a natural utterance via `chat_stream` collected
/// to completion (§4.14 step 5). Returns `None` if the rewrite doesn't finish
/// inside `timeout`, in which case `NotificationService` falls back to the
/// original message text.
pub struct LlmEnricher {
    gateway: Arc<LlmGateway>,
}

impl LlmEnricher {
    pub fn new(gateway: Arc<LlmGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Enricher for LlmEnricher {
    async fn enrich(&self, message: &str, timeout: Duration) -> Option<String> {
        let options = CallOptions {
            system: "Rewrite the event as a single short, natural spoken sentence. No preamble.".to_string(),
            timeout: Some(timeout),
            ..Default::default()
        };
        let messages = vec![Message { role: MessageRole::User, content: message.to_string() }];
        let mut stream = self.gateway.chat_stream(LlmRole::Chat, messages, options).await.ok()?;

        let mut text = String::new();
        while let Some(event) = stream.rx.recv().await {
            match event {
                renfield_agent::stream::StreamEvent::TextDelta { text: delta } => text.push_str(&delta),
                renfield_agent::stream::StreamEvent::Done { .. } => break,
                renfield_agent::stream::StreamEvent::Error { message } => {
                    warn!(error = %message, "enrichment stream failed");
                    return None;
                }
            }
        }
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

/// Embedding provider for semantic notification dedup (§4.14 step 2b).
pub struct LlmEmbedder {
    gateway: Arc<LlmGateway>,
}

impl LlmEmbedder {
    pub fn new(gateway: Arc<LlmGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Embedder for LlmEmbedder {
    async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        self.gateway.embed(LlmRole::Intent, text).await.ok()
    }
}

/// Memory reconciliation's conflict classifier, via a single `complete_json`
/// call against the `intent` role (§4.6 step 3).
pub struct LlmConflictClassifier {
    gateway: Arc<LlmGateway>,
}

impl LlmConflictClassifier {
    pub fn new(gateway: Arc<LlmGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl ConflictClassifier for LlmConflictClassifier {
    async fn classify(&self, existing_content: &str, candidate_content: &str) -> ConflictDecision {
        let schema = json!({"required": ["decision"]});
        let prompt = format!(
            "An existing memory says: \"{existing_content}\"\nA new candidate memory says: \"{candidate_content}\"\n\
             Decide how the candidate should be reconciled with the existing memory. Respond as JSON: \
             {{\"decision\": one of \"add\" (unrelated, keep both), \"update\" (candidate supersedes existing), \
             \"delete\" (candidate invalidates existing with no replacement), \"noop\" (candidate is redundant)}}"
        );
        let result = self
            .gateway
            .complete_json(LlmRole::Intent, &prompt, &schema, CallOptions::default())
            .await;
        match result.ok().and_then(|v| v.get("decision")?.as_str().map(str::to_string)).as_deref() {
            Some("update") => ConflictDecision::Update,
            Some("delete") => ConflictDecision::Delete,
            Some("noop") => ConflictDecision::Noop,
            _ => ConflictDecision::Add,
        }
    }
}

/// Resolves a user's current room from their most recently heartbeated
/// speaker-capable device, so a fired reminder reaches them without a
/// house-wide broadcast (§4.16).
pub struct DeviceActiveRoomLookup {
    devices: Arc<renfield_devices::DeviceManager>,
    sessions: Arc<renfield_sessions::manager::SessionManager>,
}

impl DeviceActiveRoomLookup {
    pub fn new(devices: Arc<renfield_devices::DeviceManager>, sessions: Arc<renfield_sessions::manager::SessionManager>) -> Self {
        Self { devices, sessions }
    }
}

impl ActiveRoomLookup for DeviceActiveRoomLookup {
    fn active_room(&self, user_id: &str) -> Option<String> {
        let _ = &self.sessions;
        // Device records aren't keyed by user today (§9 Open Question: no
        // per-device user binding yet), so this resolves "any room with a
        // live speaker" rather than "this user's room" until that lands.
        let _ = user_id;
        self.devices
            .find_speakers_in_room(&renfield_core::RoomId::unassigned())
            .first()
            .map(|_| renfield_core::RoomId::unassigned().to_string())
    }
}

/// Queries a Home Assistant-style capability server's media-player state
/// tool through the Tool Registry, so the Output Router's smart-home branch
/// never depends on a home automation client directly.
pub struct ToolRegistrySmartHome {
    registry: Arc<ToolRegistry>,
}

impl ToolRegistrySmartHome {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl SmartHomeMediaState for ToolRegistrySmartHome {
    async fn state(&self, entity_id: &str) -> SmartHomeMediaPlayerState {
        let result = self
            .registry
            .execute("mcp.homeassistant.media_player_state", json!({"entity_id": entity_id}), None)
            .await;
        match result {
            Ok(v) => match v.get("state").and_then(|s| s.as_str()) {
                Some("idle") => SmartHomeMediaPlayerState::Idle,
                Some("paused") => SmartHomeMediaPlayerState::Paused,
                Some("standby") => SmartHomeMediaPlayerState::Standby,
                Some("playing") => SmartHomeMediaPlayerState::Playing,
                Some("buffering") => SmartHomeMediaPlayerState::Buffering,
                Some("off") => SmartHomeMediaPlayerState::Off,
                _ => SmartHomeMediaPlayerState::Unknown,
            },
            Err(_) => SmartHomeMediaPlayerState::Unreachable,
        }
    }
}

/// TTS collaborator backed by an external HTTP synthesis service (§4.1,
/// §4.14). Kept thin: POST text in, get a cache-relative URL back.
pub struct HttpTts {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpTts {
    pub fn new(base_url: String, timeout: Duration) -> Self {
        Self { client: reqwest::Client::new(), base_url, timeout }
    }

    pub async fn synthesize_text(&self, text: &str) -> Result<String, crate::error::GatewayError> {
        #[derive(serde::Deserialize)]
        struct TtsResponse {
            url: String,
        }
        let resp = self
            .client
            .post(format!("{}/synthesize", self.base_url))
            .json(&json!({"text": text}))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| renfield_core::RenfieldError::ToolFailed { tool: "tts".to_string(), reason: e.to_string() })?;
        if !resp.status().is_success() {
            let status = resp.status();
            return Err(renfield_core::RenfieldError::ToolFailed {
                tool: "tts".to_string(),
                reason: format!("tts service returned {status}"),
            }
            .into());
        }
        let parsed: TtsResponse = resp
            .json()
            .await
            .map_err(|e| renfield_core::RenfieldError::LlmMalformedOutput(e.to_string()))?;
        Ok(parsed.url)
    }
}

#[async_trait]
impl TtsSynthesizer for HttpTts {
    async fn synthesize(&self, text: &str) -> Option<String> {
        self.synthesize_text(text).await.ok()
    }
}

/// STT collaborator backed by an external HTTP transcription service. Used
/// directly by the `/ws` and `/api/voice/stt` handlers, not through a
/// subsystem trait seam (transcription is step 1 of the Orchestrator turn,
/// owned by this crate rather than by any one subsystem).
pub struct HttpStt {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpStt {
    pub fn new(base_url: String, timeout: Duration) -> Self {
        Self { client: reqwest::Client::new(), base_url, timeout }
    }

    pub async fn transcribe(&self, audio: Vec<u8>, content_type: &str) -> Result<String, crate::error::GatewayError> {
        #[derive(serde::Deserialize)]
        struct SttResponse {
            text: String,
        }
        let resp = self
            .client
            .post(format!("{}/transcribe", self.base_url))
            .header("content-type", content_type)
            .body(audio)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| renfield_core::RenfieldError::ToolFailed { tool: "stt".to_string(), reason: e.to_string() })?;
        if !resp.status().is_success() {
            let status = resp.status();
            return Err(renfield_core::RenfieldError::ToolFailed {
                tool: "stt".to_string(),
                reason: format!("stt service returned {status}"),
            }
            .into());
        }
        let parsed: SttResponse = resp
            .json()
            .await
            .map_err(|e| renfield_core::RenfieldError::LlmMalformedOutput(e.to_string()))?;
        Ok(parsed.text)
    }
}

/// Optional speaker identification. No capability server or collaborator for
/// this exists anywhere upstream (§9 Open Question); every turn resolves to
/// `UserId::anonymous()` unless `voice.speaker_id_url` is configured, in
/// which case this hits that endpoint the same way `HttpStt` hits its own.
pub struct HttpSpeakerId {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpSpeakerId {
    pub fn new(base_url: String, timeout: Duration) -> Self {
        Self { client: reqwest::Client::new(), base_url, timeout }
    }

    pub async fn identify(&self, audio: &[u8]) -> Option<(UserId, f32)> {
        #[derive(serde::Deserialize)]
        struct IdResponse {
            user_id: String,
            confidence: f32,
        }
        let resp = self
            .client
            .post(format!("{}/identify", self.base_url))
            .header("content-type", "application/octet-stream")
            .body(audio.to_vec())
            .timeout(self.timeout)
            .send()
            .await
            .ok()?;
        if !resp.status().is_success() {
            return None;
        }
        let parsed: IdResponse = resp.json().await.ok()?;
        Some((UserId::from(parsed.user_id), parsed.confidence))
    }
}
