//! Typed envelope shapes for the three WS endpoints (§6.1). These are the
//! payloads carried as `payload`/`params` on the generic `frames` types —
//! the gateway deserializes incoming JSON into these before dispatch and
//! serializes these back out wrapped in a frame.

use serde::{Deserialize, Serialize};

use crate::methods;

/// `/ws` client → server.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatClientMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub session_id: Option<String>,
    pub content: Option<String>,
    #[serde(default)]
    pub use_rag: bool,
    pub knowledge_base_id: Option<String>,
}

/// `/ws` server → client: streamed token delta.
#[derive(Debug, Clone, Serialize)]
pub struct ChatStream {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub content: String,
}

impl ChatStream {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            kind: methods::CHAT_STREAM,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatAgentRole {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatAgentToolCall {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub name: String,
    pub parameters: serde_json::Value,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatAgentToolResult {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub name: String,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatDone {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<String>>,
    pub tts_handled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_steps: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatNotification {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub id: String,
    pub title: String,
    pub message: String,
    pub urgency: String,
    pub room: Option<String>,
    pub tts_handled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatError {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub code: String,
    pub message: String,
}

/// `/ws/device` client → server: initial registration.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceRegister {
    pub device_id: String,
    pub kind: String,
    pub room: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfigAck {
    pub version: u64,
    #[serde(default)]
    pub applied_keywords: Vec<String>,
    #[serde(default)]
    pub failed_keywords: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceConfigUpdate {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub version: u64,
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct DevicePlayAudio {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub url: String,
    pub volume: Option<f32>,
}

/// `/ws/satellite`: wake-word bracketed audio session; text frames interleave
/// with binary PCM chunks sent out-of-band on the same connection.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SatelliteSessionStart {
    #[serde(rename = "type")]
    pub kind: String,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SatelliteSessionEnd {
    #[serde(rename = "type")]
    pub kind: String,
    pub session_id: Option<String>,
}

/// Audio chunk wrapped in JSON when the transport can't carry a raw binary
/// WS frame (some reverse proxies mangle binary frames); base64 payload of
/// interleaved 16-bit PCM at 16 kHz mono.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SatelliteAudioChunk {
    #[serde(rename = "type")]
    pub kind: String,
    pub data_b64: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_client_message_parses_minimal_envelope() {
        let json = r#"{"type":"message","content":"hi"}"#;
        let msg: ChatClientMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.content.as_deref(), Some("hi"));
        assert!(!msg.use_rag);
    }

    #[test]
    fn device_register_requires_device_id_and_kind() {
        let json = r#"{"device_id":"kitchen-1","kind":"satellite","capabilities":["audio_out"]}"#;
        let reg: DeviceRegister = serde_json::from_str(json).unwrap();
        assert_eq!(reg.device_id, "kitchen-1");
        assert_eq!(reg.capabilities, vec!["audio_out".to_string()]);
    }
}
