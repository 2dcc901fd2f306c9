use chrono::{DateTime, Utc};
use renfield_core::{RoomId, SessionKey, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SessionError};

/// A Message's role (I1: every Message belongs to exactly one Conversation;
/// turn indices strictly increase within it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
            Self::Tool => "tool",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for MessageRole {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            "tool" => Ok(Self::Tool),
            other => Err(SessionError::ConversationNotFound(format!("unknown message role: {other}"))),
        }
    }
}

/// The persisted sequence-of-messages entity (§3 Conversation). Survives the
/// session that created it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One append-only turn in a Conversation (§3 Message).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub conversation_id: String,
    pub turn_index: i64,
    pub role: MessageRole,
    pub content: String,
    /// Raw JSON the capability server returned, stored verbatim rather than
    /// normalized (Open Question resolution in SPEC_FULL.md §9).
    pub tool_calls: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// A single retrieved-knowledge attribution cached on the session so a
/// follow-up turn can reference "that document" without re-retrieving.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagSourceRef {
    pub document_id: String,
    pub chunk_id: String,
    pub title: String,
    pub score: f32,
}

/// Per-WebSocket-session in-memory state (§4.12). Not persisted directly —
/// only its effects (Conversation/Message rows) survive the session.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub key: SessionKey,
    pub conversation_id: Option<String>,
    pub user_id: Option<UserId>,
    pub room_id: Option<RoomId>,
    pub audio_buffer: Vec<u8>,
    pub last_rag_sources: Vec<RagSourceRef>,
    pub last_agent_role: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SessionState {
    pub fn new(key: SessionKey) -> Self {
        Self {
            key,
            conversation_id: None,
            user_id: None,
            room_id: None,
            audio_buffer: Vec::new(),
            last_rag_sources: Vec::new(),
            last_agent_role: None,
            created_at: Utc::now(),
        }
    }

    /// Append a chunk to the bounded audio-input buffer, rejecting once the
    /// total would exceed `max_bytes` (default 10 MiB, §4.12).
    pub fn push_audio(&mut self, chunk: &[u8], max_bytes: usize) -> Result<()> {
        if self.audio_buffer.len() + chunk.len() > max_bytes {
            return Err(SessionError::AudioBufferFull { limit: max_bytes });
        }
        self.audio_buffer.extend_from_slice(chunk);
        Ok(())
    }

    pub fn take_audio(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.audio_buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_audio_rejects_once_over_cap() {
        let mut state = SessionState::new(SessionKey::generate());
        assert!(state.push_audio(&[0u8; 10], 16).is_ok());
        assert!(state.push_audio(&[0u8; 10], 16).is_err());
    }

    #[test]
    fn take_audio_drains_buffer() {
        let mut state = SessionState::new(SessionKey::generate());
        state.push_audio(&[1, 2, 3], 16).unwrap();
        let taken = state.take_audio();
        assert_eq!(taken, vec![1, 2, 3]);
        assert!(state.audio_buffer.is_empty());
    }

    #[test]
    fn message_role_round_trips_through_str() {
        for role in [MessageRole::User, MessageRole::Assistant, MessageRole::System, MessageRole::Tool] {
            let parsed: MessageRole = role.to_string().parse().unwrap();
            assert_eq!(role, parsed);
        }
    }
}
