use std::str::FromStr;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use renfield_core::SessionKey;
use tokio::sync::Mutex as AsyncMutex;
use tracing::instrument;
use uuid::Uuid;

use crate::error::{Result, SessionError};
use crate::types::{Conversation, Message, MessageRole, SessionState};

/// Registers and serializes per-WebSocket-session state (§4.12), and owns
/// the append-only Conversation/Message persistence that outlives any one
/// session.
pub struct SessionManager {
    db: StdMutex<rusqlite::Connection>,
    sessions: DashMap<SessionKey, Arc<AsyncMutex<SessionState>>>,
    max_audio_buffer_size: usize,
}

impl SessionManager {
    pub fn new(conn: rusqlite::Connection, max_audio_buffer_size: usize) -> Self {
        Self {
            db: StdMutex::new(conn),
            sessions: DashMap::new(),
            max_audio_buffer_size,
        }
    }

    pub fn max_audio_buffer_size(&self) -> usize {
        self.max_audio_buffer_size
    }

    /// Fetch the live session for `key`, creating fresh in-memory state on
    /// first use. The returned mutex is what callers lock for the duration
    /// of one turn, serializing turn processing within the session.
    pub fn get_or_create(&self, key: SessionKey) -> Arc<AsyncMutex<SessionState>> {
        self.sessions
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(SessionState::new(key))))
            .clone()
    }

    /// §4.12: a satellite without a client-supplied stable id gets a new
    /// session key once per 24-hour window, keyed by device id and UTC day.
    pub fn satellite_key(device_id: &str, stable_id: Option<SessionKey>, now: DateTime<Utc>) -> SessionKey {
        stable_id.unwrap_or_else(|| {
            let day = now.format("%Y-%m-%d");
            SessionKey::parse(&format!("sess:sat:{device_id}:{day}")).expect("constructed key is never empty")
        })
    }

    /// Destroy in-memory session state on transport close. Conversation and
    /// Message rows are untouched — they survive the session (§4.12).
    pub fn close(&self, key: &SessionKey) {
        self.sessions.remove(key);
    }

    /// Lazily create the Conversation backing a session's first turn;
    /// subsequent turns reuse the same id for the session's lifetime.
    #[instrument(skip(self, state))]
    pub fn ensure_conversation(&self, state: &mut SessionState) -> Result<String> {
        if let Some(id) = &state.conversation_id {
            return Ok(id.clone());
        }
        let id = Uuid::now_v7().to_string();
        let now = Utc::now();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO conversations (id, user_id, created_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![id, state.user_id.as_ref().map(|u| u.0.clone()), now.to_rfc3339()],
        )?;
        state.conversation_id = Some(id.clone());
        Ok(id)
    }

    /// Append a Message, assigning the next monotonic `turn_index` inside
    /// the same transaction as the insert so two overlapping turns on the
    /// same conversation never produce a duplicate or out-of-order index
    /// (I1).
    #[instrument(skip(self, content, tool_calls))]
    pub fn append_message(
        &self,
        conversation_id: &str,
        role: MessageRole,
        content: &str,
        tool_calls: Option<serde_json::Value>,
    ) -> Result<i64> {
        let now = Utc::now();
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        let next_index: i64 = tx.query_row(
            "SELECT COALESCE(MAX(turn_index), -1) + 1 FROM messages WHERE conversation_id = ?1",
            rusqlite::params![conversation_id],
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT INTO messages (conversation_id, turn_index, role, content, tool_calls, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                conversation_id,
                next_index,
                role.to_string(),
                content,
                tool_calls.map(|v| v.to_string()),
                now.to_rfc3339(),
            ],
        )?;
        tx.commit()?;
        Ok(next_index)
    }

    /// Tail of the last `limit` messages in a conversation, oldest first —
    /// the short-term context window the Orchestrator loads each turn
    /// (§4.17 step 3).
    pub fn recent_messages(&self, conversation_id: &str, limit: usize) -> Result<Vec<Message>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT conversation_id, turn_index, role, content, tool_calls, created_at
             FROM messages WHERE conversation_id = ?1
             ORDER BY turn_index DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(rusqlite::params![conversation_id, limit as i64], row_to_message)?;
        let mut messages: Vec<Message> = rows.filter_map(|r| r.ok()).collect();
        messages.reverse();
        Ok(messages)
    }

    pub fn get_conversation(&self, conversation_id: &str) -> Result<Conversation> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT id, user_id, created_at FROM conversations WHERE id = ?1",
            rusqlite::params![conversation_id],
            |row| {
                Ok(Conversation {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    created_at: parse_rfc3339(row.get::<_, String>(2)?),
                })
            },
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => SessionError::ConversationNotFound(conversation_id.to_string()),
            other => SessionError::Database(other),
        })
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let role_str: String = row.get(2)?;
    let tool_calls: Option<String> = row.get(4)?;
    Ok(Message {
        conversation_id: row.get(0)?,
        turn_index: row.get(1)?,
        role: MessageRole::from_str(&role_str).unwrap_or(MessageRole::System),
        content: row.get(3)?,
        tool_calls: tool_calls.and_then(|s| serde_json::from_str(&s).ok()),
        created_at: parse_rfc3339(row.get::<_, String>(5)?),
    })
}

fn parse_rfc3339(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s).map(|dt| dt.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn manager() -> SessionManager {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        SessionManager::new(conn, 10 * 1024 * 1024)
    }

    #[tokio::test]
    async fn get_or_create_returns_same_session_for_same_key() {
        let mgr = manager();
        let key = SessionKey::generate();
        let a = mgr.get_or_create(key.clone());
        let b = mgr.get_or_create(key);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn conversation_id_is_stable_across_turns() {
        let mgr = manager();
        let session = mgr.get_or_create(SessionKey::generate());
        let first = {
            let mut state = session.lock().await;
            mgr.ensure_conversation(&mut state).unwrap()
        };
        let second = {
            let mut state = session.lock().await;
            mgr.ensure_conversation(&mut state).unwrap()
        };
        assert_eq!(first, second);
    }

    #[test]
    fn append_message_assigns_strictly_increasing_turn_index() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        let mgr = SessionManager::new(conn, 10 * 1024 * 1024);
        let conversation_id = "conv-1";
        mgr.db
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO conversations (id, user_id, created_at) VALUES (?1, NULL, ?2)",
                rusqlite::params![conversation_id, Utc::now().to_rfc3339()],
            )
            .unwrap();

        let i0 = mgr.append_message(conversation_id, MessageRole::User, "hi", None).unwrap();
        let i1 = mgr.append_message(conversation_id, MessageRole::Assistant, "hello", None).unwrap();
        assert_eq!(i0, 0);
        assert_eq!(i1, 1);
    }

    #[test]
    fn satellite_key_uses_stable_id_when_supplied() {
        let stable = SessionKey::generate();
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let resolved = SessionManager::satellite_key("sat-1", Some(stable.clone()), now);
        assert_eq!(resolved, stable);
    }

    #[test]
    fn satellite_key_without_stable_id_is_stable_within_a_day() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let later_same_day = Utc.with_ymd_and_hms(2026, 1, 1, 23, 0, 0).unwrap();
        let next_day = Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 1).unwrap();

        let a = SessionManager::satellite_key("sat-1", None, now);
        let b = SessionManager::satellite_key("sat-1", None, later_same_day);
        let c = SessionManager::satellite_key("sat-1", None, next_day);

        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
