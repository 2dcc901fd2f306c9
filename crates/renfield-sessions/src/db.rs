use rusqlite::Connection;

use crate::error::Result;

/// Initialise the conversation/message tables and their indexes.
///
/// Safe to call on every startup — uses `IF NOT EXISTS` throughout. There is
/// no `sessions` table: per §4.12, a session is a WebSocket-lifetime,
/// in-memory object and is persisted only implicitly through the
/// Conversation/Message rows it produces.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS conversations (
            id         TEXT PRIMARY KEY,
            user_id    TEXT,
            created_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS messages (
            conversation_id TEXT NOT NULL,
            turn_index      INTEGER NOT NULL,
            role            TEXT NOT NULL,
            content         TEXT NOT NULL,
            tool_calls      TEXT,
            created_at      TEXT NOT NULL,
            PRIMARY KEY (conversation_id, turn_index)
        );
        CREATE INDEX IF NOT EXISTS idx_conversations_user
            ON conversations(user_id, created_at DESC);",
    )?;
    Ok(())
}
