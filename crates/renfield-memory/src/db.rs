use rusqlite::{Connection, Result};

/// Initialise memory tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    create_memory_table(conn)?;
    create_history_table(conn)?;
    Ok(())
}

fn create_memory_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS memory (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id          TEXT NOT NULL,
            category         TEXT NOT NULL,
            content          TEXT NOT NULL,
            embedding        TEXT NOT NULL,
            importance       REAL NOT NULL DEFAULT 0.5,
            deleted          INTEGER NOT NULL DEFAULT 0,
            created_at       TEXT NOT NULL,
            last_accessed_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_memory_user
            ON memory(user_id, deleted);
        CREATE INDEX IF NOT EXISTS idx_memory_category
            ON memory(user_id, category, deleted);",
    )
}

fn create_history_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS memory_history (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            memory_id         INTEGER NOT NULL,
            action            TEXT NOT NULL,
            source            TEXT NOT NULL,
            previous_content  TEXT,
            created_at        TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_history_memory
            ON memory_history(memory_id, created_at);",
    )
}
