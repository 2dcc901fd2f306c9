use rusqlite::{Connection, Result};

/// Initialise the knowledge-base/chunk schema plus the FTS5 indices backing
/// the sparse retrieval arm and the Feedback Retriever's lookup (§4.5, §4.6).
/// Idempotent — safe to call on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    create_knowledge_tables(conn)?;
    create_feedback_table(conn)?;
    Ok(())
}

fn create_knowledge_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS knowledge_base (
            id         TEXT NOT NULL PRIMARY KEY,
            name       TEXT NOT NULL,
            owner_user_id TEXT,
            is_public  INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS document (
            id                TEXT NOT NULL PRIMARY KEY,
            knowledge_base_id TEXT NOT NULL,
            filename          TEXT NOT NULL,
            content_hash      TEXT NOT NULL,
            status            TEXT NOT NULL DEFAULT 'pending',
            created_at        TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_document_kb ON document(knowledge_base_id);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_document_hash
            ON document(knowledge_base_id, content_hash);

        CREATE TABLE IF NOT EXISTS document_chunk (
            id                TEXT NOT NULL PRIMARY KEY,
            document_id       TEXT NOT NULL,
            knowledge_base_id TEXT NOT NULL,
            ordinal           INTEGER NOT NULL,
            content           TEXT NOT NULL,
            embedding         TEXT NOT NULL,
            page              INTEGER,
            section           TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_chunk_document
            ON document_chunk(document_id, ordinal);
        CREATE INDEX IF NOT EXISTS idx_chunk_kb
            ON document_chunk(knowledge_base_id);

        CREATE VIRTUAL TABLE IF NOT EXISTS document_chunk_fts USING fts5(
            content,
            content='document_chunk',
            content_rowid='rowid'
        );
        CREATE TRIGGER IF NOT EXISTS document_chunk_ai AFTER INSERT ON document_chunk BEGIN
            INSERT INTO document_chunk_fts(rowid, content) VALUES (new.rowid, new.content);
        END;
        CREATE TRIGGER IF NOT EXISTS document_chunk_ad AFTER DELETE ON document_chunk BEGIN
            INSERT INTO document_chunk_fts(document_chunk_fts, rowid, content) VALUES ('delete', old.rowid, old.content);
        END;
        CREATE TRIGGER IF NOT EXISTS document_chunk_au AFTER UPDATE ON document_chunk BEGIN
            INSERT INTO document_chunk_fts(document_chunk_fts, rowid, content) VALUES ('delete', old.rowid, old.content);
            INSERT INTO document_chunk_fts(rowid, content) VALUES (new.rowid, new.content);
        END;

        CREATE TABLE IF NOT EXISTS chunk_permission (
            knowledge_base_id TEXT NOT NULL,
            user_id           TEXT NOT NULL,
            level             TEXT NOT NULL,
            PRIMARY KEY (knowledge_base_id, user_id)
        );",
    )
}

fn create_feedback_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS feedback_example (
            id                     INTEGER PRIMARY KEY AUTOINCREMENT,
            situation              TEXT NOT NULL,
            chosen_intent_or_tool  TEXT NOT NULL,
            correction             TEXT NOT NULL,
            created_at             TEXT NOT NULL
        );

        CREATE VIRTUAL TABLE IF NOT EXISTS feedback_example_fts USING fts5(
            situation,
            content='feedback_example',
            content_rowid='id'
        );
        CREATE TRIGGER IF NOT EXISTS feedback_example_ai AFTER INSERT ON feedback_example BEGIN
            INSERT INTO feedback_example_fts(rowid, situation) VALUES (new.id, new.situation);
        END;
        CREATE TRIGGER IF NOT EXISTS feedback_example_ad AFTER DELETE ON feedback_example BEGIN
            INSERT INTO feedback_example_fts(feedback_example_fts, rowid, situation) VALUES ('delete', old.id, old.situation);
        END;",
    )
}
