use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use renfield_core::{cosine_similarity, decode_embedding, encode_embedding};
use tracing::debug;

use crate::error::MemoryError;
use crate::types::*;

/// Pluggable LLM-backed classifier for `reconcile`'s conflict-band pass
/// (§4.4). Kept as a trait rather than a direct LLM Gateway dependency so
/// this crate never depends on `renfield-agent` — the gateway binary wires
/// a concrete implementation in at startup.
#[async_trait]
pub trait ConflictClassifier: Send + Sync {
    async fn classify(&self, existing_content: &str, candidate_content: &str) -> ConflictDecision;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictDecision {
    Add,
    Update,
    Delete,
    Noop,
}

/// Manages per-user long-term memory: dedup on insert, cosine-similarity
/// retrieve, optional LLM-assisted reconciliation, age-based decay.
pub struct MemoryManager {
    db: Mutex<rusqlite::Connection>,
}

impl MemoryManager {
    pub fn new(conn: rusqlite::Connection) -> Self {
        Self { db: Mutex::new(conn) }
    }

    /// §4.4 insert: dedup against existing active memories at
    /// `dedup_threshold` similarity; on hit, bump `last_accessed_at` and
    /// return the existing id instead of inserting.
    pub fn insert(
        &self,
        user_id: &str,
        category: MemoryCategory,
        content: &str,
        embedding: &[f32],
        importance: f32,
        dedup_threshold: f32,
        max_per_user: usize,
    ) -> Result<i64, MemoryError> {
        let db = self.db.lock().unwrap();
        let now = Utc::now().to_rfc3339();

        let active = load_active(&db, user_id)?;
        if let Some(dup) = active
            .iter()
            .filter_map(|m| decode_embedding(&m.1).ok().map(|e| (m.0, e)))
            .map(|(id, emb)| (id, cosine_similarity(&emb, embedding)))
            .filter(|(_, sim)| *sim >= dedup_threshold)
            .max_by(|a, b| a.1.total_cmp(&b.1))
        {
            db.execute(
                "UPDATE memory SET last_accessed_at = ?1 WHERE id = ?2",
                rusqlite::params![now, dup.0],
            )?;
            debug!(user_id, similarity = dup.1, "insert deduped against existing memory");
            return Ok(dup.0);
        }

        let cat = category.to_string();
        db.execute(
            "INSERT INTO memory (user_id, category, content, embedding, importance,
             deleted, created_at, last_accessed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?6)",
            rusqlite::params![user_id, cat, content, encode_embedding(embedding), importance, now],
        )?;
        let id = db.last_insert_rowid();
        append_history(&db, id, HistoryAction::Created, HistorySource::System, None, &now)?;

        enforce_cap(&db, user_id, max_per_user, &now)?;
        Ok(id)
    }

    /// §4.4 retrieve: cosine-similarity search over active memories,
    /// threshold filter, touches `last_accessed_at` on every hit.
    pub fn retrieve(
        &self,
        user_id: &str,
        query_embedding: &[f32],
        limit: usize,
        threshold: f32,
    ) -> Result<Vec<ScoredMemory>, MemoryError> {
        let db = self.db.lock().unwrap();
        let rows = load_active_full(&db, user_id)?;

        let mut scored: Vec<ScoredMemory> = rows
            .into_iter()
            .filter_map(|row| {
                let emb = decode_embedding(&row.embedding_json).ok()?;
                let sim = cosine_similarity(&emb, query_embedding);
                (sim >= threshold).then_some(ScoredMemory {
                    memory: row.into_memory(),
                    similarity: sim,
                })
            })
            .collect();

        scored.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        scored.truncate(limit);

        let now = Utc::now().to_rfc3339();
        for s in &scored {
            db.execute(
                "UPDATE memory SET last_accessed_at = ?1 WHERE id = ?2",
                rusqlite::params![now, s.memory.id],
            )?;
        }
        Ok(scored)
    }

    /// §4.4 reconcile: only meaningful when the caller enables contradiction
    /// resolution. Looks at the conflict band (similarity in
    /// `[contradiction_threshold, dedup_threshold - 0.01]`), asks
    /// `classifier` to judge each candidate pair, and applies the verdict.
    pub async fn reconcile(
        &self,
        user_id: &str,
        content: &str,
        embedding: &[f32],
        classifier: &dyn ConflictClassifier,
        contradiction_threshold: f32,
        dedup_threshold: f32,
    ) -> Result<ReconcileOutcome, MemoryError> {
        let band_hi = dedup_threshold - 0.01;
        let candidates: Vec<(i64, String, f32)> = {
            let db = self.db.lock().unwrap();
            load_active_full(&db, user_id)?
                .into_iter()
                .filter_map(|row| {
                    let emb = decode_embedding(&row.embedding_json).ok()?;
                    let sim = cosine_similarity(&emb, embedding);
                    (sim >= contradiction_threshold && sim <= band_hi)
                        .then_some((row.id, row.content, sim))
                })
                .collect()
        };

        if candidates.is_empty() {
            return Ok(ReconcileOutcome::Add);
        }

        for (id, existing_content, _sim) in candidates {
            match classifier.classify(&existing_content, content).await {
                ConflictDecision::Update => {
                    self.apply_update(id, content, embedding, &existing_content)?;
                    return Ok(ReconcileOutcome::Update(id));
                }
                ConflictDecision::Delete => {
                    self.apply_delete(id, &existing_content)?;
                    return Ok(ReconcileOutcome::Delete(id));
                }
                ConflictDecision::Noop => return Ok(ReconcileOutcome::Noop),
                ConflictDecision::Add => continue,
            }
        }
        Ok(ReconcileOutcome::Add)
    }

    fn apply_update(
        &self,
        id: i64,
        new_content: &str,
        new_embedding: &[f32],
        previous_content: &str,
    ) -> Result<(), MemoryError> {
        let db = self.db.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        db.execute(
            "UPDATE memory SET content = ?1, embedding = ?2, last_accessed_at = ?3 WHERE id = ?4",
            rusqlite::params![new_content, encode_embedding(new_embedding), now, id],
        )?;
        append_history(
            &db,
            id,
            HistoryAction::Updated,
            HistorySource::ContradictionResolution,
            Some(previous_content),
            &now,
        )
    }

    fn apply_delete(&self, id: i64, previous_content: &str) -> Result<(), MemoryError> {
        let db = self.db.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        db.execute("UPDATE memory SET deleted = 1 WHERE id = ?1", rusqlite::params![id])?;
        append_history(
            &db,
            id,
            HistoryAction::Deleted,
            HistorySource::ContradictionResolution,
            Some(previous_content),
            &now,
        )
    }

    /// §4.4 decay: soft-deletes `context`-category memories older than
    /// `context_decay_days`. Returns the number of rows decayed.
    pub fn decay(&self, context_decay_days: i64) -> Result<usize, MemoryError> {
        let db = self.db.lock().unwrap();
        let cutoff = (Utc::now() - Duration::days(context_decay_days)).to_rfc3339();
        let now = Utc::now().to_rfc3339();

        let mut stmt = db.prepare(
            "SELECT id, content FROM memory
             WHERE category = 'context' AND deleted = 0 AND created_at < ?1",
        )?;
        let rows: Vec<(i64, String)> = stmt
            .query_map(rusqlite::params![cutoff], |row| Ok((row.get(0)?, row.get(1)?)))?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);

        for (id, content) in &rows {
            db.execute("UPDATE memory SET deleted = 1 WHERE id = ?1", rusqlite::params![id])?;
            append_history(&db, *id, HistoryAction::Deleted, HistorySource::System, Some(content), &now)?;
        }
        Ok(rows.len())
    }

    pub fn history(&self, memory_id: i64) -> Result<Vec<MemoryHistoryEntry>, MemoryError> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, memory_id, action, source, previous_content, created_at
             FROM memory_history WHERE memory_id = ?1 ORDER BY created_at",
        )?;
        let rows = stmt.query_map(rusqlite::params![memory_id], row_to_history)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

struct MemoryRow {
    id: i64,
    user_id: String,
    category: String,
    content: String,
    embedding_json: String,
    importance: f32,
    created_at: String,
    last_accessed_at: String,
}

impl MemoryRow {
    fn into_memory(self) -> Memory {
        Memory {
            id: self.id,
            user_id: self.user_id,
            category: self.category.parse().unwrap_or(MemoryCategory::Context),
            content: self.content,
            importance: self.importance,
            deleted: false,
            created_at: self.created_at,
            last_accessed_at: self.last_accessed_at,
        }
    }
}

fn load_active(
    db: &rusqlite::Connection,
    user_id: &str,
) -> Result<Vec<(i64, String)>, MemoryError> {
    let mut stmt = db.prepare("SELECT id, embedding FROM memory WHERE user_id = ?1 AND deleted = 0")?;
    let rows = stmt.query_map(rusqlite::params![user_id], |row| Ok((row.get(0)?, row.get(1)?)))?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

fn load_active_full(db: &rusqlite::Connection, user_id: &str) -> Result<Vec<MemoryRow>, MemoryError> {
    let mut stmt = db.prepare(
        "SELECT id, user_id, category, content, embedding, importance, created_at, last_accessed_at
         FROM memory WHERE user_id = ?1 AND deleted = 0",
    )?;
    let rows = stmt.query_map(rusqlite::params![user_id], |row| {
        Ok(MemoryRow {
            id: row.get(0)?,
            user_id: row.get(1)?,
            category: row.get(2)?,
            content: row.get(3)?,
            embedding_json: row.get(4)?,
            importance: row.get(5)?,
            created_at: row.get(6)?,
            last_accessed_at: row.get(7)?,
        })
    })?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

fn append_history(
    db: &rusqlite::Connection,
    memory_id: i64,
    action: HistoryAction,
    source: HistorySource,
    previous_content: Option<&str>,
    now: &str,
) -> Result<(), MemoryError> {
    db.execute(
        "INSERT INTO memory_history (memory_id, action, source, previous_content, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![memory_id, action.to_string(), source.to_string(), previous_content, now],
    )?;
    Ok(())
}

/// §4.4 per-user cap: evicts lowest-importance, oldest-`last_accessed_at`
/// memory once active count exceeds `max_per_user`.
fn enforce_cap(
    db: &rusqlite::Connection,
    user_id: &str,
    max_per_user: usize,
    now: &str,
) -> Result<(), MemoryError> {
    let count: i64 = db.query_row(
        "SELECT COUNT(*) FROM memory WHERE user_id = ?1 AND deleted = 0",
        rusqlite::params![user_id],
        |row| row.get(0),
    )?;
    if (count as usize) <= max_per_user {
        return Ok(());
    }

    let victim: Option<(i64, String)> = db
        .query_row(
            "SELECT id, content FROM memory WHERE user_id = ?1 AND deleted = 0
             ORDER BY importance ASC, last_accessed_at ASC LIMIT 1",
            rusqlite::params![user_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .ok();

    if let Some((id, content)) = victim {
        db.execute("UPDATE memory SET deleted = 1 WHERE id = ?1", rusqlite::params![id])?;
        append_history(db, id, HistoryAction::Deleted, HistorySource::System, Some(&content), now)?;
    }
    Ok(())
}

fn row_to_history(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryHistoryEntry> {
    let action_str: String = row.get(2)?;
    let source_str: String = row.get(3)?;
    Ok(MemoryHistoryEntry {
        id: row.get(0)?,
        memory_id: row.get(1)?,
        action: match action_str.as_str() {
            "created" => HistoryAction::Created,
            "updated" => HistoryAction::Updated,
            _ => HistoryAction::Deleted,
        },
        source: match source_str.as_str() {
            "user" => HistorySource::User,
            "contradiction_resolution" => HistorySource::ContradictionResolution,
            _ => HistorySource::System,
        },
        previous_content: row.get(4)?,
        created_at: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> MemoryManager {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        MemoryManager::new(conn)
    }

    #[test]
    fn insert_dedups_near_identical_embeddings() {
        let mgr = manager();
        let emb = vec![1.0, 0.0, 0.0];
        let id1 = mgr
            .insert("u1", MemoryCategory::Fact, "likes tea", &emb, 0.5, 0.9, 500)
            .unwrap();
        let id2 = mgr
            .insert("u1", MemoryCategory::Fact, "likes tea", &emb, 0.5, 0.9, 500)
            .unwrap();
        assert_eq!(id1, id2);
    }

    #[test]
    fn retrieve_filters_by_threshold_and_updates_last_accessed() {
        let mgr = manager();
        mgr.insert("u1", MemoryCategory::Fact, "vegetarian", &[1.0, 0.0], 0.8, 0.9, 500)
            .unwrap();
        let close = mgr.retrieve("u1", &[1.0, 0.0], 5, 0.5).unwrap();
        assert_eq!(close.len(), 1);
        let far = mgr.retrieve("u1", &[0.0, 1.0], 5, 0.5).unwrap();
        assert!(far.is_empty());
    }

    #[test]
    fn per_user_cap_evicts_lowest_importance() {
        let mgr = manager();
        mgr.insert("u1", MemoryCategory::Context, "low", &[1.0, 0.0], 0.1, 0.9, 1)
            .unwrap();
        mgr.insert("u1", MemoryCategory::Context, "high", &[0.0, 1.0], 0.9, 0.9, 1)
            .unwrap();
        let remaining = mgr.retrieve("u1", &[0.0, 1.0], 10, -1.0).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].memory.content, "high");
    }

    #[test]
    fn decay_removes_only_old_context_memories() {
        let mgr = manager();
        let id = mgr
            .insert("u1", MemoryCategory::Context, "old", &[1.0, 0.0], 0.5, 0.9, 500)
            .unwrap();
        {
            let db = mgr.db.lock().unwrap();
            db.execute(
                "UPDATE memory SET created_at = ?1 WHERE id = ?2",
                rusqlite::params![(Utc::now() - Duration::days(40)).to_rfc3339(), id],
            )
            .unwrap();
        }
        let decayed = mgr.decay(30).unwrap();
        assert_eq!(decayed, 1);
    }
}
