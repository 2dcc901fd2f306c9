//! Knowledge Retriever (§4.5): hybrid dense + BM25 lookup over pre-chunked
//! documents, fused by Reciprocal Rank Fusion, with neighbor-chunk expansion.

use std::collections::HashMap;
use std::sync::Mutex;

use renfield_core::vector::{cosine_similarity, decode_embedding};
use rusqlite::Connection;

use crate::error::{Result, RetrievalError};
use crate::types::{DocumentChunk, PermissionLevel, ScoredChunk};

#[derive(Debug, Clone)]
pub struct HybridConfig {
    pub top_k: usize,
    pub hybrid_enabled: bool,
    pub similarity_threshold: f32,
    pub rrf_k: f32,
    pub weight_dense: f32,
    pub weight_bm25: f32,
    pub context_window_chunks: usize,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            hybrid_enabled: true,
            similarity_threshold: 0.4,
            rrf_k: 60.0,
            weight_dense: 0.7,
            weight_bm25: 0.3,
            context_window_chunks: 1,
        }
    }
}

pub struct KnowledgeRetriever {
    db: Mutex<Connection>,
}

struct CandidateRow {
    chunk: DocumentChunk,
    embedding: Vec<f32>,
}

impl KnowledgeRetriever {
    pub fn new(conn: Connection) -> Self {
        Self { db: Mutex::new(conn) }
    }

    /// `retrieve(query_text, knowledge_base_ids, user, top_k) -> chunks
    /// ordered by fused rank`. `query_embedding` is supplied by the caller
    /// (the LLM Gateway's `embed` — this crate has no LLM dependency).
    pub fn retrieve(
        &self,
        query_text: &str,
        query_embedding: &[f32],
        accessible_kb_ids: &[String],
        cfg: &HybridConfig,
    ) -> Result<Vec<ScoredChunk>> {
        if accessible_kb_ids.is_empty() {
            return Ok(Vec::new());
        }
        let db = self.db.lock().unwrap();
        let candidate_limit = cfg.top_k * 2;

        let dense_ranked = dense_candidates(&db, query_embedding, accessible_kb_ids, candidate_limit)?;
        let bm25_ranked = if cfg.hybrid_enabled {
            bm25_candidates(&db, query_text, accessible_kb_ids, candidate_limit)?
        } else {
            Vec::new()
        };

        let fused = if cfg.hybrid_enabled {
            fuse_rrf(&dense_ranked, &bm25_ranked, cfg.rrf_k, cfg.weight_dense, cfg.weight_bm25)
        } else {
            // §4.5: "when BM25 is disabled, drop candidates with cosine
            // similarity < similarity_threshold. When hybrid, the threshold
            // does not apply (RRF handles it)."
            dense_ranked
                .iter()
                .filter(|(_, sim)| *sim >= cfg.similarity_threshold)
                .map(|(id, sim)| (id.clone(), *sim))
                .collect()
        };

        let mut selected: Vec<(String, f32)> = fused.into_iter().collect();
        selected.sort_by(|a, b| b.1.total_cmp(&a.1));
        selected.truncate(cfg.top_k);

        let mut scores: HashMap<String, f32> = HashMap::new();
        let mut chunk_ids: Vec<String> = Vec::new();
        for (id, score) in selected {
            scores.insert(id.clone(), score);
            chunk_ids.push(id);
        }

        let mut expanded: Vec<DocumentChunk> = load_chunks(&db, &chunk_ids)?;
        let neighbor_ids = neighbor_chunk_ids(&db, &expanded, cfg.context_window_chunks)?;
        let mut seen: std::collections::HashSet<String> = expanded.iter().map(|c| c.id.clone()).collect();
        for neighbor in load_chunks(&db, &neighbor_ids)? {
            if seen.insert(neighbor.id.clone()) {
                expanded.push(neighbor);
            }
        }

        // §4.5: "Preserve document-ordinal order within each document when
        // assembling the prompt."
        expanded.sort_by(|a, b| (a.document_id.clone(), a.ordinal).cmp(&(b.document_id.clone(), b.ordinal)));

        Ok(expanded
            .into_iter()
            .map(|chunk| {
                let score = scores.get(&chunk.id).copied().unwrap_or(0.0);
                ScoredChunk { chunk, score }
            })
            .collect())
    }

    /// Accessible knowledge-base ids for `user_id` (§4.5: ownership OR
    /// is_public OR explicit ChunkPermission.read OR role has `kb.all`).
    pub fn accessible_knowledge_bases(
        &self,
        user_id: &str,
        has_kb_all: bool,
    ) -> Result<Vec<String>> {
        let db = self.db.lock().unwrap();
        if has_kb_all {
            let mut stmt = db.prepare("SELECT id FROM knowledge_base")?;
            let ids = stmt.query_map([], |row| row.get::<_, String>(0))?;
            return Ok(ids.filter_map(|r| r.ok()).collect());
        }

        let mut stmt = db.prepare(
            "SELECT id FROM knowledge_base
             WHERE is_public = 1 OR owner_user_id = ?1
             UNION
             SELECT knowledge_base_id FROM chunk_permission WHERE user_id = ?1",
        )?;
        let ids = stmt.query_map([user_id], |row| row.get::<_, String>(0))?;
        Ok(ids.filter_map(|r| r.ok()).collect())
    }

    pub fn grant_permission(&self, kb_id: &str, user_id: &str, level: PermissionLevel) -> Result<()> {
        let db = self.db.lock().unwrap();
        let level_str = match level {
            PermissionLevel::Read => "read",
            PermissionLevel::Write => "write",
            PermissionLevel::Admin => "admin",
        };
        db.execute(
            "INSERT INTO chunk_permission (knowledge_base_id, user_id, level) VALUES (?1, ?2, ?3)
             ON CONFLICT(knowledge_base_id, user_id) DO UPDATE SET level = excluded.level",
            rusqlite::params![kb_id, user_id, level_str],
        )?;
        Ok(())
    }
}

fn dense_candidates(
    db: &Connection,
    query_embedding: &[f32],
    kb_ids: &[String],
    limit: usize,
) -> Result<Vec<(String, f32)>> {
    let placeholders = kb_ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
    let sql = format!(
        "SELECT id, embedding FROM document_chunk WHERE knowledge_base_id IN ({placeholders})"
    );
    let mut stmt = db.prepare(&sql)?;
    let params: Vec<&dyn rusqlite::ToSql> = kb_ids.iter().map(|s| s as &dyn rusqlite::ToSql).collect();
    let rows = stmt.query_map(params.as_slice(), |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut scored: Vec<(String, f32)> = Vec::new();
    for row in rows.filter_map(|r| r.ok()) {
        let Ok(embedding) = decode_embedding(&row.1) else { continue };
        if embedding.len() != query_embedding.len() {
            return Err(RetrievalError::DimensionMismatch { expected: query_embedding.len(), actual: embedding.len() });
        }
        scored.push((row.0, cosine_similarity(&embedding, query_embedding)));
    }
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.truncate(limit);
    Ok(scored)
}

fn bm25_candidates(
    db: &Connection,
    query_text: &str,
    kb_ids: &[String],
    limit: usize,
) -> Result<Vec<(String, f32)>> {
    let placeholders = kb_ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
    let sql = format!(
        "SELECT dc.id, bm25(document_chunk_fts) FROM document_chunk_fts
         JOIN document_chunk dc ON dc.rowid = document_chunk_fts.rowid
         WHERE document_chunk_fts MATCH ?1 AND dc.knowledge_base_id IN ({placeholders})
         ORDER BY bm25(document_chunk_fts) LIMIT {limit}"
    );
    let mut stmt = match db.prepare(&sql) {
        Ok(s) => s,
        // A query with no FTS-valid tokens (e.g. only punctuation) is a
        // syntax error to SQLite's MATCH, not a real failure — treat as no
        // sparse candidates rather than propagating an error (§8 "zero
        // matching chunks -> empty list, never errors").
        Err(_) => return Ok(Vec::new()),
    };
    let mut params: Vec<&dyn rusqlite::ToSql> = vec![&query_text];
    params.extend(kb_ids.iter().map(|s| s as &dyn rusqlite::ToSql));
    let rows = match stmt.query_map(params.as_slice(), |row| {
        // bm25() returns a negative value where more-negative is more
        // relevant; flip sign so "higher is better" holds for both arms.
        Ok((row.get::<_, String>(0)?, -row.get::<_, f64>(1)? as f32))
    }) {
        Ok(r) => r,
        Err(_) => return Ok(Vec::new()),
    };
    Ok(rows.filter_map(|r| r.ok()).collect())
}

/// Reciprocal Rank Fusion (§4.5): `w_dense/(rrf_k + rank_dense) +
/// w_bm25/(rrf_k + rank_bm25)`, a missing arm contributing zero.
fn fuse_rrf(
    dense: &[(String, f32)],
    bm25: &[(String, f32)],
    rrf_k: f32,
    w_dense: f32,
    w_bm25: f32,
) -> HashMap<String, f32> {
    let mut fused: HashMap<String, f32> = HashMap::new();
    for (rank, (id, _)) in dense.iter().enumerate() {
        *fused.entry(id.clone()).or_insert(0.0) += w_dense / (rrf_k + rank as f32 + 1.0);
    }
    for (rank, (id, _)) in bm25.iter().enumerate() {
        *fused.entry(id.clone()).or_insert(0.0) += w_bm25 / (rrf_k + rank as f32 + 1.0);
    }
    fused
}

fn load_chunks(db: &Connection, ids: &[String]) -> Result<Vec<DocumentChunk>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
    let sql = format!(
        "SELECT dc.id, dc.document_id, dc.knowledge_base_id, dc.ordinal, dc.content,
                d.filename, dc.page, dc.section
         FROM document_chunk dc JOIN document d ON d.id = dc.document_id
         WHERE dc.id IN ({placeholders})"
    );
    let mut stmt = db.prepare(&sql)?;
    let params: Vec<&dyn rusqlite::ToSql> = ids.iter().map(|s| s as &dyn rusqlite::ToSql).collect();
    let rows = stmt.query_map(params.as_slice(), |row| {
        Ok(DocumentChunk {
            id: row.get(0)?,
            document_id: row.get(1)?,
            knowledge_base_id: row.get(2)?,
            ordinal: row.get(3)?,
            content: row.get(4)?,
            filename: row.get(5)?,
            page: row.get(6)?,
            section: row.get(7)?,
        })
    })?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

/// §4.5 neighbor expansion: for each selected chunk, the `±context_window`
/// chunks of the same document by ordinal adjacency.
fn neighbor_chunk_ids(db: &Connection, chunks: &[DocumentChunk], window: usize) -> Result<Vec<String>> {
    if window == 0 {
        return Ok(Vec::new());
    }
    let mut ids = Vec::new();
    for chunk in chunks {
        let lo = chunk.ordinal - window as i64;
        let hi = chunk.ordinal + window as i64;
        let mut stmt = db.prepare(
            "SELECT id FROM document_chunk WHERE document_id = ?1 AND ordinal BETWEEN ?2 AND ?3",
        )?;
        let rows = stmt.query_map(rusqlite::params![chunk.document_id, lo, hi], |row| row.get::<_, String>(0))?;
        ids.extend(rows.filter_map(|r| r.ok()));
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn seed(conn: &Connection) {
        crate::db::init_db(conn).unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO knowledge_base (id, name, owner_user_id, is_public, created_at) VALUES ('kb1','Manual',NULL,1,?1)",
            [&now],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO document (id, knowledge_base_id, filename, content_hash, status, created_at)
             VALUES ('doc1','kb1','manual.pdf','hash1','ready',?1)",
            [&now],
        )
        .unwrap();
        for (i, text) in ["heating system overview", "boiler maintenance schedule", "unrelated gardening tips"]
            .iter()
            .enumerate()
        {
            let emb = if i == 1 { vec![1.0, 0.0] } else { vec![0.0, 1.0] };
            conn.execute(
                "INSERT INTO document_chunk (id, document_id, knowledge_base_id, ordinal, content, embedding, page, section)
                 VALUES (?1, 'doc1', 'kb1', ?2, ?3, ?4, NULL, NULL)",
                rusqlite::params![format!("c{i}"), i as i64, text, renfield_core::vector::encode_embedding(&emb)],
            )
            .unwrap();
        }
    }

    #[test]
    fn retrieve_returns_empty_for_no_accessible_kb() {
        let conn = Connection::open_in_memory().unwrap();
        seed(&conn);
        let retriever = KnowledgeRetriever::new(conn);
        let result = retriever.retrieve("heating", &[1.0, 0.0], &[], &HybridConfig::default()).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn retrieve_expands_neighbors_and_orders_by_ordinal() {
        let conn = Connection::open_in_memory().unwrap();
        seed(&conn);
        let retriever = KnowledgeRetriever::new(conn);
        let cfg = HybridConfig { top_k: 1, hybrid_enabled: false, context_window_chunks: 1, ..Default::default() };
        let result = retriever.retrieve("boiler maintenance", &[1.0, 0.0], &["kb1".to_string()], &cfg).unwrap();
        // top match is ordinal 1 ("boiler maintenance"); ±1 expands to ordinals 0 and 2.
        assert_eq!(result.len(), 3);
        assert_eq!(result[0].chunk.ordinal, 0);
        assert_eq!(result[1].chunk.ordinal, 1);
        assert_eq!(result[2].chunk.ordinal, 2);
    }

    #[test]
    fn accessible_knowledge_bases_includes_public() {
        let conn = Connection::open_in_memory().unwrap();
        seed(&conn);
        let retriever = KnowledgeRetriever::new(conn);
        let ids = retriever.accessible_knowledge_bases("someone", false).unwrap();
        assert_eq!(ids, vec!["kb1".to_string()]);
    }

    #[test]
    fn fuse_rrf_combines_both_arms() {
        let dense = vec![("a".to_string(), 0.9), ("b".to_string(), 0.5)];
        let bm25 = vec![("b".to_string(), 2.0), ("a".to_string(), 1.0)];
        let fused = fuse_rrf(&dense, &bm25, 60.0, 0.7, 0.3);
        // "a" ranked first in dense (rank 0) and second in bm25 (rank 1);
        // "b" is the reverse — symmetric weights keep them close but not equal.
        assert!(fused.contains_key("a") && fused.contains_key("b"));
    }
}
