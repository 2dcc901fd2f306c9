//! Feedback Retriever (§4.6): cached few-shot lookup over past intent/tool
//! corrections, used by the Intent Classifier's prompt assembly.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;
use rusqlite::Connection;

use crate::error::Result;
use crate::types::FeedbackExample;

const DEFAULT_CACHE_SIZE: usize = 256;

pub struct FeedbackRetriever {
    db: Mutex<Connection>,
    cache: Mutex<LruCache<String, Vec<FeedbackExample>>>,
}

impl FeedbackRetriever {
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
            cache: Mutex::new(LruCache::new(NonZeroUsize::new(DEFAULT_CACHE_SIZE).unwrap())),
        }
    }

    /// Record a correction so future `lookup` calls can surface it as a
    /// few-shot example. Invalidates the cache (§4.6 "refreshed on every
    /// write").
    pub fn record(&self, situation: &str, chosen_intent_or_tool: &str, correction: &str) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        {
            let db = self.db.lock().unwrap();
            db.execute(
                "INSERT INTO feedback_example (situation, chosen_intent_or_tool, correction, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![situation, chosen_intent_or_tool, correction, now],
            )?;
        }
        self.cache.lock().unwrap().clear();
        Ok(())
    }

    /// `lookup(message, limit) -> list of FeedbackExample` drawn from an
    /// in-process LRU-cached FTS5 query over `situation`, capped at `limit`
    /// (default 3), ordered by recency when BM25 scores tie.
    pub fn lookup(&self, message: &str, limit: usize) -> Result<Vec<FeedbackExample>> {
        let cache_key = format!("{limit}:{message}");
        if let Some(hit) = self.cache.lock().unwrap().get(&cache_key) {
            return Ok(hit.clone());
        }

        let db = self.db.lock().unwrap();
        let sql = "SELECT fe.situation, fe.chosen_intent_or_tool, fe.correction, fe.created_at
             FROM feedback_example_fts
             JOIN feedback_example fe ON fe.id = feedback_example_fts.rowid
             WHERE feedback_example_fts MATCH ?1
             ORDER BY bm25(feedback_example_fts), fe.created_at DESC
             LIMIT ?2";
        let mut stmt = match db.prepare(sql) {
            Ok(s) => s,
            Err(_) => return Ok(Vec::new()),
        };
        let rows = match stmt.query_map(rusqlite::params![message, limit as i64], |row| {
            Ok(FeedbackExample {
                situation: row.get(0)?,
                chosen_intent_or_tool: row.get(1)?,
                correction: row.get(2)?,
                created_at: row.get(3)?,
            })
        }) {
            Ok(r) => r,
            Err(_) => return Ok(Vec::new()),
        };
        let examples: Vec<FeedbackExample> = rows.filter_map(|r| r.ok()).collect();

        drop(stmt);
        drop(db);
        self.cache.lock().unwrap().put(cache_key, examples.clone());
        Ok(examples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retriever() -> FeedbackRetriever {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        FeedbackRetriever::new(conn)
    }

    #[test]
    fn lookup_finds_recorded_correction() {
        let r = retriever();
        r.record("turn on the kitchen light", "smart_home.light_on", "use entity_id light.kitchen").unwrap();
        let results = r.lookup("kitchen light", 3).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chosen_intent_or_tool, "smart_home.light_on");
    }

    #[test]
    fn lookup_respects_limit() {
        let r = retriever();
        for i in 0..5 {
            r.record(&format!("turn on light {i}"), "smart_home.light_on", "ok").unwrap();
        }
        let results = r.lookup("turn on light", 3).unwrap();
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn lookup_with_no_matches_is_empty_not_error() {
        let r = retriever();
        let results = r.lookup("completely unrelated query", 3).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn record_invalidates_cache() {
        let r = retriever();
        assert!(r.lookup("weather forecast", 3).unwrap().is_empty());
        r.record("weather forecast berlin", "research.weather", "ok").unwrap();
        let results = r.lookup("weather forecast", 3).unwrap();
        assert_eq!(results.len(), 1);
    }
}
