use serde::{Deserialize, Serialize};

/// §3 KnowledgeBase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBase {
    pub id: String,
    pub name: String,
    pub owner_user_id: Option<String>,
    pub is_public: bool,
}

/// §3 ChunkPermission.level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionLevel {
    Read,
    Write,
    Admin,
}

/// §3 DocumentChunk, flattened with its parent document's filename for
/// attribution (§4.5's output contract names filename + chunk text + score).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: String,
    pub document_id: String,
    pub knowledge_base_id: String,
    pub ordinal: i64,
    pub content: String,
    pub filename: String,
    pub page: Option<i64>,
    pub section: Option<String>,
}

/// A chunk plus the fused relevance score the Orchestrator uses for
/// attribution (§4.5 "relevance score (the fused RRF score)").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: DocumentChunk,
    pub score: f32,
}

/// §4.6 Feedback Retriever result row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackExample {
    pub situation: String,
    pub chosen_intent_or_tool: String,
    pub correction: String,
    pub created_at: String,
}
