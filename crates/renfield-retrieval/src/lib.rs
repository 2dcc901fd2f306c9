//! Knowledge Retriever (§4.5) and Feedback Retriever (§4.6): hybrid
//! dense+BM25 document search fused by RRF, and a cached few-shot lookup
//! over past intent/tool corrections.

pub mod db;
pub mod error;
pub mod feedback;
pub mod retriever;
pub mod types;

pub use error::RetrievalError;
pub use feedback::FeedbackRetriever;
pub use retriever::{HybridConfig, KnowledgeRetriever};
pub use types::{DocumentChunk, FeedbackExample, KnowledgeBase, PermissionLevel, ScoredChunk};
