//! Memory Store (§4.4): per-user long-term memory with dedup on insert,
//! cosine-similarity retrieve, optional LLM-assisted reconciliation, and
//! age-based decay for context memories.

pub mod db;
pub mod error;
pub mod manager;
pub mod types;

pub use error::MemoryError;
pub use manager::{ConflictClassifier, ConflictDecision, MemoryManager};
pub use types::{HistoryAction, HistorySource, Memory, MemoryCategory, MemoryHistoryEntry, ReconcileOutcome, ScoredMemory};
