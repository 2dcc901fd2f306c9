use thiserror::Error;

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RetrievalError>;
