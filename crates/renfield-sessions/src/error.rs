use thiserror::Error;

/// Errors that can occur during session and conversation operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A SQLite operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The requested conversation does not exist.
    #[error("conversation not found: {0}")]
    ConversationNotFound(String),

    /// Appending audio to a session's input buffer would exceed
    /// `max_audio_buffer_size` (§4.12).
    #[error("audio buffer capacity exceeded: limit is {limit} bytes")]
    AudioBufferFull { limit: usize },
}

pub type Result<T> = std::result::Result<T, SessionError>;
