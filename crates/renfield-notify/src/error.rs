use thiserror::Error;

/// Errors that can occur within the notification subsystem.
#[derive(Debug, Error)]
pub enum NotificationError {
    /// Underlying SQLite / rusqlite error.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// An identical fingerprint was ingested within `suppression_window`.
    #[error("duplicate notification within suppression window")]
    Duplicate,

    /// A matching semantic-dedup or SuppressionRule match silently dropped
    /// the notification — not an error, but callers distinguish it from
    /// `Duplicate` for logging.
    #[error("notification suppressed by rule")]
    Suppressed,

    /// The requested notification does not exist.
    #[error("notification not found: {id}")]
    NotFound { id: String },

    /// JSON (de)serialization of `data`/embedding columns failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A downstream device/output-routing call failed.
    #[error("delivery failed: {0}")]
    DeliveryFailed(String),
}

pub type Result<T> = std::result::Result<T, NotificationError>;
