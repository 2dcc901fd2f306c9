use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    NotFound(String),

    #[error("permission denied: caller lacks {required}")]
    PermissionDenied { required: String },

    #[error("invalid params for {tool}: {reason}")]
    InvalidParams { tool: String, reason: String },

    #[error("circuit open for resource '{0}'")]
    CircuitOpen(String),

    #[error("call to '{server}' timed out after {timeout_secs}s")]
    Timeout { server: String, timeout_secs: u64 },

    #[error("server '{0}' is not connected")]
    ServerUnavailable(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("manifest error: {0}")]
    Manifest(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ToolError>;
