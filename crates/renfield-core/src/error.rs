//! §7 error taxonomy: one variant per failure kind, each mapping to a stable
//! wire-level code via `.code()`. This is the top-level error type the
//! gateway surfaces to clients; subsystem crates define their own narrower
//! error enums and convert into this one at the boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenfieldError {
    #[error("invalid input: {0}")]
    InputInvalid(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("permission denied: {reason}")]
    PermissionDenied { reason: String },

    #[error("resource not found: {what}")]
    ResourceNotFound { what: String },

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("circuit open for resource '{resource}'")]
    CircuitOpen { resource: String },

    #[error("LLM unavailable: {0}")]
    LlmUnavailable(String),

    #[error("LLM returned malformed output: {0}")]
    LlmMalformedOutput(String),

    #[error("tool failed: {tool}: {reason}")]
    ToolFailed { tool: String, reason: String },

    #[error("operation timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("operation cancelled")]
    Cancelled,

    #[error("internal error ({id}): {detail}")]
    Internal { id: String, detail: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RenfieldError {
    /// Short error code string sent to clients in WS/REST error payloads.
    pub fn code(&self) -> &'static str {
        match self {
            RenfieldError::InputInvalid(_) => "INPUT_INVALID",
            RenfieldError::AuthFailed(_) => "AUTH_FAILED",
            RenfieldError::PermissionDenied { .. } => "PERMISSION_DENIED",
            RenfieldError::ResourceNotFound { .. } => "RESOURCE_NOT_FOUND",
            RenfieldError::RateLimited { .. } => "RATE_LIMITED",
            RenfieldError::CircuitOpen { .. } => "CIRCUIT_OPEN",
            RenfieldError::LlmUnavailable(_) => "LLM_UNAVAILABLE",
            RenfieldError::LlmMalformedOutput(_) => "LLM_MALFORMED_OUTPUT",
            RenfieldError::ToolFailed { .. } => "TOOL_FAILED",
            RenfieldError::Timeout { .. } => "TIMEOUT",
            RenfieldError::Cancelled => "CANCELLED",
            RenfieldError::Internal { .. } => "INTERNAL_ERROR",
            RenfieldError::Config(_) => "CONFIG_ERROR",
            RenfieldError::Database(_) => "DATABASE_ERROR",
            RenfieldError::Serialization(_) => "SERIALIZATION_ERROR",
            RenfieldError::Io(_) => "IO_ERROR",
        }
    }

    /// Whether the propagation policy (§7) allows a local retry for this
    /// error kind. `InputInvalid`/`AuthFailed`/`PermissionDenied` never are.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RenfieldError::Timeout { .. }
                | RenfieldError::LlmMalformedOutput(_)
                | RenfieldError::ToolFailed { .. }
        )
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::Internal {
            id: uuid::Uuid::new_v4().to_string(),
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RenfieldError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_errors_are_not_retryable() {
        assert!(!RenfieldError::InputInvalid("x".into()).is_retryable());
        assert!(!RenfieldError::AuthFailed("x".into()).is_retryable());
        assert!(!RenfieldError::PermissionDenied { reason: "x".into() }.is_retryable());
    }

    #[test]
    fn retryable_kinds() {
        assert!(RenfieldError::Timeout { ms: 10 }.is_retryable());
        assert!(RenfieldError::LlmMalformedOutput("x".into()).is_retryable());
    }

    #[test]
    fn codes_are_stable_strings() {
        assert_eq!(RenfieldError::CircuitOpen { resource: "llm:chat".into() }.code(), "CIRCUIT_OPEN");
    }
}
