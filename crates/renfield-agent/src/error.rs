use crate::provider::ProviderError;

pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("llm unavailable: {0}")]
    LlmUnavailable(String),

    #[error("circuit open for resource '{0}'")]
    CircuitOpen(String),

    #[error("llm returned malformed output: {0}")]
    MalformedOutput(String),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("tool '{0}' is not allowed for this role")]
    ToolDisallowed(String),

    #[error("tool execution failed: {0}")]
    ToolFailed(String),

    #[error("operation timed out")]
    Timeout,

    #[error("operation cancelled")]
    Cancelled,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AgentError {
    pub fn code(&self) -> &'static str {
        match self {
            AgentError::LlmUnavailable(_) => "llm_unavailable",
            AgentError::CircuitOpen(_) => "circuit_open",
            AgentError::MalformedOutput(_) => "llm_malformed_output",
            AgentError::Provider(_) => "llm_unavailable",
            AgentError::ToolDisallowed(_) => "tool_disallowed",
            AgentError::ToolFailed(_) => "tool_failed",
            AgentError::Timeout => "timeout",
            AgentError::Cancelled => "cancelled",
            AgentError::Serialization(_) => "internal_error",
        }
    }
}
