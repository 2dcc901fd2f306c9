//! Adapts the shared `RenfieldError` taxonomy (§7) to the gateway's two
//! transports: an Axum `IntoResponse` for REST, and a `ChatError` envelope
//! for WebSocket clients (both carry the same wire-level code).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use renfield_core::RenfieldError;
use renfield_protocol::envelopes::ChatError;
use renfield_protocol::methods;
use serde_json::json;

pub struct GatewayError(pub RenfieldError);

impl std::fmt::Debug for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.0, f)
    }
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl std::error::Error for GatewayError {}

impl From<RenfieldError> for GatewayError {
    fn from(e: RenfieldError) -> Self {
        GatewayError(e)
    }
}

impl From<renfield_agent::AgentError> for GatewayError {
    fn from(e: renfield_agent::AgentError) -> Self {
        GatewayError(match e {
            renfield_agent::AgentError::CircuitOpen(resource) => RenfieldError::CircuitOpen { resource },
            renfield_agent::AgentError::MalformedOutput(detail) => RenfieldError::LlmMalformedOutput(detail),
            renfield_agent::AgentError::ToolDisallowed(t) => RenfieldError::ToolFailed { tool: t, reason: "not allowed for this role".to_string() },
            renfield_agent::AgentError::ToolFailed(t) => RenfieldError::ToolFailed { tool: t, reason: "execution failed".to_string() },
            renfield_agent::AgentError::Timeout => RenfieldError::Timeout { ms: 0 },
            renfield_agent::AgentError::Cancelled => RenfieldError::Cancelled,
            renfield_agent::AgentError::Provider(p) => RenfieldError::LlmUnavailable(p.to_string()),
            renfield_agent::AgentError::LlmUnavailable(detail) => RenfieldError::LlmUnavailable(detail),
            renfield_agent::AgentError::Serialization(e) => RenfieldError::internal(e.to_string()),
        })
    }
}

impl From<renfield_tools::ToolError> for GatewayError {
    fn from(e: renfield_tools::ToolError) -> Self {
        GatewayError(match e {
            renfield_tools::ToolError::NotFound(t) => RenfieldError::ResourceNotFound { what: t },
            renfield_tools::ToolError::PermissionDenied { required } => RenfieldError::PermissionDenied { reason: required },
            renfield_tools::ToolError::InvalidParams { tool, reason } => RenfieldError::InputInvalid(format!("{tool}: {reason}")),
            renfield_tools::ToolError::CircuitOpen(resource) => RenfieldError::CircuitOpen { resource },
            renfield_tools::ToolError::Timeout { server, timeout_secs } => {
                RenfieldError::ToolFailed { tool: server, reason: format!("timed out after {timeout_secs}s") }
            }
            renfield_tools::ToolError::ServerUnavailable(s) => RenfieldError::ToolFailed { tool: s, reason: "server unavailable".to_string() },
            renfield_tools::ToolError::Transport(t) => RenfieldError::internal(t),
            renfield_tools::ToolError::Manifest(m) => RenfieldError::Config(m),
            renfield_tools::ToolError::Serialization(e) => RenfieldError::internal(e.to_string()),
        })
    }
}

impl From<renfield_sessions::SessionError> for GatewayError {
    fn from(e: renfield_sessions::SessionError) -> Self {
        GatewayError(match e {
            renfield_sessions::SessionError::Database(e) => RenfieldError::Database(e.to_string()),
            renfield_sessions::SessionError::ConversationNotFound(id) => RenfieldError::ResourceNotFound { what: format!("conversation '{id}'") },
            renfield_sessions::SessionError::AudioBufferFull { limit } => RenfieldError::InputInvalid(format!("audio buffer exceeds {limit} bytes")),
        })
    }
}

impl From<renfield_notify::NotificationError> for GatewayError {
    fn from(e: renfield_notify::NotificationError) -> Self {
        GatewayError(match e {
            renfield_notify::NotificationError::Database(e) => RenfieldError::Database(e.to_string()),
            renfield_notify::NotificationError::Duplicate => RenfieldError::InputInvalid("duplicate notification".to_string()),
            renfield_notify::NotificationError::Suppressed => RenfieldError::InputInvalid("notification suppressed by rule".to_string()),
            renfield_notify::NotificationError::NotFound { id } => RenfieldError::ResourceNotFound { what: format!("notification '{id}'") },
            renfield_notify::NotificationError::Serialization(e) => RenfieldError::internal(e.to_string()),
            renfield_notify::NotificationError::DeliveryFailed(d) => RenfieldError::internal(d),
        })
    }
}

impl From<renfield_memory::MemoryError> for GatewayError {
    fn from(e: renfield_memory::MemoryError) -> Self {
        GatewayError(match e {
            renfield_memory::MemoryError::Database(e) => RenfieldError::Database(e.to_string()),
            renfield_memory::MemoryError::NotFound { id } => RenfieldError::ResourceNotFound { what: format!("memory '{id}'") },
            renfield_memory::MemoryError::DimensionMismatch { expected, actual } => {
                RenfieldError::internal(format!("embedding dimension mismatch: expected {expected}, got {actual}"))
            }
            renfield_memory::MemoryError::Serialization(e) => RenfieldError::internal(e.to_string()),
        })
    }
}

impl From<renfield_devices::DeviceError> for GatewayError {
    fn from(e: renfield_devices::DeviceError) -> Self {
        GatewayError(match e {
            renfield_devices::DeviceError::NotFound(d) => RenfieldError::ResourceNotFound { what: format!("device '{d}'") },
            renfield_devices::DeviceError::SendFailed(detail) => RenfieldError::internal(detail),
            renfield_devices::DeviceError::NoAvailableOutput => {
                RenfieldError::ResourceNotFound { what: "an available output device".to_string() }
            }
            renfield_devices::DeviceError::PlaybackBusy { room } => {
                RenfieldError::InputInvalid(format!("{room} is already playing audio"))
            }
        })
    }
}

impl From<rusqlite::Error> for GatewayError {
    fn from(e: rusqlite::Error) -> Self {
        GatewayError(RenfieldError::Database(e.to_string()))
    }
}

/// The message shown to a human (§7: recovered locally or surfaced as a
/// natural-language fallback, with the code still present for programmatic
/// clients).
pub fn user_message(e: &RenfieldError) -> String {
    match e {
        RenfieldError::InputInvalid(reason) => format!("That request wasn't valid: {reason}"),
        RenfieldError::AuthFailed(_) => "Authentication failed.".to_string(),
        RenfieldError::PermissionDenied { reason } => format!("This action needs the '{reason}' permission."),
        RenfieldError::ResourceNotFound { what } => format!("Couldn't find {what}."),
        RenfieldError::RateLimited { retry_after_ms } => format!("Too many requests, try again in {}s.", retry_after_ms / 1000),
        RenfieldError::CircuitOpen { resource } => format!("{resource} is temporarily unavailable, please try again shortly."),
        RenfieldError::LlmUnavailable(_) => "I can't reach the language model right now.".to_string(),
        RenfieldError::LlmMalformedOutput(_) => "I had trouble forming a response, please try again.".to_string(),
        RenfieldError::ToolFailed { tool, .. } => format!("The '{tool}' tool failed."),
        RenfieldError::Timeout { .. } => "That took too long and timed out.".to_string(),
        RenfieldError::Cancelled => "Cancelled.".to_string(),
        RenfieldError::Internal { id, .. } => format!("Something went wrong on my end (ref: {id})."),
        RenfieldError::Config(_) => "Server configuration error.".to_string(),
        RenfieldError::Database(_) => "A storage error occurred.".to_string(),
        RenfieldError::Serialization(_) => "Couldn't parse that.".to_string(),
        RenfieldError::Io(_) => "An I/O error occurred.".to_string(),
    }
}

fn status(e: &RenfieldError) -> StatusCode {
    match e {
        RenfieldError::InputInvalid(_) | RenfieldError::Serialization(_) => StatusCode::BAD_REQUEST,
        RenfieldError::AuthFailed(_) => StatusCode::UNAUTHORIZED,
        RenfieldError::PermissionDenied { .. } => StatusCode::FORBIDDEN,
        RenfieldError::ResourceNotFound { .. } => StatusCode::NOT_FOUND,
        RenfieldError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        RenfieldError::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
        RenfieldError::LlmUnavailable(_) | RenfieldError::LlmMalformedOutput(_) | RenfieldError::ToolFailed { .. } => StatusCode::BAD_GATEWAY,
        RenfieldError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        RenfieldError::Cancelled => StatusCode::BAD_REQUEST,
        RenfieldError::Config(_) | RenfieldError::Database(_) | RenfieldError::Internal { .. } | RenfieldError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        if let RenfieldError::Internal { id, detail } = &self.0 {
            tracing::error!(error_id = %id, detail = %detail, "internal error surfaced to client");
        }
        let body = Json(json!({"code": self.0.code(), "message": user_message(&self.0)}));
        (status(&self.0), body).into_response()
    }
}

/// Builds the `{type:"error", code, message}` envelope a WS handler sends
/// before closing or continuing the connection.
pub fn chat_error(e: &RenfieldError) -> ChatError {
    ChatError { kind: methods::CHAT_ERROR, code: e.code().to_string(), message: user_message(e) }
}
