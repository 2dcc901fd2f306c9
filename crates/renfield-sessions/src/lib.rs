//! Session Manager (§4.12): per-WebSocket-session state plus the
//! Conversation/Message persistence that survives it.

pub mod db;
pub mod error;
pub mod manager;
pub mod types;

pub use error::SessionError;
pub use manager::SessionManager;
pub use types::{Conversation, Message, MessageRole, RagSourceRef, SessionState};
