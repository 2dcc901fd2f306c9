pub mod chat;
pub mod health;
pub mod mcp;
pub mod metrics;
pub mod notifications;
pub mod voice;
