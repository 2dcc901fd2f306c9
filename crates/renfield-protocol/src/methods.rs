//! Well-known `type` tag values carried on the flat WS envelopes in
//! `envelopes.rs`. Each endpoint's messages are a small fixed set of tagged
//! push/pull kinds rather than method-dispatched request/response pairs, so
//! these are just the tag strings both sides match on.

pub const CHAT_CLIENT_MESSAGE: &str = "message";

pub const CHAT_STREAM: &str = "stream";
pub const CHAT_AGENT_ROLE: &str = "agent_role";
pub const CHAT_AGENT_TOOL_CALL: &str = "agent_tool_call";
pub const CHAT_AGENT_TOOL_RESULT: &str = "agent_tool_result";
pub const CHAT_DONE: &str = "done";
pub const CHAT_NOTIFICATION: &str = "notification";
pub const CHAT_ERROR: &str = "error";

pub const DEVICE_CONFIG_UPDATE: &str = "config_update";
pub const DEVICE_PLAY_AUDIO: &str = "play_audio";
pub const DEVICE_HEARTBEAT: &str = "heartbeat";

pub const SATELLITE_SESSION_START: &str = "session_start";
pub const SATELLITE_SESSION_END: &str = "session_end";
pub const SATELLITE_AUDIO_CHUNK: &str = "audio_chunk";
