use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device not found: {0}")]
    NotFound(String),

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("room has no available output target")]
    NoAvailableOutput,

    #[error("playback already active in room {room} and interruption is not allowed")]
    PlaybackBusy { room: String },
}
