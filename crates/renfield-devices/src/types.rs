use serde::{Deserialize, Serialize};

use renfield_core::{DeviceId, RoomId};

/// §3 Device.kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Satellite,
    WebPanel,
    WebTablet,
    WebBrowser,
    WebKiosk,
}

impl DeviceKind {
    /// Stationary web kinds are eligible for client-IP-based room inference
    /// (§4.11) the way a mobile browser tab isn't.
    pub fn is_stationary(self) -> bool {
        matches!(self, DeviceKind::WebPanel | DeviceKind::WebTablet | DeviceKind::WebKiosk)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    pub has_microphone: bool,
    pub has_speaker: bool,
    pub has_display: bool,
    pub supports_local_wake_word: bool,
}

/// Registered device state tracked by the Device Manager. `transport` is
/// held separately (see `manager::Registry`) since it isn't `Clone`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub device_id: DeviceId,
    pub kind: DeviceKind,
    pub room_id: RoomId,
    pub capabilities: DeviceCapabilities,
    pub last_heartbeat_at: chrono::DateTime<chrono::Utc>,
    pub wake_word_sync: WakeWordSyncStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WakeWordSyncStatus {
    Synced,
    Pending,
    Failed,
}

/// Outcome of resolving a Room's `OutputPreference` list (§4.13).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetAvailability {
    Available,
    Busy,
    Unavailable,
}

/// A unicast playback directive emitted by the Output Router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayAudioDirective {
    pub url: String,
    pub volume: f32,
}

/// Ordered speaker candidate for a room (§4.11's `find_speakers_in_room`).
#[derive(Debug, Clone)]
pub struct SpeakerCandidate {
    pub device_id: DeviceId,
    pub priority: i32,
    pub interruption_allowed: bool,
}
