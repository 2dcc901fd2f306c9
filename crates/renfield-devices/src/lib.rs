//! Device Manager (§4.11) and Output Router (§4.13): tracks connected
//! satellites/panels/browsers and resolves where a piece of audio should
//! play.

pub mod error;
pub mod manager;
pub mod output_router;
pub mod transport;
pub mod types;

pub use error::DeviceError;
pub use manager::DeviceManager;
pub use output_router::{OutputPreference, OutputRouter, OutputTarget, SmartHomeMediaPlayerState, SmartHomeMediaState};
pub use transport::DeviceTransport;
pub use types::{DeviceCapabilities, DeviceKind, DeviceRecord, PlayAudioDirective, SpeakerCandidate, TargetAvailability, WakeWordSyncStatus};
