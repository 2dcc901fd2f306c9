//! Output Router (§4.13): resolves a Room's ordered `OutputPreference` list
//! to a single playback target and emits a unicast directive.

use async_trait::async_trait;
use renfield_core::{DeviceId, RoomId};
use serde_json::json;

use crate::error::DeviceError;
use crate::manager::DeviceManager;
use crate::types::{PlayAudioDirective, TargetAvailability};

#[derive(Debug, Clone)]
pub enum OutputTarget {
    RenfieldDevice(DeviceId),
    SmartHomeMediaEntity(String),
    DlnaRenderer(String),
}

#[derive(Debug, Clone)]
pub struct OutputPreference {
    pub target: OutputTarget,
    pub priority: i32,
    pub allow_interruption: bool,
    pub volume: f32,
    pub enabled: bool,
}

/// Abstraction over the smart-home collaborator's media-player state query,
/// kept as a trait so this crate doesn't depend on a concrete home
/// automation client.
#[async_trait]
pub trait SmartHomeMediaState: Send + Sync {
    async fn state(&self, entity_id: &str) -> SmartHomeMediaPlayerState;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmartHomeMediaPlayerState {
    Idle,
    Paused,
    Standby,
    Playing,
    Buffering,
    Off,
    Unknown,
    Unreachable,
}

impl SmartHomeMediaPlayerState {
    fn availability(self) -> TargetAvailability {
        match self {
            Self::Idle | Self::Paused | Self::Standby => TargetAvailability::Available,
            Self::Playing | Self::Buffering => TargetAvailability::Busy,
            Self::Off | Self::Unknown | Self::Unreachable => TargetAvailability::Unavailable,
        }
    }
}

pub struct OutputRouter<'a> {
    devices: &'a DeviceManager,
    smart_home: &'a dyn SmartHomeMediaState,
}

impl<'a> OutputRouter<'a> {
    pub fn new(devices: &'a DeviceManager, smart_home: &'a dyn SmartHomeMediaState) -> Self {
        Self { devices, smart_home }
    }

    /// §4.13 algorithm: first preference resolving AVAILABLE, or BUSY with
    /// `allow_interruption`, wins. Falls back to the originating device if
    /// it has a speaker; otherwise no audio output.
    pub async fn route(
        &self,
        room_id: &RoomId,
        url: &str,
        preferred_volume: f32,
        preferences: &[OutputPreference],
        originating_device: Option<&DeviceId>,
    ) -> Result<(OutputTarget, PlayAudioDirective), DeviceError> {
        let mut sorted: Vec<&OutputPreference> = preferences.iter().filter(|p| p.enabled).collect();
        sorted.sort_by_key(|p| p.priority);

        for pref in sorted {
            let availability = self.resolve(&pref.target).await;
            let qualifies = matches!(availability, TargetAvailability::Available)
                || (matches!(availability, TargetAvailability::Busy) && pref.allow_interruption);
            if !qualifies {
                continue;
            }
            self.devices.try_claim_playback(room_id, pref.allow_interruption)?;
            return Ok((
                pref.target.clone(),
                PlayAudioDirective { url: url.to_string(), volume: pref.volume },
            ));
        }

        if let Some(device_id) = originating_device {
            if self.devices.is_online_with_speaker(device_id) {
                self.devices.try_claim_playback(room_id, false)?;
                return Ok((
                    OutputTarget::RenfieldDevice(device_id.clone()),
                    PlayAudioDirective { url: url.to_string(), volume: preferred_volume },
                ));
            }
        }

        Err(DeviceError::NoAvailableOutput)
    }

    async fn resolve(&self, target: &OutputTarget) -> TargetAvailability {
        match target {
            OutputTarget::RenfieldDevice(id) => {
                if self.devices.is_online_with_speaker(id) {
                    TargetAvailability::Available
                } else {
                    TargetAvailability::Unavailable
                }
            }
            OutputTarget::SmartHomeMediaEntity(entity_id) => {
                self.smart_home.state(entity_id).await.availability()
            }
            OutputTarget::DlnaRenderer(_) => TargetAvailability::Available,
        }
    }

    /// Emit the resolved directive to its target via Device Manager.
    pub async fn emit(&self, target: &OutputTarget, directive: &PlayAudioDirective) -> Result<(), DeviceError> {
        match target {
            OutputTarget::RenfieldDevice(device_id) => {
                let payload =
                    json!({"type": renfield_protocol::methods::DEVICE_PLAY_AUDIO, "url": directive.url, "volume": directive.volume});
                self.devices.send_to(device_id, payload).await
            }
            OutputTarget::SmartHomeMediaEntity(_) | OutputTarget::DlnaRenderer(_) => {
                // Delegated to the smart-home/DLNA collaborator by the caller;
                // this router only decides the target, not every transport.
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DeviceCapabilities;
    use async_trait::async_trait;

    struct AlwaysIdle;
    #[async_trait]
    impl SmartHomeMediaState for AlwaysIdle {
        async fn state(&self, _entity_id: &str) -> SmartHomeMediaPlayerState {
            SmartHomeMediaPlayerState::Idle
        }
    }

    struct FakeTransport;
    #[async_trait]
    impl crate::transport::DeviceTransport for FakeTransport {
        async fn send_json(&self, _payload: serde_json::Value) -> Result<(), DeviceError> {
            Ok(())
        }
        fn is_alive(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn skips_unavailable_preference_for_next_in_priority() {
        let devices = DeviceManager::default();
        let room = RoomId::from("kitchen");
        let mut caps = DeviceCapabilities::default();
        caps.has_speaker = true;
        devices.register(
            renfield_core::DeviceId::from("panel-1"),
            crate::types::DeviceKind::WebPanel,
            Some(room.clone()),
            caps,
            None,
            std::sync::Arc::new(FakeTransport),
        );

        let smart_home = AlwaysIdle;
        let router = OutputRouter::new(&devices, &smart_home);
        let prefs = vec![
            OutputPreference {
                target: OutputTarget::RenfieldDevice(renfield_core::DeviceId::from("missing")),
                priority: 0,
                allow_interruption: false,
                volume: 0.5,
                enabled: true,
            },
            OutputPreference {
                target: OutputTarget::RenfieldDevice(renfield_core::DeviceId::from("panel-1")),
                priority: 1,
                allow_interruption: false,
                volume: 0.8,
                enabled: true,
            },
        ];

        let (target, directive) = router.route(&room, "http://x/a.mp3", 0.5, &prefs, None).await.unwrap();
        assert!(matches!(target, OutputTarget::RenfieldDevice(id) if id.as_str() == "panel-1"));
        assert_eq!(directive.volume, 0.8);
    }

    #[tokio::test]
    async fn falls_back_to_originating_device_when_no_preference_qualifies() {
        let devices = DeviceManager::default();
        let room = RoomId::from("office");
        let mut caps = DeviceCapabilities::default();
        caps.has_speaker = true;
        devices.register(
            renfield_core::DeviceId::from("origin"),
            crate::types::DeviceKind::Satellite,
            Some(room.clone()),
            caps,
            None,
            std::sync::Arc::new(FakeTransport),
        );

        let smart_home = AlwaysIdle;
        let router = OutputRouter::new(&devices, &smart_home);
        let origin = renfield_core::DeviceId::from("origin");
        let (target, _) = router
            .route(&room, "http://x/a.mp3", 0.5, &[], Some(&origin))
            .await
            .unwrap();
        assert!(matches!(target, OutputTarget::RenfieldDevice(id) if id == origin));
    }
}
