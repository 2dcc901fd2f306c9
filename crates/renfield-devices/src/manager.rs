use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use renfield_core::{DeviceId, RoomId};
use serde_json::json;
use tracing::{info, warn};

use crate::error::DeviceError;
use crate::transport::DeviceTransport;
use crate::types::{DeviceCapabilities, DeviceKind, DeviceRecord, SpeakerCandidate, WakeWordSyncStatus};

const DEFAULT_HEARTBEAT_TIMEOUT_SECS: i64 = 60;

struct Entry {
    record: DeviceRecord,
    transport: Arc<dyn DeviceTransport>,
    client_ip: Option<IpAddr>,
}

/// Tracks every connected device and resolves room/output questions for the
/// Output Router and the Orchestrator (§4.11).
pub struct DeviceManager {
    entries: Mutex<HashMap<DeviceId, Entry>>,
    /// Stationary web device room assignments keyed by the client IP they
    /// last registered from, so a second device on the same IP inherits the
    /// room instead of landing "unassigned" (§4.11 room inference).
    ip_room_hints: Mutex<HashMap<IpAddr, RoomId>>,
    /// Room with an active, non-interruptible playback — enforces I2.
    active_playback: Mutex<HashMap<RoomId, bool>>,
    heartbeat_timeout_secs: i64,
    wake_word_version: Mutex<u64>,
}

impl DeviceManager {
    pub fn new(heartbeat_timeout_secs: i64) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ip_room_hints: Mutex::new(HashMap::new()),
            active_playback: Mutex::new(HashMap::new()),
            heartbeat_timeout_secs,
            wake_word_version: Mutex::new(0),
        }
    }

    pub fn register(
        &self,
        device_id: DeviceId,
        kind: DeviceKind,
        room_id: Option<RoomId>,
        capabilities: DeviceCapabilities,
        client_ip: Option<IpAddr>,
        transport: Arc<dyn DeviceTransport>,
    ) {
        let resolved_room = room_id.unwrap_or_else(|| self.infer_room(kind, client_ip));
        if kind.is_stationary() {
            if let Some(ip) = client_ip {
                self.ip_room_hints.lock().unwrap().insert(ip, resolved_room.clone());
            }
        }

        info!(device_id = %device_id, kind = ?kind, room = %resolved_room, "device registered");
        self.entries.lock().unwrap().insert(
            device_id.clone(),
            Entry {
                record: DeviceRecord {
                    device_id,
                    kind,
                    room_id: resolved_room,
                    capabilities,
                    last_heartbeat_at: Utc::now(),
                    wake_word_sync: WakeWordSyncStatus::Pending,
                },
                transport,
                client_ip,
            },
        );
    }

    fn infer_room(&self, kind: DeviceKind, client_ip: Option<IpAddr>) -> RoomId {
        if kind.is_stationary() {
            if let Some(ip) = client_ip {
                if let Some(room) = self.ip_room_hints.lock().unwrap().get(&ip) {
                    return room.clone();
                }
            }
        }
        RoomId::unassigned()
    }

    pub fn unregister(&self, device_id: &DeviceId) {
        self.entries.lock().unwrap().remove(device_id);
    }

    pub fn heartbeat(&self, device_id: &DeviceId) {
        if let Some(entry) = self.entries.lock().unwrap().get_mut(device_id) {
            entry.record.last_heartbeat_at = Utc::now();
        }
    }

    /// §4.11: absence of heartbeats for `heartbeat_timeout` marks a device
    /// stale; staleness is derived on read, not a separately ticked state.
    pub fn is_stale(&self, device_id: &DeviceId) -> bool {
        self.entries
            .lock()
            .unwrap()
            .get(device_id)
            .map(|e| self.staleness_of(&e.record, Utc::now()))
            .unwrap_or(true)
    }

    fn staleness_of(&self, record: &DeviceRecord, now: DateTime<Utc>) -> bool {
        (now - record.last_heartbeat_at).num_seconds() > self.heartbeat_timeout_secs
    }

    pub async fn send_to(&self, device_id: &DeviceId, message: serde_json::Value) -> Result<(), DeviceError> {
        let transport = {
            let entries = self.entries.lock().unwrap();
            let entry = entries
                .get(device_id)
                .ok_or_else(|| DeviceError::NotFound(device_id.to_string()))?;
            entry.transport.clone()
        };
        if !transport.is_alive() {
            return Err(DeviceError::SendFailed(format!("{device_id} transport closed")));
        }
        transport.send_json(message).await
    }

    pub async fn broadcast_to_room(
        &self,
        room_id: &RoomId,
        predicate: impl Fn(&DeviceRecord) -> bool,
        message: serde_json::Value,
    ) -> Vec<DeviceId> {
        let targets: Vec<DeviceId> = {
            let entries = self.entries.lock().unwrap();
            entries
                .values()
                .filter(|e| &e.record.room_id == room_id && predicate(&e.record))
                .map(|e| e.record.device_id.clone())
                .collect()
        };
        let mut delivered = Vec::new();
        for device_id in targets {
            if self.send_to(&device_id, message.clone()).await.is_ok() {
                delivered.push(device_id);
            } else {
                warn!(device_id = %delivered.len(), "broadcast delivery failed for a device");
            }
        }
        delivered
    }

    /// §4.11 `find_speakers_in_room`: online, speaker-capable, non-stale
    /// devices in the room, ordered by registration-stable priority (kiosk
    /// and panel devices are treated as higher priority than satellites
    /// since they're more likely the "main" output for a room).
    pub fn find_speakers_in_room(&self, room_id: &RoomId) -> Vec<SpeakerCandidate> {
        let entries = self.entries.lock().unwrap();
        let mut candidates: Vec<SpeakerCandidate> = entries
            .values()
            .filter(|e| {
                &e.record.room_id == room_id
                    && e.record.capabilities.has_speaker
                    && !self.staleness_of(&e.record, Utc::now())
            })
            .map(|e| SpeakerCandidate {
                device_id: e.record.device_id.clone(),
                priority: priority_for_kind(e.record.kind),
                interruption_allowed: true,
            })
            .collect();
        candidates.sort_by_key(|c| c.priority);
        candidates
    }

    pub fn is_online_with_speaker(&self, device_id: &DeviceId) -> bool {
        self.entries
            .lock()
            .unwrap()
            .get(device_id)
            .map(|e| e.record.capabilities.has_speaker && !self.staleness_of(&e.record, Utc::now()))
            .unwrap_or(false)
    }

    /// I2: claim the room for playback unless it's already active without
    /// interruption allowed.
    pub fn try_claim_playback(&self, room_id: &RoomId, allow_interruption: bool) -> Result<(), DeviceError> {
        let mut active = self.active_playback.lock().unwrap();
        if *active.get(room_id).unwrap_or(&false) && !allow_interruption {
            return Err(DeviceError::PlaybackBusy { room: room_id.to_string() });
        }
        active.insert(room_id.clone(), true);
        Ok(())
    }

    pub fn release_playback(&self, room_id: &RoomId) {
        self.active_playback.lock().unwrap().insert(room_id.clone(), false);
    }

    /// §4.11 wake-word config distribution: bump the version and push to
    /// every connected device declaring `supports_local_wake_word`.
    pub async fn broadcast_wake_word_config(&self, config: serde_json::Value) -> u64 {
        let version = {
            let mut v = self.wake_word_version.lock().unwrap();
            *v += 1;
            *v
        };
        let targets: Vec<DeviceId> = {
            let entries = self.entries.lock().unwrap();
            entries
                .values()
                .filter(|e| e.record.capabilities.supports_local_wake_word)
                .map(|e| e.record.device_id.clone())
                .collect()
        };
        let payload = json!({"type": renfield_protocol::methods::DEVICE_CONFIG_UPDATE, "version": version, "config": config});
        for device_id in targets {
            let _ = self.send_to(&device_id, payload.clone()).await;
        }
        version
    }

    pub fn record_config_ack(&self, device_id: &DeviceId, applied: bool) {
        if let Some(entry) = self.entries.lock().unwrap().get_mut(device_id) {
            entry.record.wake_word_sync = if applied {
                WakeWordSyncStatus::Synced
            } else {
                WakeWordSyncStatus::Failed
            };
        }
    }

    pub fn sync_statuses(&self) -> Vec<(DeviceId, WakeWordSyncStatus)> {
        self.entries
            .lock()
            .unwrap()
            .values()
            .map(|e| (e.record.device_id.clone(), e.record.wake_word_sync))
            .collect()
    }
}

impl Default for DeviceManager {
    fn default() -> Self {
        Self::new(DEFAULT_HEARTBEAT_TIMEOUT_SECS)
    }
}

fn priority_for_kind(kind: DeviceKind) -> i32 {
    match kind {
        DeviceKind::WebKiosk | DeviceKind::WebPanel => 0,
        DeviceKind::WebTablet => 1,
        DeviceKind::Satellite => 2,
        DeviceKind::WebBrowser => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeTransport {
        alive: AtomicBool,
    }

    #[async_trait]
    impl DeviceTransport for FakeTransport {
        async fn send_json(&self, _payload: serde_json::Value) -> Result<(), DeviceError> {
            Ok(())
        }
        fn is_alive(&self) -> bool {
            self.alive.load(Ordering::Relaxed)
        }
    }

    fn fake() -> Arc<dyn DeviceTransport> {
        Arc::new(FakeTransport { alive: AtomicBool::new(true) })
    }

    #[test]
    fn stationary_device_inherits_room_from_ip_hint() {
        let mgr = DeviceManager::default();
        let ip: IpAddr = "10.0.0.5".parse().unwrap();
        mgr.register(
            DeviceId::from("panel-1"),
            DeviceKind::WebPanel,
            Some(RoomId::from("kitchen")),
            DeviceCapabilities::default(),
            Some(ip),
            fake(),
        );
        mgr.register(
            DeviceId::from("panel-2"),
            DeviceKind::WebPanel,
            None,
            DeviceCapabilities::default(),
            Some(ip),
            fake(),
        );
        let entries = mgr.entries.lock().unwrap();
        assert_eq!(entries.get(&DeviceId::from("panel-2")).unwrap().record.room_id, RoomId::from("kitchen"));
    }

    #[test]
    fn unassigned_without_ip_hint() {
        let mgr = DeviceManager::default();
        mgr.register(
            DeviceId::from("panel-3"),
            DeviceKind::WebPanel,
            None,
            DeviceCapabilities::default(),
            None,
            fake(),
        );
        let entries = mgr.entries.lock().unwrap();
        assert_eq!(entries.get(&DeviceId::from("panel-3")).unwrap().record.room_id, RoomId::unassigned());
    }

    #[test]
    fn playback_claim_rejects_without_interruption() {
        let mgr = DeviceManager::default();
        let room = RoomId::from("living_room");
        mgr.try_claim_playback(&room, false).unwrap();
        assert!(mgr.try_claim_playback(&room, false).is_err());
        assert!(mgr.try_claim_playback(&room, true).is_ok());
    }

    #[test]
    fn find_speakers_orders_panels_before_satellites() {
        let mgr = DeviceManager::default();
        let room = RoomId::from("office");
        let mut caps = DeviceCapabilities::default();
        caps.has_speaker = true;
        mgr.register(DeviceId::from("sat-1"), DeviceKind::Satellite, Some(room.clone()), caps, None, fake());
        mgr.register(DeviceId::from("panel-1"), DeviceKind::WebPanel, Some(room.clone()), caps, None, fake());
        let speakers = mgr.find_speakers_in_room(&room);
        assert_eq!(speakers[0].device_id, DeviceId::from("panel-1"));
    }
}
