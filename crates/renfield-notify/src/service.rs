use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use renfield_core::vector::{cosine_similarity, decode_embedding, encode_embedding};
use renfield_core::RoomId;
use renfield_devices::DeviceManager;
use renfield_devices::output_router::{OutputPreference, OutputRouter, OutputTarget, SmartHomeMediaState};
use rusqlite::Connection;
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{NotificationError, Result};
use crate::types::{IngestRequest, Notification, NotificationStatus, SuppressionRule, Urgency, UrgencyInput};

/// LLM Gateway's `intent` role classifying free text into `critical/info/low`
/// (§4.14 step 4). Kept as a trait so this crate never depends on
/// `renfield-agent` directly.
#[async_trait]
pub trait UrgencyClassifier: Send + Sync {
    async fn classify(&self, title: &str, message: &str) -> Option<Urgency>;
}

/// LLM Gateway `chat_stream`-backed rewrite of a raw event into a natural
/// utterance (§4.14 step 5).
#[async_trait]
pub trait Enricher: Send + Sync {
    async fn enrich(&self, message: &str, timeout: Duration) -> Option<String>;
}

/// Embedding provider for semantic dedup and SuppressionRule matching.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Option<Vec<f32>>;
}

/// TTS collaborator: text in, a playable URL out.
#[async_trait]
pub trait TtsSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Option<String>;
}

#[derive(Debug, Clone)]
pub struct NotificationConfig {
    pub suppression_window_secs: i64,
    pub semantic_dedup_enabled: bool,
    pub semantic_dedup_threshold: f32,
    pub urgency_auto_enabled: bool,
    pub enrichment_enabled: bool,
    pub enrichment_timeout_secs: u64,
    pub notification_ttl_secs: i64,
    pub tts_default: bool,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            suppression_window_secs: 60,
            semantic_dedup_enabled: true,
            semantic_dedup_threshold: 0.85,
            urgency_auto_enabled: true,
            enrichment_enabled: true,
            enrichment_timeout_secs: 15,
            notification_ttl_secs: 24 * 3600,
            tts_default: false,
        }
    }
}

/// Central collaborator-facing piece of §4.14: ingest, acknowledge/dismiss,
/// and the periodic expiry sweep.
pub struct NotificationService {
    db: Mutex<Connection>,
    config: NotificationConfig,
    classifier: Option<Arc<dyn UrgencyClassifier>>,
    enricher: Option<Arc<dyn Enricher>>,
    embedder: Option<Arc<dyn Embedder>>,
    tts: Option<Arc<dyn TtsSynthesizer>>,
    devices: Arc<DeviceManager>,
    smart_home: Arc<dyn SmartHomeMediaState>,
}

impl NotificationService {
    pub fn new(
        conn: Connection,
        config: NotificationConfig,
        devices: Arc<DeviceManager>,
        smart_home: Arc<dyn SmartHomeMediaState>,
    ) -> Self {
        Self {
            db: Mutex::new(conn),
            config,
            classifier: None,
            enricher: None,
            embedder: None,
            tts: None,
            devices,
            smart_home,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn UrgencyClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_enricher(mut self, enricher: Arc<dyn Enricher>) -> Self {
        self.enricher = Some(enricher);
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_tts(mut self, tts: Arc<dyn TtsSynthesizer>) -> Self {
        self.tts = Some(tts);
        self
    }

    fn fingerprint(req: &IngestRequest) -> String {
        if let Some(key) = &req.dedup_key {
            return key.clone();
        }
        let mut hasher = Sha256::new();
        hasher.update(req.event_type.as_bytes());
        hasher.update(b"|");
        hasher.update(req.title.as_bytes());
        hasher.update(b"|");
        hasher.update(req.message.as_bytes());
        hasher.update(b"|");
        hasher.update(req.room_name.as_deref().unwrap_or("").as_bytes());
        hex::encode(hasher.finalize())
    }

    fn recently_ingested(&self, fingerprint: &str, now: DateTime<Utc>) -> Result<bool> {
        let cutoff = now - ChronoDuration::seconds(self.config.suppression_window_secs);
        let db = self.db.lock().unwrap();
        let count: i64 = db.query_row(
            "SELECT COUNT(*) FROM notifications WHERE dedup_fingerprint = ?1 AND created_at >= ?2",
            rusqlite::params![fingerprint, cutoff.to_rfc3339()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn semantic_duplicate(&self, room_name: Option<&str>, embedding: &[f32], now: DateTime<Utc>) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT embedding FROM notifications
             WHERE embedding IS NOT NULL AND expires_at > ?1
               AND (room_name = ?2 OR (?2 IS NULL AND room_name IS NULL))",
        )?;
        let rows = stmt.query_map(rusqlite::params![now.to_rfc3339(), room_name], |row| row.get::<_, String>(0))?;
        for row in rows.filter_map(|r| r.ok()) {
            if let Ok(existing) = decode_embedding(&row) {
                if cosine_similarity(embedding, &existing) >= self.config.semantic_dedup_threshold {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn matches_suppression_rule(&self, room_name: Option<&str>, embedding: &[f32]) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT embedding, threshold FROM suppression_rules
             WHERE active = 1 AND (room_name = ?1 OR room_name IS NULL)",
        )?;
        let rows = stmt.query_map(rusqlite::params![room_name], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f32>(1)?))
        })?;
        for (embedding_str, threshold) in rows.filter_map(|r| r.ok()) {
            if let Ok(rule_embedding) = decode_embedding(&embedding_str) {
                if cosine_similarity(embedding, &rule_embedding) >= threshold {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// §4.14's nine-step ingest pipeline.
    pub async fn ingest(&self, req: IngestRequest) -> Result<Notification> {
        let now = Utc::now();
        let fingerprint = Self::fingerprint(&req);

        if self.recently_ingested(&fingerprint, now)? {
            return Err(NotificationError::Duplicate);
        }

        let embedding = if self.config.semantic_dedup_enabled || self.classifier.is_some() {
            match &self.embedder {
                Some(embedder) => embedder.embed(&format!("{} {}", req.title, req.message)).await,
                None => None,
            }
        } else {
            None
        };

        if self.config.semantic_dedup_enabled {
            if let Some(embedding) = &embedding {
                if self.semantic_duplicate(req.room_name.as_deref(), embedding, now)? {
                    return Err(NotificationError::Duplicate);
                }
            }
        }

        let urgency = match &req.urgency {
            UrgencyInput::Fixed(u) => *u,
            UrgencyInput::Auto => {
                if self.config.urgency_auto_enabled {
                    match &self.classifier {
                        Some(classifier) => classifier.classify(&req.title, &req.message).await.unwrap_or(Urgency::Info),
                        None => Urgency::Info,
                    }
                } else {
                    Urgency::Info
                }
            }
        };

        let message = if req.enrich && self.config.enrichment_enabled {
            match &self.enricher {
                Some(enricher) => enricher
                    .enrich(&req.message, Duration::from_secs(self.config.enrichment_timeout_secs))
                    .await
                    .unwrap_or_else(|| req.message.clone()),
                None => req.message.clone(),
            }
        } else {
            req.message.clone()
        };

        if let Some(embedding) = &embedding {
            if self.matches_suppression_rule(req.room_name.as_deref(), embedding)? {
                return Err(NotificationError::Suppressed);
            }
        }

        let id = Uuid::now_v7().to_string();
        let expires_at = now + ChronoDuration::seconds(self.config.notification_ttl_secs);
        let data_json = req.data.as_ref().map(serde_json::to_string).transpose()?;
        let embedding_str = embedding.as_deref().map(encode_embedding);

        {
            let db = self.db.lock().unwrap();
            db.execute(
                "INSERT INTO notifications
                 (id, event_type, title, message, urgency, room_name, data, status,
                  dedup_fingerprint, embedding, created_at, expires_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,'pending',?8,?9,?10,?11)",
                rusqlite::params![
                    id,
                    req.event_type,
                    req.title,
                    message,
                    urgency.to_string(),
                    req.room_name,
                    data_json,
                    fingerprint,
                    embedding_str,
                    now.to_rfc3339(),
                    expires_at.to_rfc3339(),
                ],
            )?;
        }

        let notification = Notification {
            id: id.clone(),
            event_type: req.event_type.clone(),
            title: req.title.clone(),
            message: message.clone(),
            urgency,
            room_name: req.room_name.clone(),
            data: req.data.clone(),
            status: NotificationStatus::Pending,
            dedup_fingerprint: fingerprint,
            created_at: now,
            expires_at,
        };

        self.deliver(&notification, req.tts).await;
        self.set_status(&id, NotificationStatus::Delivered)?;

        info!(notification_id = %id, urgency = %urgency, "notification ingested");
        Ok(notification)
    }

    async fn deliver(&self, notification: &Notification, tts_override: Option<bool>) {
        let payload = serde_json::json!({
            "type": "notification",
            "id": notification.id,
            "title": notification.title,
            "message": notification.message,
            "urgency": notification.urgency.to_string(),
        });

        if let Some(room_name) = &notification.room_name {
            let room = RoomId::from(room_name.as_str());
            self.devices
                .broadcast_to_room(&room, |_record| true, payload)
                .await;
        } else {
            info!(notification_id = %notification.id, "no target room, skipping device broadcast");
        }

        let tts_enabled = tts_override.unwrap_or(self.config.tts_default);
        if !tts_enabled {
            return;
        }
        let Some(tts) = &self.tts else { return };
        let Some(room_name) = &notification.room_name else { return };
        let Some(audio_url) = tts.synthesize(&notification.message).await else {
            warn!(notification_id = %notification.id, "tts synthesis failed");
            return;
        };

        let room = RoomId::from(room_name.as_str());
        let router = OutputRouter::new(&self.devices, self.smart_home.as_ref());
        let preferences: Vec<OutputPreference> = self
            .devices
            .find_speakers_in_room(&room)
            .into_iter()
            .map(|candidate| OutputPreference {
                target: OutputTarget::RenfieldDevice(candidate.device_id),
                priority: candidate.priority,
                allow_interruption: candidate.interruption_allowed,
                volume: 0.6,
                enabled: true,
            })
            .collect();

        match router.route(&room, &audio_url, 0.6, &preferences, None).await {
            Ok((target, directive)) => {
                if let Err(e) = router.emit(&target, &directive).await {
                    warn!(notification_id = %notification.id, error = %e, "tts emission failed");
                }
            }
            Err(e) => warn!(notification_id = %notification.id, error = %e, "no output target for tts"),
        }
    }

    fn set_status(&self, id: &str, status: NotificationStatus) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE notifications SET status = ?1 WHERE id = ?2",
            rusqlite::params![status.to_string(), id],
        )?;
        Ok(())
    }

    pub fn acknowledge(&self, id: &str) -> Result<()> {
        self.transition(id, NotificationStatus::Acknowledged)
    }

    pub fn dismiss(&self, id: &str) -> Result<()> {
        self.transition(id, NotificationStatus::Dismissed)
    }

    fn transition(&self, id: &str, status: NotificationStatus) -> Result<()> {
        let db = self.db.lock().unwrap();
        let rows = db.execute(
            "UPDATE notifications SET status = ?1 WHERE id = ?2",
            rusqlite::params![status.to_string(), id],
        )?;
        if rows == 0 {
            return Err(NotificationError::NotFound { id: id.to_string() });
        }
        Ok(())
    }

    /// Periodic sweep: hard-deletes notifications whose `expires_at` has
    /// passed. Acknowledged/dismissed rows are soft-deleted for audit and
    /// are swept the same way once expired.
    pub fn expire(&self) -> Result<usize> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let n = db.execute("DELETE FROM notifications WHERE expires_at < ?1", rusqlite::params![now])?;
        Ok(n)
    }

    /// REST listing surface: active (non-dismissed) notifications, optionally
    /// scoped to a room, newest first.
    pub fn list_active(&self, room_name: Option<&str>) -> Result<Vec<Notification>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, event_type, title, message, urgency, room_name, data, status,
                    dedup_fingerprint, created_at, expires_at
             FROM notifications
             WHERE status != 'dismissed' AND (?1 IS NULL OR room_name = ?1)
             ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(rusqlite::params![room_name], row_to_notification)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn get(&self, id: &str) -> Result<Notification> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT id, event_type, title, message, urgency, room_name, data, status,
                    dedup_fingerprint, created_at, expires_at
             FROM notifications WHERE id = ?1",
            rusqlite::params![id],
            row_to_notification,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => NotificationError::NotFound { id: id.to_string() },
            other => NotificationError::from(other),
        })
    }

    pub fn add_suppression_rule(&self, rule: SuppressionRule, embedding: &[f32]) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO suppression_rules (id, room_name, embedding, threshold, active)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![rule.id, rule.room_name, encode_embedding(embedding), rule.threshold, rule.active as i64],
        )?;
        Ok(())
    }

    /// The `POST /api/notifications/webhook` bearer token, compared
    /// constant-time against the caller-supplied header. Generated on first
    /// use so a fresh install doesn't ship a default secret.
    pub fn webhook_token(&self) -> Result<String> {
        let db = self.db.lock().unwrap();
        let existing: Option<String> = db
            .query_row("SELECT value FROM system_setting WHERE key = 'webhook_token'", [], |row| row.get(0))
            .ok();
        if let Some(token) = existing {
            return Ok(token);
        }
        let token = Uuid::now_v7().to_string();
        db.execute(
            "INSERT INTO system_setting (key, value) VALUES ('webhook_token', ?1)",
            rusqlite::params![token],
        )?;
        Ok(token)
    }

    /// `POST /api/notifications/token` (admin): invalidates the previous
    /// webhook token and returns the new one.
    pub fn rotate_webhook_token(&self) -> Result<String> {
        let db = self.db.lock().unwrap();
        let token = Uuid::now_v7().to_string();
        db.execute(
            "INSERT INTO system_setting (key, value) VALUES ('webhook_token', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            rusqlite::params![token],
        )?;
        Ok(token)
    }
}

/// Constant-time bearer token comparison, so timing doesn't leak how many
/// leading bytes of a guess were correct.
pub fn verify_webhook_token(expected: &str, provided: &str) -> bool {
    let expected = expected.as_bytes();
    let provided = provided.as_bytes();
    if expected.len() != provided.len() {
        return false;
    }
    let mut diff = 0u8;
    for (a, b) in expected.iter().zip(provided.iter()) {
        diff |= a ^ b;
    }
    diff == 0
}

fn row_to_notification(row: &rusqlite::Row<'_>) -> rusqlite::Result<Notification> {
    let urgency_str: String = row.get(4)?;
    let status_str: String = row.get(7)?;
    let data_str: Option<String> = row.get(6)?;
    let created_at: String = row.get(9)?;
    let expires_at: String = row.get(10)?;
    Ok(Notification {
        id: row.get(0)?,
        event_type: row.get(1)?,
        title: row.get(2)?,
        message: row.get(3)?,
        urgency: urgency_str.parse().unwrap_or(Urgency::Info),
        room_name: row.get(5)?,
        data: data_str.and_then(|s| serde_json::from_str(&s).ok()),
        status: status_str.parse().unwrap_or(NotificationStatus::Pending),
        dedup_fingerprint: row.get(8)?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        expires_at: DateTime::parse_from_rfc3339(&expires_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use renfield_devices::output_router::SmartHomeMediaPlayerState;

    struct AlwaysInfo;
    #[async_trait]
    impl UrgencyClassifier for AlwaysInfo {
        async fn classify(&self, _title: &str, _message: &str) -> Option<Urgency> {
            Some(Urgency::Info)
        }
    }

    struct OfflineSmartHome;
    #[async_trait]
    impl SmartHomeMediaState for OfflineSmartHome {
        async fn state(&self, _entity_id: &str) -> SmartHomeMediaPlayerState {
            SmartHomeMediaPlayerState::Unreachable
        }
    }

    fn service() -> NotificationService {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        NotificationService::new(
            conn,
            NotificationConfig::default(),
            Arc::new(DeviceManager::default()),
            Arc::new(OfflineSmartHome),
        )
    }

    fn req(dedup_key: &str) -> IngestRequest {
        IngestRequest {
            event_type: "test.event".to_string(),
            title: "Title".to_string(),
            message: "Body".to_string(),
            urgency: UrgencyInput::Fixed(Urgency::Info),
            room_name: Some("kitchen".to_string()),
            data: None,
            tts: Some(false),
            enrich: false,
            dedup_key: Some(dedup_key.to_string()),
        }
    }

    #[tokio::test]
    async fn duplicate_fingerprint_within_window_is_rejected() {
        let svc = service();
        svc.ingest(req("dup-1")).await.unwrap();
        let second = svc.ingest(req("dup-1")).await;
        assert!(matches!(second, Err(NotificationError::Duplicate)));
    }

    #[tokio::test]
    async fn acknowledge_transitions_status() {
        let svc = service();
        let n = svc.ingest(req("ack-1")).await.unwrap();
        svc.acknowledge(&n.id).unwrap();
        let db = svc.db.lock().unwrap();
        let status: String = db
            .query_row("SELECT status FROM notifications WHERE id = ?1", [&n.id], |row| row.get(0))
            .unwrap();
        assert_eq!(status, "acknowledged");
    }

    #[tokio::test]
    async fn expire_removes_past_ttl_rows() {
        let svc = service();
        svc.ingest(req("exp-1")).await.unwrap();
        {
            let db = svc.db.lock().unwrap();
            db.execute("UPDATE notifications SET expires_at = '2000-01-01T00:00:00Z'", []).unwrap();
        }
        let removed = svc.expire().unwrap();
        assert_eq!(removed, 1);
    }

    #[test]
    fn webhook_token_is_generated_once_and_then_stable() {
        let svc = service();
        let first = svc.webhook_token().unwrap();
        let second = svc.webhook_token().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn rotate_webhook_token_invalidates_the_previous_value() {
        let svc = service();
        let before = svc.webhook_token().unwrap();
        let after = svc.rotate_webhook_token().unwrap();
        assert_ne!(before, after);
        assert_eq!(svc.webhook_token().unwrap(), after);
    }

    #[test]
    fn verify_webhook_token_requires_an_exact_match() {
        let token = "a-real-token".to_string();
        assert!(verify_webhook_token(&token, &token));
        assert!(!verify_webhook_token(&token, "a-real-tokeX"));
        assert!(!verify_webhook_token(&token, "too-short"));
        assert!(!verify_webhook_token(&token, ""));
    }
}
