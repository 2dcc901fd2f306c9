use std::sync::{Arc, Mutex};

use chrono::Utc;
use renfield_core::{Reminder, ReminderStatus, UserId};
use rusqlite::Connection;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::service::NotificationService;
use crate::types::{IngestRequest, Urgency, UrgencyInput};

/// Resolves the room a user is most likely in right now, from their last
/// active device, so a fired reminder can be routed without a broadcast.
pub trait ActiveRoomLookup: Send + Sync {
    fn active_room(&self, user_id: &str) -> Option<String>;
}

/// Persistence for the Reminder entity (§3) backing the Reminder Scheduler.
pub struct ReminderStore {
    db: Mutex<Connection>,
}

impl ReminderStore {
    pub fn new(conn: Connection) -> Self {
        Self { db: Mutex::new(conn) }
    }

    pub fn create(&self, reminder: &Reminder) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO reminders (id, user_id, scheduled_at, title, body, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                reminder.id,
                reminder.user_id.as_str(),
                reminder.scheduled_at.to_rfc3339(),
                reminder.title,
                reminder.body,
                status_str(reminder.status),
                reminder.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// REST listing surface: pending and fired reminders for a user, earliest
    /// scheduled first.
    pub fn list_for_user(&self, user_id: &str) -> Result<Vec<Reminder>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, user_id, scheduled_at, title, body, status, created_at
             FROM reminders WHERE user_id = ?1 AND status != 'cancelled'
             ORDER BY scheduled_at ASC",
        )?;
        let rows = stmt.query_map(rusqlite::params![user_id], row_to_reminder)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn cancel(&self, id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let rows = db.execute(
            "UPDATE reminders SET status = 'cancelled' WHERE id = ?1 AND status = 'pending'",
            rusqlite::params![id],
        )?;
        if rows == 0 {
            return Err(crate::error::NotificationError::NotFound { id: id.to_string() });
        }
        Ok(())
    }

    /// §4.16: select pending reminders due now, then atomically flip each to
    /// `fired` one at a time so overlapping ticks (e.g. during a slow
    /// previous tick) never deliver the same reminder twice.
    fn claim_due(&self) -> Result<Vec<Reminder>> {
        let now = Utc::now();
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, user_id, scheduled_at, title, body, status, created_at
             FROM reminders WHERE status = 'pending' AND scheduled_at <= ?1",
        )?;
        let due: Vec<Reminder> = stmt
            .query_map(rusqlite::params![now.to_rfc3339()], row_to_reminder)?
            .filter_map(|r| r.ok())
            .collect();

        let mut claimed = Vec::new();
        for reminder in due {
            let rows = db.execute(
                "UPDATE reminders SET status = 'fired' WHERE id = ?1 AND status = 'pending'",
                rusqlite::params![reminder.id],
            )?;
            if rows == 1 {
                claimed.push(reminder);
            }
        }
        Ok(claimed)
    }
}

fn status_str(status: ReminderStatus) -> &'static str {
    match status {
        ReminderStatus::Pending => "pending",
        ReminderStatus::Fired => "fired",
        ReminderStatus::Cancelled => "cancelled",
    }
}

fn row_to_reminder(row: &rusqlite::Row<'_>) -> rusqlite::Result<Reminder> {
    let status_str: String = row.get(5)?;
    let status = match status_str.as_str() {
        "fired" => ReminderStatus::Fired,
        "cancelled" => ReminderStatus::Cancelled,
        _ => ReminderStatus::Pending,
    };
    let scheduled_at: String = row.get(2)?;
    let created_at: String = row.get(6)?;
    Ok(Reminder {
        id: row.get(0)?,
        user_id: UserId::from(row.get::<_, String>(1)?),
        scheduled_at: chrono::DateTime::parse_from_rfc3339(&scheduled_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        title: row.get(3)?,
        body: row.get(4)?,
        status,
        created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

const DEFAULT_CHECK_INTERVAL_SECS: u64 = 15;

/// §4.16 tick loop: every `reminder_check_interval` (default 15s) deliver
/// every due reminder as an `info`-urgency Notification.
pub struct ReminderScheduler {
    store: Arc<ReminderStore>,
    notifications: Arc<NotificationService>,
    rooms: Arc<dyn ActiveRoomLookup>,
    check_interval_secs: u64,
}

impl ReminderScheduler {
    pub fn new(store: Arc<ReminderStore>, notifications: Arc<NotificationService>, rooms: Arc<dyn ActiveRoomLookup>) -> Self {
        Self { store, notifications, rooms, check_interval_secs: DEFAULT_CHECK_INTERVAL_SECS }
    }

    pub fn with_check_interval_secs(mut self, secs: u64) -> Self {
        self.check_interval_secs = secs;
        self
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("reminder scheduler started");
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(self.check_interval_secs));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        error!("reminder scheduler tick error: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("reminder scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn tick(&self) -> Result<()> {
        let due = self.store.claim_due()?;
        for reminder in due {
            let room_name = self.rooms.active_room(reminder.user_id.as_str());
            let req = IngestRequest {
                event_type: "reminder.fired".to_string(),
                title: reminder.title.clone(),
                message: reminder.body.clone(),
                urgency: UrgencyInput::Fixed(Urgency::Info),
                room_name,
                data: Some(serde_json::json!({"reminder_id": reminder.id, "user_id": reminder.user_id})),
                tts: None,
                enrich: false,
                dedup_key: Some(format!("reminder:{}", reminder.id)),
            };
            if let Err(e) = self.notifications.ingest(req).await {
                warn!(reminder_id = %reminder.id, error = %e, "reminder delivery failed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn claim_due_fires_exactly_once_per_reminder() {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        let store = ReminderStore::new(conn);
        let reminder = Reminder::new(UserId::from("u1"), Utc::now() - Duration::seconds(5), "Take medicine".to_string(), "".to_string());
        store.create(&reminder).unwrap();

        let first = store.claim_due().unwrap();
        let second = store.claim_due().unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 0);
    }

    #[test]
    fn claim_due_ignores_future_reminders() {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        let store = ReminderStore::new(conn);
        let reminder = Reminder::new(UserId::from("u1"), Utc::now() + Duration::hours(1), "Meeting".to_string(), "".to_string());
        store.create(&reminder).unwrap();

        assert!(store.claim_due().unwrap().is_empty());
    }
}
