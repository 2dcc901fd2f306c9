//! Reminder entity (§3): a user-scheduled notification fired by the
//! Reminder Scheduler once `scheduled_at` elapses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderStatus {
    Pending,
    Fired,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reminder {
    pub id: String,
    pub user_id: UserId,
    pub scheduled_at: DateTime<Utc>,
    pub title: String,
    pub body: String,
    pub status: ReminderStatus,
    pub created_at: DateTime<Utc>,
}

impl Reminder {
    pub fn new(user_id: UserId, scheduled_at: DateTime<Utc>, title: String, body: String) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            user_id,
            scheduled_at,
            title,
            body,
            status: ReminderStatus::Pending,
            created_at: Utc::now(),
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == ReminderStatus::Pending && self.scheduled_at <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn due_only_when_pending_and_past_scheduled_time() {
        let now = Utc::now();
        let mut reminder = Reminder::new(
            UserId::from("u1"),
            now - Duration::seconds(1),
            "Take medicine".to_string(),
            "Evening dose".to_string(),
        );
        assert!(reminder.is_due(now));

        reminder.status = ReminderStatus::Fired;
        assert!(!reminder.is_due(now));
    }

    #[test]
    fn not_due_before_scheduled_time() {
        let now = Utc::now();
        let reminder = Reminder::new(
            UserId::from("u1"),
            now + Duration::hours(1),
            "Meeting".to_string(),
            "".to_string(),
        );
        assert!(!reminder.is_due(now));
    }
}
