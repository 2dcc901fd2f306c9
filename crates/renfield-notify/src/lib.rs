//! Notification Service (§4.14), Notification Poller (§4.15), and Reminder
//! Scheduler (§4.16): ingest/dedup/deliver proactive events, pull them from
//! capability servers, and fire time-bound reminders.

pub mod db;
pub mod error;
pub mod poller;
pub mod reminder_scheduler;
pub mod service;
pub mod types;

pub use error::NotificationError;
pub use poller::{NotificationPoller, PollTarget, ToolExecutor};
pub use reminder_scheduler::{ActiveRoomLookup, ReminderScheduler, ReminderStore};
pub use service::{Embedder, Enricher, NotificationConfig, NotificationService, TtsSynthesizer, UrgencyClassifier};
pub use types::{IngestRequest, Notification, NotificationStatus, SuppressionRule, Urgency, UrgencyInput};
