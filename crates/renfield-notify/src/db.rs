use rusqlite::Connection;

use crate::error::Result;

/// Initialise the notification, suppression-rule, and reminder schema.
///
/// Idempotent — safe to call on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS notifications (
            id                 TEXT NOT NULL PRIMARY KEY,
            event_type         TEXT NOT NULL,
            title              TEXT NOT NULL,
            message            TEXT NOT NULL,
            urgency            TEXT NOT NULL,
            room_name          TEXT,
            data               TEXT,
            status             TEXT NOT NULL DEFAULT 'pending',
            dedup_fingerprint  TEXT NOT NULL,
            embedding          TEXT,
            created_at         TEXT NOT NULL,
            expires_at         TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_notifications_fingerprint
            ON notifications(dedup_fingerprint, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_notifications_room_active
            ON notifications(room_name, expires_at);

        CREATE TABLE IF NOT EXISTS suppression_rules (
            id         TEXT NOT NULL PRIMARY KEY,
            room_name  TEXT,
            embedding  TEXT NOT NULL,
            threshold  REAL NOT NULL,
            active     INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS reminders (
            id            TEXT NOT NULL PRIMARY KEY,
            user_id       TEXT NOT NULL,
            scheduled_at  TEXT NOT NULL,
            title         TEXT NOT NULL,
            body          TEXT NOT NULL,
            status        TEXT NOT NULL DEFAULT 'pending',
            created_at    TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_reminders_due
            ON reminders(status, scheduled_at);

        CREATE TABLE IF NOT EXISTS system_setting (
            key    TEXT NOT NULL PRIMARY KEY,
            value  TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}
