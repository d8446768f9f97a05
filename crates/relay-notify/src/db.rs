use rusqlite::Connection;

use crate::error::Result;

/// Initialise notification storage. Idempotent.
///
/// `notification_deliveries` is the per-(notification, channel) ledger
/// that makes retried sends idempotent within the retry window.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS notifications (
            id           TEXT PRIMARY KEY,
            recipient    INTEGER,
            kind         TEXT NOT NULL,
            title        TEXT NOT NULL,
            body         TEXT NOT NULL,
            data         TEXT NOT NULL DEFAULT 'null',  -- JSON
            priority     TEXT NOT NULL DEFAULT 'normal',
            channels     TEXT NOT NULL DEFAULT '[]',    -- JSON array
            source       TEXT,
            tags         TEXT NOT NULL DEFAULT '[]',    -- JSON array
            metadata     TEXT NOT NULL DEFAULT 'null',  -- JSON
            created_at   TEXT NOT NULL,
            expires_at   TEXT,
            read_at      TEXT,
            delivered_at TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_notifications_recipient
            ON notifications(recipient, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_notifications_expiry
            ON notifications(expires_at) WHERE expires_at IS NOT NULL;

        CREATE TABLE IF NOT EXISTS notification_prefs (
            user_id          INTEGER PRIMARY KEY,
            enabled_channels TEXT NOT NULL DEFAULT '[\"live\",\"inapp\"]',  -- JSON array
            kind_overrides   TEXT NOT NULL DEFAULT '{}',                    -- JSON object
            quiet_start_min  INTEGER,
            quiet_end_min    INTEGER,
            tz_offset_min    INTEGER,
            language         TEXT NOT NULL DEFAULT 'en',
            digest_opt_in    INTEGER NOT NULL DEFAULT 0,
            webhook_url      TEXT
        );

        CREATE TABLE IF NOT EXISTS notification_deliveries (
            notification_id  TEXT NOT NULL,
            channel          TEXT NOT NULL,
            delivered_at     TEXT NOT NULL,
            UNIQUE (notification_id, channel)
        );",
    )?;
    Ok(())
}
