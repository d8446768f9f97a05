use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::instrument;

use crate::db::init_db;
use crate::error::{NotifyError, Result};
use crate::types::{ChannelKind, Notification, Preferences, Priority, QuietHours};

const NOTIFICATION_COLUMNS: &str = "id, recipient, kind, title, body, data, priority, channels,
     source, tags, metadata, created_at, expires_at, read_at, delivered_at";

/// Persistent side of the dispatcher: notification rows (the in-app
/// record), per-user preferences, and the per-channel delivery ledger.
pub struct NotificationStore {
    db: Arc<Mutex<Connection>>,
}

impl NotificationStore {
    pub fn new(db: Arc<Mutex<Connection>>) -> Result<Self> {
        {
            let conn = db.lock().unwrap();
            init_db(&conn)?;
        }
        Ok(Self { db })
    }

    /// Persist the notification row. When the in-app channel is among the
    /// targets the record counts as delivered at persistence time.
    #[instrument(skip(self, n), fields(id = %n.id, recipient = ?n.recipient))]
    pub fn persist(&self, n: &Notification) -> Result<()> {
        let delivered_at = if n.channels.contains(&ChannelKind::InApp) {
            Some(n.created_at.clone())
        } else {
            n.delivered_at.clone()
        };
        let channels: Vec<String> = n.channels.iter().map(|c| c.to_string()).collect();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO notifications
             (id, recipient, kind, title, body, data, priority, channels, source, tags,
              metadata, created_at, expires_at, read_at, delivered_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)",
            rusqlite::params![
                n.id,
                n.recipient,
                n.kind,
                n.title,
                n.body,
                n.data.to_string(),
                n.priority.to_string(),
                serde_json::to_string(&channels).unwrap_or_else(|_| "[]".to_string()),
                n.source,
                serde_json::to_string(&n.tags).unwrap_or_else(|_| "[]".to_string()),
                n.metadata.to_string(),
                n.created_at,
                n.expires_at,
                n.read_at,
                delivered_at
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<Notification>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            &format!("SELECT {} FROM notifications WHERE id = ?1", NOTIFICATION_COLUMNS),
            [id],
            row_to_notification,
        ) {
            Ok(n) => Ok(Some(n)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// List a user's notifications, newest first.
    pub fn list_for(&self, user_id: i64, unread_only: bool, limit: usize) -> Result<Vec<Notification>> {
        let db = self.db.lock().unwrap();
        let sql = format!(
            "SELECT {} FROM notifications
             WHERE recipient = ?1 {}
             ORDER BY created_at DESC, id DESC LIMIT ?2",
            NOTIFICATION_COLUMNS,
            if unread_only { "AND read_at IS NULL" } else { "" }
        );
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params![user_id, limit.clamp(1, 200) as i64],
            row_to_notification,
        )?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Mark read. Read implies delivered, so a missing delivered_at is
    /// back-filled with the same instant to keep read_at >= delivered_at.
    #[instrument(skip(self))]
    pub fn mark_read(&self, id: &str, user_id: i64) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE notifications
             SET read_at = COALESCE(read_at, ?1),
                 delivered_at = COALESCE(delivered_at, ?1)
             WHERE id = ?2 AND recipient = ?3",
            rusqlite::params![now, id, user_id],
        )?;
        if n == 0 {
            return Err(NotifyError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Stamp delivered_at on first successful channel delivery.
    pub fn mark_delivered(&self, id: &str) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE notifications SET delivered_at = COALESCE(delivered_at, ?1) WHERE id = ?2",
            rusqlite::params![now, id],
        )?;
        Ok(())
    }

    /// Idempotency ledger: returns true when this (notification, channel)
    /// was already delivered, in which case the caller must not send again.
    pub fn was_delivered(&self, id: &str, channel: ChannelKind) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let count: i64 = db.query_row(
            "SELECT COUNT(*) FROM notification_deliveries
             WHERE notification_id = ?1 AND channel = ?2",
            rusqlite::params![id, channel.to_string()],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn record_delivery(&self, id: &str, channel: ChannelKind) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT OR IGNORE INTO notification_deliveries (notification_id, channel, delivered_at)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![id, channel.to_string(), now],
        )?;
        Ok(())
    }

    /// Remove expired notifications and their ledger rows. Janitor hook.
    #[instrument(skip(self))]
    pub fn sweep_expired(&self) -> Result<usize> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "DELETE FROM notification_deliveries WHERE notification_id IN
             (SELECT id FROM notifications WHERE expires_at IS NOT NULL AND expires_at < ?1)",
            [&now],
        )?;
        let n = db.execute(
            "DELETE FROM notifications WHERE expires_at IS NOT NULL AND expires_at < ?1",
            [&now],
        )?;
        Ok(n)
    }

    /// Load preferences, falling back to defaults for unknown users.
    pub fn preferences(&self, user_id: i64) -> Result<Preferences> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT enabled_channels, kind_overrides, quiet_start_min, quiet_end_min,
                    tz_offset_min, language, digest_opt_in, webhook_url
             FROM notification_prefs WHERE user_id = ?1",
            [user_id],
            |row| {
                let enabled: String = row.get(0)?;
                let overrides: String = row.get(1)?;
                let quiet_start: Option<i64> = row.get(2)?;
                let quiet_end: Option<i64> = row.get(3)?;
                let tz_offset: Option<i64> = row.get(4)?;
                Ok((
                    enabled,
                    overrides,
                    quiet_start,
                    quiet_end,
                    tz_offset,
                    row.get::<_, String>(5)?,
                    row.get::<_, i64>(6)? != 0,
                    row.get::<_, Option<String>>(7)?,
                ))
            },
        ) {
            Ok((enabled, overrides, qs, qe, tz, language, digest_opt_in, webhook_url)) => {
                let quiet_hours = match (qs, qe) {
                    (Some(s), Some(e)) => Some(QuietHours {
                        start_min: s as u16,
                        end_min: e as u16,
                        tz_offset_min: tz.unwrap_or(0) as i32,
                    }),
                    _ => None,
                };
                Ok(Preferences {
                    user_id,
                    enabled_channels: parse_channels(&enabled),
                    kind_overrides: serde_json::from_str(&overrides).unwrap_or_default(),
                    quiet_hours,
                    language,
                    digest_opt_in,
                    webhook_url,
                })
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(Preferences::defaults(user_id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Upsert the full preference row.
    #[instrument(skip(self, prefs), fields(user_id = prefs.user_id))]
    pub fn set_preferences(&self, prefs: &Preferences) -> Result<()> {
        let enabled: Vec<String> = prefs.enabled_channels.iter().map(|c| c.to_string()).collect();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO notification_prefs
             (user_id, enabled_channels, kind_overrides, quiet_start_min, quiet_end_min,
              tz_offset_min, language, digest_opt_in, webhook_url)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)
             ON CONFLICT(user_id) DO UPDATE SET
                enabled_channels = excluded.enabled_channels,
                kind_overrides   = excluded.kind_overrides,
                quiet_start_min  = excluded.quiet_start_min,
                quiet_end_min    = excluded.quiet_end_min,
                tz_offset_min    = excluded.tz_offset_min,
                language         = excluded.language,
                digest_opt_in    = excluded.digest_opt_in,
                webhook_url      = excluded.webhook_url",
            rusqlite::params![
                prefs.user_id,
                serde_json::to_string(&enabled).unwrap_or_else(|_| "[]".to_string()),
                serde_json::to_string(
                    &prefs
                        .kind_overrides
                        .iter()
                        .map(|(k, v)| (k.clone(), v.iter().map(|c| c.to_string()).collect::<Vec<_>>()))
                        .collect::<std::collections::HashMap<_, _>>()
                )
                .unwrap_or_else(|_| "{}".to_string()),
                prefs.quiet_hours.map(|q| q.start_min as i64),
                prefs.quiet_hours.map(|q| q.end_min as i64),
                prefs.quiet_hours.map(|q| q.tz_offset_min as i64),
                prefs.language,
                prefs.digest_opt_in,
                prefs.webhook_url
            ],
        )?;
        Ok(())
    }
}

fn parse_channels(json: &str) -> Vec<ChannelKind> {
    use std::str::FromStr;
    serde_json::from_str::<Vec<String>>(json)
        .unwrap_or_default()
        .iter()
        .filter_map(|s| ChannelKind::from_str(s).ok())
        .collect()
}

fn row_to_notification(row: &rusqlite::Row<'_>) -> rusqlite::Result<Notification> {
    use std::str::FromStr;
    let data: String = row.get(5)?;
    let channels: String = row.get(7)?;
    let tags: String = row.get(9)?;
    let metadata: String = row.get(10)?;
    Ok(Notification {
        id: row.get(0)?,
        recipient: row.get(1)?,
        kind: row.get(2)?,
        title: row.get(3)?,
        body: row.get(4)?,
        data: serde_json::from_str(&data).unwrap_or(serde_json::Value::Null),
        priority: Priority::from_str(&row.get::<_, String>(6)?).unwrap_or_default(),
        channels: parse_channels(&channels),
        source: row.get(8)?,
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
        created_at: row.get(11)?,
        expires_at: row.get(12)?,
        read_at: row.get(13)?,
        delivered_at: row.get(14)?,
    })
}
