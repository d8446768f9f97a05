use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Notification priority. Variant order is urgency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
    Emergency,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Critical => "critical",
            Priority::Emergency => "emergency",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            "emergency" => Ok(Priority::Emergency),
            other => Err(format!("unknown priority: {}", other)),
        }
    }
}

/// Delivery channels. `InApp` is the stored record itself; the rest go
/// through a [`ChannelSender`](crate::sender::ChannelSender).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Live,
    InApp,
    Email,
    Sms,
    Push,
    Webhook,
}

impl ChannelKind {
    /// Outbound call deadline for this channel.
    pub fn send_timeout_secs(&self) -> u64 {
        match self {
            ChannelKind::Live | ChannelKind::InApp => 1,
            ChannelKind::Webhook => 10,
            ChannelKind::Email | ChannelKind::Sms | ChannelKind::Push => 30,
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChannelKind::Live => "live",
            ChannelKind::InApp => "inapp",
            ChannelKind::Email => "email",
            ChannelKind::Sms => "sms",
            ChannelKind::Push => "push",
            ChannelKind::Webhook => "webhook",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ChannelKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "live" => Ok(ChannelKind::Live),
            "inapp" => Ok(ChannelKind::InApp),
            "email" => Ok(ChannelKind::Email),
            "sms" => Ok(ChannelKind::Sms),
            "push" => Ok(ChannelKind::Push),
            "webhook" => Ok(ChannelKind::Webhook),
            other => Err(format!("unknown channel: {}", other)),
        }
    }
}

/// What a caller hands the dispatcher. Channel resolution (priority
/// defaults, preferences, quiet hours) happens inside.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRequest {
    /// Kind tag, e.g. "message.mention", "security.alert".
    pub kind: String,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub priority: Priority,
    /// Explicit channel set; None means "derive from priority + prefs".
    #[serde(default)]
    pub channels: Option<Vec<ChannelKind>>,
    /// Seconds until the notification becomes a no-op.
    #[serde(default)]
    pub expires_in_secs: Option<u64>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A materialized notification for one recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// UUIDv7 — also the cross-channel dedupe key.
    pub id: String,
    /// None for broadcasts (live channel only).
    pub recipient: Option<i64>,
    pub kind: String,
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
    pub priority: Priority,
    /// Channels resolved at submit time.
    pub channels: Vec<ChannelKind>,
    pub source: Option<String>,
    pub tags: Vec<String>,
    pub metadata: serde_json::Value,
    pub created_at: String,
    pub expires_at: Option<String>,
    pub read_at: Option<String>,
    pub delivered_at: Option<String>,
}

impl Notification {
    pub fn from_request(recipient: Option<i64>, req: &NotificationRequest, channels: Vec<ChannelKind>) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: Uuid::now_v7().to_string(),
            recipient,
            kind: req.kind.clone(),
            title: req.title.clone(),
            body: req.body.clone(),
            data: req.data.clone(),
            priority: req.priority,
            channels,
            source: req.source.clone(),
            tags: req.tags.clone(),
            metadata: serde_json::Value::Null,
            created_at: now.to_rfc3339(),
            expires_at: req
                .expires_in_secs
                .map(|s| (now + chrono::Duration::seconds(s as i64)).to_rfc3339()),
            read_at: None,
            delivered_at: None,
        }
    }

    pub fn is_expired(&self, now: &str) -> bool {
        self.expires_at.as_deref().map(|e| e <= now).unwrap_or(false)
    }
}

/// Daily suppression window in the user's own clock.
/// Minutes-of-day; the window may wrap midnight (e.g. 22:00 → 07:00).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietHours {
    pub start_min: u16,
    pub end_min: u16,
    /// Offset from UTC in minutes (e.g. +120 for UTC+2).
    pub tz_offset_min: i32,
}

impl QuietHours {
    /// Whether a UTC instant falls inside the window.
    pub fn contains(&self, now_utc: chrono::DateTime<chrono::Utc>) -> bool {
        use chrono::Timelike;
        let local = now_utc + chrono::Duration::minutes(i64::from(self.tz_offset_min));
        let m = (local.hour() * 60 + local.minute()) as u16;
        if self.start_min <= self.end_min {
            self.start_min <= m && m < self.end_min
        } else {
            m >= self.start_min || m < self.end_min
        }
    }
}

/// Per-user delivery preferences.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preferences {
    pub user_id: i64,
    /// Channels the user has enabled at all.
    pub enabled_channels: Vec<ChannelKind>,
    /// Per-kind channel map overriding the priority defaults.
    pub kind_overrides: HashMap<String, Vec<ChannelKind>>,
    pub quiet_hours: Option<QuietHours>,
    pub language: String,
    pub digest_opt_in: bool,
    /// Target for the webhook channel, when enabled.
    pub webhook_url: Option<String>,
}

impl Preferences {
    pub fn defaults(user_id: i64) -> Self {
        Self {
            user_id,
            enabled_channels: vec![ChannelKind::Live, ChannelKind::InApp],
            kind_overrides: HashMap::new(),
            quiet_hours: None,
            language: "en".to_string(),
            digest_opt_in: false,
            webhook_url: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn priority_order() {
        assert!(Priority::Low < Priority::Normal);
        assert!(Priority::Critical < Priority::Emergency);
    }

    #[test]
    fn quiet_hours_plain_window() {
        let q = QuietHours { start_min: 9 * 60, end_min: 17 * 60, tz_offset_min: 0 };
        let inside = chrono::Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
        let outside = chrono::Utc.with_ymd_and_hms(2026, 8, 1, 18, 0, 0).unwrap();
        assert!(q.contains(inside));
        assert!(!q.contains(outside));
    }

    #[test]
    fn quiet_hours_wrapping_midnight() {
        let q = QuietHours { start_min: 22 * 60, end_min: 7 * 60, tz_offset_min: 0 };
        let night = chrono::Utc.with_ymd_and_hms(2026, 8, 1, 23, 30, 0).unwrap();
        let dawn = chrono::Utc.with_ymd_and_hms(2026, 8, 1, 6, 0, 0).unwrap();
        let midday = chrono::Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
        assert!(q.contains(night));
        assert!(q.contains(dawn));
        assert!(!q.contains(midday));
    }

    #[test]
    fn quiet_hours_respects_tz_offset() {
        // 22:00-07:00 at UTC+2; 21:00 UTC is 23:00 local, inside the window.
        let q = QuietHours { start_min: 22 * 60, end_min: 7 * 60, tz_offset_min: 120 };
        let t = chrono::Utc.with_ymd_and_hms(2026, 8, 1, 21, 0, 0).unwrap();
        assert!(q.contains(t));
    }
}
