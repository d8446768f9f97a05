use crate::types::{ChannelKind, NotificationRequest, Preferences, Priority};

/// Default channel selection by priority, applied when a caller does not
/// enumerate channels and no per-kind override matches.
fn priority_defaults(priority: Priority) -> Vec<ChannelKind> {
    match priority {
        Priority::Emergency | Priority::Critical => vec![
            ChannelKind::Live,
            ChannelKind::Email,
            ChannelKind::Push,
            ChannelKind::Sms,
            ChannelKind::InApp,
        ],
        Priority::High => vec![
            ChannelKind::Live,
            ChannelKind::Email,
            ChannelKind::Push,
            ChannelKind::InApp,
        ],
        Priority::Normal => vec![ChannelKind::Live, ChannelKind::InApp],
        Priority::Low => vec![ChannelKind::InApp],
    }
}

/// Resolve the channel set for one recipient.
///
/// Precedence: caller-enumerated channels > per-kind preference override >
/// priority defaults. The result is then intersected with the user's
/// enabled set (in-app is always allowed: it is just the stored row), and
/// finally quiet hours strip every interruptive channel from sub-critical
/// notifications.
pub fn select_channels(
    req: &NotificationRequest,
    prefs: &Preferences,
    now_utc: chrono::DateTime<chrono::Utc>,
) -> Vec<ChannelKind> {
    let base: Vec<ChannelKind> = match &req.channels {
        Some(explicit) => explicit.clone(),
        None => match prefs.kind_overrides.get(&req.kind) {
            Some(overridden) => overridden.clone(),
            None => priority_defaults(req.priority),
        },
    };

    let mut selected: Vec<ChannelKind> = base
        .into_iter()
        .filter(|c| *c == ChannelKind::InApp || prefs.enabled_channels.contains(c))
        .collect();

    let quiet = prefs
        .quiet_hours
        .map(|q| q.contains(now_utc))
        .unwrap_or(false);
    if quiet && req.priority < Priority::Critical {
        selected.retain(|c| *c == ChannelKind::InApp);
    }

    selected.dedup();
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::QuietHours;
    use chrono::TimeZone;

    fn req(priority: Priority) -> NotificationRequest {
        NotificationRequest {
            kind: "message.mention".to_string(),
            title: "t".to_string(),
            body: "b".to_string(),
            data: serde_json::Value::Null,
            priority,
            channels: None,
            expires_in_secs: None,
            source: None,
            tags: Vec::new(),
        }
    }

    fn all_enabled(user_id: i64) -> Preferences {
        Preferences {
            enabled_channels: vec![
                ChannelKind::Live,
                ChannelKind::InApp,
                ChannelKind::Email,
                ChannelKind::Sms,
                ChannelKind::Push,
                ChannelKind::Webhook,
            ],
            ..Preferences::defaults(user_id)
        }
    }

    fn noon() -> chrono::DateTime<chrono::Utc> {
        chrono::Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn priority_defaults_apply() {
        let prefs = all_enabled(1);
        assert_eq!(
            select_channels(&req(Priority::Low), &prefs, noon()),
            vec![ChannelKind::InApp]
        );
        assert!(select_channels(&req(Priority::Emergency), &prefs, noon())
            .contains(&ChannelKind::Sms));
        let high = select_channels(&req(Priority::High), &prefs, noon());
        assert!(high.contains(&ChannelKind::Email));
        assert!(!high.contains(&ChannelKind::Sms));
    }

    #[test]
    fn disabled_channels_are_filtered() {
        // Default prefs enable only live + in-app.
        let prefs = Preferences::defaults(1);
        let got = select_channels(&req(Priority::Emergency), &prefs, noon());
        assert_eq!(got, vec![ChannelKind::Live, ChannelKind::InApp]);
    }

    #[test]
    fn explicit_channels_beat_overrides_and_defaults() {
        let mut prefs = all_enabled(1);
        prefs
            .kind_overrides
            .insert("message.mention".to_string(), vec![ChannelKind::Email]);

        let mut r = req(Priority::Normal);
        r.channels = Some(vec![ChannelKind::Push]);
        assert_eq!(select_channels(&r, &prefs, noon()), vec![ChannelKind::Push]);

        // Without explicit channels the per-kind override wins.
        let r = req(Priority::Normal);
        assert_eq!(select_channels(&r, &prefs, noon()), vec![ChannelKind::Email]);
    }

    #[test]
    fn quiet_hours_suppress_sub_critical() {
        let mut prefs = all_enabled(1);
        prefs.quiet_hours = Some(QuietHours {
            start_min: 0,
            end_min: 24 * 60 - 1,
            tz_offset_min: 0,
        });

        // High priority inside quiet hours: only the in-app record remains.
        assert_eq!(
            select_channels(&req(Priority::High), &prefs, noon()),
            vec![ChannelKind::InApp]
        );
        // Critical pierces quiet hours.
        assert!(select_channels(&req(Priority::Critical), &prefs, noon())
            .contains(&ChannelKind::Live));
    }
}
