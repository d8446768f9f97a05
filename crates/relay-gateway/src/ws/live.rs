use std::sync::Arc;

use async_trait::async_trait;
use relay_notify::sender::{ChannelSender, SendFailure};
use relay_notify::types::{ChannelKind, Notification, Preferences};
use relay_presence::PresenceRegistry;
use relay_protocol::ServerFrame;

/// The live notification channel: pushes a `notification` frame onto every
/// socket the recipient currently holds. No recipient means wildcard
/// broadcast.
pub struct LiveSender {
    presence: Arc<PresenceRegistry>,
}

impl LiveSender {
    pub fn new(presence: Arc<PresenceRegistry>) -> Self {
        Self { presence }
    }
}

#[async_trait]
impl ChannelSender for LiveSender {
    fn channel(&self) -> ChannelKind {
        ChannelKind::Live
    }

    async fn send(
        &self,
        notification: &Notification,
        _prefs: &Preferences,
    ) -> Result<(), SendFailure> {
        let frame = ServerFrame::Notification {
            payload: serde_json::to_value(notification)
                .map_err(|e| SendFailure::Permanent(e.to_string()))?,
        }
        .to_json();

        match notification.recipient {
            Some(user_id) => {
                if self.presence.publish_to_user(user_id, &frame) {
                    Ok(())
                } else {
                    // An offline user has nothing to retry against; the
                    // in-app record already covers them.
                    Err(SendFailure::Permanent("recipient not connected".to_string()))
                }
            }
            None => {
                self.presence.broadcast(&frame);
                Ok(())
            }
        }
    }
}
