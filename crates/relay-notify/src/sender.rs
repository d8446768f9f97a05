use async_trait::async_trait;
use tracing::debug;

use crate::types::{ChannelKind, Notification, Preferences};

/// How a channel send failed. The dispatcher retries `Retryable` failures
/// with backoff and drops `Permanent` ones immediately.
#[derive(Debug, Clone)]
pub enum SendFailure {
    Retryable(String),
    Permanent(String),
}

impl std::fmt::Display for SendFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SendFailure::Retryable(msg) => write!(f, "retryable: {}", msg),
            SendFailure::Permanent(msg) => write!(f, "permanent: {}", msg),
        }
    }
}

/// One delivery channel. The core does not own SMTP, FCM, or SMS gateways;
/// adapters implementing this trait are registered with the dispatcher at
/// boot. Implementations must be cheap to call concurrently.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    fn channel(&self) -> ChannelKind;

    /// Deliver one notification. The dispatcher wraps this call in the
    /// channel's deadline and consults the delivery ledger first, so an
    /// implementation only has to do the send itself.
    async fn send(
        &self,
        notification: &Notification,
        prefs: &Preferences,
    ) -> Result<(), SendFailure>;
}

/// Webhook adapter: POSTs the notification as JSON to the user's
/// configured URL. 5xx and transport errors are retryable; 4xx means the
/// target rejected the payload and retrying cannot help.
pub struct WebhookSender {
    client: reqwest::Client,
}

impl WebhookSender {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for WebhookSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelSender for WebhookSender {
    fn channel(&self) -> ChannelKind {
        ChannelKind::Webhook
    }

    async fn send(
        &self,
        notification: &Notification,
        prefs: &Preferences,
    ) -> Result<(), SendFailure> {
        let url = prefs
            .webhook_url
            .as_deref()
            .ok_or_else(|| SendFailure::Permanent("no webhook url configured".to_string()))?;

        let response = self
            .client
            .post(url)
            .json(notification)
            .send()
            .await
            .map_err(|e| SendFailure::Retryable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!(id = %notification.id, url, "webhook delivered");
            Ok(())
        } else if status.is_server_error() {
            Err(SendFailure::Retryable(format!("webhook returned {}", status)))
        } else {
            Err(SendFailure::Permanent(format!("webhook returned {}", status)))
        }
    }
}
