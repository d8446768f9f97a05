use async_trait::async_trait;
use tracing::info;

use crate::types::Purpose;

/// Out-of-band delivery seam. The platform's SMTP relay implements this;
/// the core only hands it a finished URL. Delivery is best-effort: a
/// failure is logged by the caller and does NOT invalidate the link.
#[async_trait]
pub trait LinkMailer: Send + Sync {
    async fn deliver(&self, email: &str, url: &str, purpose: Purpose) -> Result<(), String>;
}

/// Default mailer for development: logs the link instead of sending it.
pub struct LogMailer;

#[async_trait]
impl LinkMailer for LogMailer {
    async fn deliver(&self, email: &str, url: &str, purpose: Purpose) -> Result<(), String> {
        info!(email, %purpose, %url, "magic link (log delivery)");
        Ok(())
    }
}
