use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use relay_audit::types::Severity;
use relay_audit::AuditLog;
use relay_core::config::NotifyConfig;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::{NotifyError, Result};
use crate::routing::select_channels;
use crate::sender::{ChannelSender, SendFailure};
use crate::store::NotificationStore;
use crate::types::{ChannelKind, Notification, NotificationRequest, Preferences};

/// One unit of work on the queue: a notification plus the channels still
/// owed delivery. Retries re-enqueue the job with only the failed channels.
struct Job {
    notification: Notification,
    channels: Vec<ChannelKind>,
    attempt: u32,
}

/// Multi-channel notification dispatcher.
///
/// A bounded queue feeds a pool of worker tasks; each worker drains jobs,
/// walks the job's channels, and invokes the registered sender under that
/// channel's deadline. Failed channels are re-enqueued with exponential
/// backoff up to the retry cap; exhausting it logs a security event and
/// drops the job. The (notification, channel) ledger makes retried sends
/// idempotent.
pub struct Dispatcher {
    queue_tx: mpsc::Sender<Job>,
    queue_rx: Mutex<Option<mpsc::Receiver<Job>>>,
    store: Arc<NotificationStore>,
    senders: HashMap<ChannelKind, Arc<dyn ChannelSender>>,
    audit: AuditLog,
    config: NotifyConfig,
}

impl Dispatcher {
    pub fn new(store: Arc<NotificationStore>, audit: AuditLog, config: NotifyConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_size.max(1));
        Self {
            queue_tx: tx,
            queue_rx: Mutex::new(Some(rx)),
            store,
            senders: HashMap::new(),
            audit,
            config,
        }
    }

    /// Register a channel adapter. Builder-style, called before `start`.
    pub fn with_sender(mut self, sender: Arc<dyn ChannelSender>) -> Self {
        self.senders.insert(sender.channel(), sender);
        self
    }

    /// Spawn the worker pool and the expiry janitor. Workers finish the
    /// job in hand when cancelled, then exit.
    pub async fn start(self: Arc<Self>, cancel: CancellationToken) {
        let rx = self
            .queue_rx
            .lock()
            .await
            .take()
            .expect("dispatcher started twice");
        let rx = Arc::new(Mutex::new(rx));

        for worker in 0..self.config.worker_pool_size.max(1) {
            let rx = rx.clone();
            let this = self.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                info!(worker, "notification worker started");
                loop {
                    let job = {
                        let mut rx = rx.lock().await;
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            job = rx.recv() => job,
                        }
                    };
                    let Some(job) = job else { break };
                    this.process(job).await;
                }
                info!(worker, "notification worker stopped");
            });
        }

        // Janitor: periodic sweep of expired notifications.
        let this = self.clone();
        let cancel = cancel.clone();
        let interval = Duration::from_secs(self.config.janitor_interval_secs.max(1));
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {
                        match this.store.sweep_expired() {
                            Ok(0) => {}
                            Ok(n) => debug!(swept = n, "expired notifications removed"),
                            Err(e) => warn!(error = %e, "notification sweep failed"),
                        }
                    }
                }
            }
        });
    }

    /// Route, persist, and enqueue one notification for one recipient.
    ///
    /// The in-app record is persisted before queueing, so an `Overloaded`
    /// failure still leaves the notification visible in the user's inbox.
    #[instrument(skip(self, req), fields(recipient, kind = %req.kind))]
    pub fn submit(&self, recipient: i64, req: &NotificationRequest) -> Result<Notification> {
        if req.title.is_empty() && req.body.is_empty() {
            return Err(NotifyError::Validation(
                "notification needs a title or a body".to_string(),
            ));
        }

        let prefs = self.store.preferences(recipient)?;
        let channels = select_channels(req, &prefs, chrono::Utc::now());
        let notification = Notification::from_request(Some(recipient), req, channels.clone());
        self.store.persist(&notification)?;

        let external: Vec<ChannelKind> = channels
            .into_iter()
            .filter(|c| *c != ChannelKind::InApp)
            .collect();
        if !external.is_empty() {
            self.enqueue(Job {
                notification: notification.clone(),
                channels: external,
                attempt: 0,
            })?;
        }
        Ok(notification)
    }

    /// Per-user preferences as the routing layer will see them. Callers
    /// deciding whether a recipient needs a notification at all (e.g. the
    /// message pipeline's live-subscriber check) consult this.
    pub fn preferences(&self, user_id: i64) -> Result<Preferences> {
        self.store.preferences(user_id)
    }

    /// One notification per recipient, independently queued. Partial
    /// failures are tolerated and reported per user.
    pub fn send_bulk(
        &self,
        user_ids: &[i64],
        req: &NotificationRequest,
    ) -> Vec<(i64, Result<Notification>)> {
        user_ids
            .iter()
            .map(|&user_id| (user_id, self.submit(user_id, req)))
            .collect()
    }

    /// Recipient-less broadcast: live channel only, wildcard delivery.
    #[instrument(skip(self, req), fields(kind = %req.kind))]
    pub fn broadcast(&self, req: &NotificationRequest) -> Result<Notification> {
        let notification =
            Notification::from_request(None, req, vec![ChannelKind::Live]);
        self.store.persist(&notification)?;
        self.enqueue(Job {
            notification: notification.clone(),
            channels: vec![ChannelKind::Live],
            attempt: 0,
        })?;
        Ok(notification)
    }

    fn enqueue(&self, job: Job) -> Result<()> {
        self.queue_tx.try_send(job).map_err(|_| {
            warn!("notification queue full");
            NotifyError::Overloaded
        })
    }

    async fn process(&self, job: Job) {
        let now = chrono::Utc::now().to_rfc3339();
        if job.notification.is_expired(&now) {
            debug!(id = %job.notification.id, "expired notification dropped");
            return;
        }

        let prefs = match job.notification.recipient {
            Some(user_id) => self
                .store
                .preferences(user_id)
                .unwrap_or_else(|_| Preferences::defaults(user_id)),
            None => Preferences::defaults(-1),
        };

        let mut retry: Vec<ChannelKind> = Vec::new();
        for channel in &job.channels {
            if *channel == ChannelKind::InApp {
                continue;
            }
            match self.store.was_delivered(&job.notification.id, *channel) {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    warn!(error = %e, "delivery ledger unavailable; retrying later");
                    retry.push(*channel);
                    continue;
                }
            }
            let Some(sender) = self.senders.get(channel) else {
                debug!(channel = %channel, "no sender registered; skipping");
                continue;
            };

            let deadline = Duration::from_secs(channel.send_timeout_secs());
            let outcome =
                tokio::time::timeout(deadline, sender.send(&job.notification, &prefs)).await;
            match outcome {
                Ok(Ok(())) => {
                    let _ = self.store.record_delivery(&job.notification.id, *channel);
                    let _ = self.store.mark_delivered(&job.notification.id);
                }
                Ok(Err(SendFailure::Permanent(reason))) => {
                    warn!(id = %job.notification.id, channel = %channel, reason,
                          "permanent send failure; dropping channel");
                }
                Ok(Err(SendFailure::Retryable(reason))) => {
                    debug!(id = %job.notification.id, channel = %channel, reason,
                           "retryable send failure");
                    retry.push(*channel);
                }
                Err(_) => {
                    debug!(id = %job.notification.id, channel = %channel, "send deadline missed");
                    retry.push(*channel);
                }
            }
        }

        if retry.is_empty() {
            return;
        }
        let next_attempt = job.attempt + 1;
        if next_attempt >= self.config.retry_max_attempts {
            let _ = self.audit.security(
                "notification.retry-exhausted",
                Severity::Medium,
                job.notification.recipient,
                serde_json::json!({
                    "notification": job.notification.id,
                    "channels": retry.iter().map(|c| c.to_string()).collect::<Vec<_>>(),
                    "attempts": next_attempt,
                }),
            );
            warn!(id = %job.notification.id, attempts = next_attempt,
                  "retries exhausted; notification dropped");
            return;
        }

        let delay = self.backoff(job.attempt);
        let tx = self.queue_tx.clone();
        let retry_job = Job {
            notification: job.notification,
            channels: retry,
            attempt: next_attempt,
        };
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(retry_job).await;
        });
    }

    /// Exponential backoff: initial * 2^attempt, capped.
    fn backoff(&self, attempt: u32) -> Duration {
        let secs = self
            .config
            .retry_initial_delay_secs
            .saturating_mul(1u64 << attempt.min(16))
            .min(self.config.retry_max_delay_secs);
        Duration::from_secs(secs)
    }
}
