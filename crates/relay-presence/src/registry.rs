use std::collections::HashSet;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use relay_core::types::ConnId;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// What `attach` hands back: the outbound frame stream for the writer task
/// and whether this connection brought the user online.
pub struct AttachOutcome {
    pub receiver: mpsc::Receiver<String>,
    pub user_came_online: bool,
}

/// What `detach` reports so the caller can stamp last-seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetachOutcome {
    pub user_id: i64,
    pub user_went_offline: bool,
}

struct ConnectionEntry {
    user_id: i64,
    sender: mpsc::Sender<String>,
    conversations: HashSet<i64>,
}

/// Per-process presence: which connections are live, what they subscribe
/// to, and who is typing where.
///
/// Publishing never blocks and never awaits while a map guard is held:
/// outbound queues are bounded and pushed with `try_send`. A full queue is
/// a slow consumer: the entry is dropped on the spot, which closes the
/// sender side; the connection's writer task observes the closed stream
/// and tears the socket down.
pub struct PresenceRegistry {
    connections: DashMap<String, ConnectionEntry>,
    /// conversation id -> connection ids subscribed to it.
    subscriptions: DashMap<i64, HashSet<String>>,
    /// user id -> live connection count.
    user_conns: DashMap<i64, u32>,
    /// (conversation, user) -> last typing signal.
    typing: DashMap<(i64, i64), Instant>,
    queue_capacity: usize,
    typing_ttl: Duration,
}

impl PresenceRegistry {
    pub fn new(queue_capacity: usize, typing_ttl_secs: u64) -> Self {
        Self {
            connections: DashMap::new(),
            subscriptions: DashMap::new(),
            user_conns: DashMap::new(),
            typing: DashMap::new(),
            queue_capacity,
            typing_ttl: Duration::from_secs(typing_ttl_secs),
        }
    }

    /// Record a live connection for `user_id`.
    pub fn attach(&self, conn_id: &ConnId, user_id: i64) -> AttachOutcome {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        self.connections.insert(
            conn_id.as_str().to_string(),
            ConnectionEntry {
                user_id,
                sender: tx,
                conversations: HashSet::new(),
            },
        );
        let mut count = self.user_conns.entry(user_id).or_insert(0);
        *count += 1;
        let first = *count == 1;
        info!(conn_id = %conn_id, user_id, "presence attached");
        AttachOutcome {
            receiver: rx,
            user_came_online: first,
        }
    }

    /// Subscribe a connection to a conversation's event stream.
    pub fn subscribe(&self, conn_id: &ConnId, conversation_id: i64) {
        if let Some(mut entry) = self.connections.get_mut(conn_id.as_str()) {
            entry.conversations.insert(conversation_id);
        } else {
            return;
        }
        self.subscriptions
            .entry(conversation_id)
            .or_default()
            .insert(conn_id.as_str().to_string());
    }

    pub fn unsubscribe(&self, conn_id: &ConnId, conversation_id: i64) {
        if let Some(mut entry) = self.connections.get_mut(conn_id.as_str()) {
            entry.conversations.remove(&conversation_id);
        }
        if let Some(mut subs) = self.subscriptions.get_mut(&conversation_id) {
            subs.remove(conn_id.as_str());
        }
    }

    /// Fan a pre-serialized frame out to every subscriber of a conversation.
    ///
    /// `skip_users` withholds delivery (DM blocking, author echo control).
    /// Slow consumers are detached inline; their ids are returned so the
    /// caller can log them.
    pub fn publish(
        &self,
        conversation_id: i64,
        frame: &str,
        skip_users: &[i64],
    ) -> Vec<String> {
        let targets: Vec<String> = match self.subscriptions.get(&conversation_id) {
            Some(subs) => subs.iter().cloned().collect(),
            None => return Vec::new(),
        };

        let mut slow: Vec<String> = Vec::new();
        for conn_id in targets {
            let full = {
                let Some(entry) = self.connections.get(&conn_id) else {
                    continue;
                };
                if skip_users.contains(&entry.user_id) {
                    continue;
                }
                entry.sender.try_send(frame.to_string()).is_err()
            };
            if full {
                warn!(conn_id, conversation_id, "slow consumer, dropping connection");
                self.drop_connection(&conn_id);
                slow.push(conn_id);
            }
        }
        slow
    }

    /// Deliver a frame to every connection a single user holds, regardless
    /// of subscriptions. This is the live notification channel.
    pub fn publish_to_user(&self, user_id: i64, frame: &str) -> bool {
        let targets: Vec<String> = self
            .connections
            .iter()
            .filter(|e| e.value().user_id == user_id)
            .map(|e| e.key().clone())
            .collect();

        let mut delivered = false;
        for conn_id in targets {
            let full = {
                let Some(entry) = self.connections.get(&conn_id) else {
                    continue;
                };
                entry.sender.try_send(frame.to_string()).is_err()
            };
            if full {
                self.drop_connection(&conn_id);
            } else {
                delivered = true;
            }
        }
        delivered
    }

    /// Wildcard publish to every live connection (broadcast notifications).
    pub fn broadcast(&self, frame: &str) -> usize {
        let targets: Vec<String> = self.connections.iter().map(|e| e.key().clone()).collect();
        let mut sent = 0;
        for conn_id in targets {
            let full = {
                let Some(entry) = self.connections.get(&conn_id) else {
                    continue;
                };
                entry.sender.try_send(frame.to_string()).is_err()
            };
            if full {
                self.drop_connection(&conn_id);
            } else {
                sent += 1;
            }
        }
        sent
    }

    /// Record a typing signal; it self-expires after the configured TTL so
    /// no explicit stop message is needed.
    pub fn typing(&self, conversation_id: i64, user_id: i64) {
        self.typing.insert((conversation_id, user_id), Instant::now());
    }

    /// Users currently typing in a conversation (TTL-filtered).
    pub fn typing_users(&self, conversation_id: i64) -> Vec<i64> {
        let mut users: Vec<i64> = self
            .typing
            .iter()
            .filter(|e| e.key().0 == conversation_id && e.value().elapsed() < self.typing_ttl)
            .map(|e| e.key().1)
            .collect();
        users.sort_unstable();
        users
    }

    /// Drop expired typing entries. Called periodically by the gateway.
    pub fn sweep_typing(&self) {
        let ttl = self.typing_ttl;
        self.typing.retain(|_, at| at.elapsed() < ttl);
    }

    /// Remove a connection and its subscriptions.
    pub fn detach(&self, conn_id: &ConnId) -> Option<DetachOutcome> {
        self.drop_connection(conn_id.as_str())
    }

    fn drop_connection(&self, conn_id: &str) -> Option<DetachOutcome> {
        let (_, entry) = self.connections.remove(conn_id)?;
        for conversation_id in &entry.conversations {
            if let Some(mut subs) = self.subscriptions.get_mut(conversation_id) {
                subs.remove(conn_id);
            }
        }
        let went_offline = match self.user_conns.get_mut(&entry.user_id) {
            Some(mut count) => {
                *count = count.saturating_sub(1);
                *count == 0
            }
            None => true,
        };
        if went_offline {
            self.user_conns.remove(&entry.user_id);
        }
        debug!(conn_id, user_id = entry.user_id, went_offline, "presence detached");
        Some(DetachOutcome {
            user_id: entry.user_id,
            user_went_offline: went_offline,
        })
    }

    pub fn is_user_online(&self, user_id: i64) -> bool {
        self.user_conns
            .get(&user_id)
            .map(|c| *c > 0)
            .unwrap_or(false)
    }

    /// User ids with at least one connection subscribed to a conversation.
    pub fn users_subscribed(&self, conversation_id: i64) -> HashSet<i64> {
        let Some(subs) = self.subscriptions.get(&conversation_id) else {
            return HashSet::new();
        };
        subs.iter()
            .filter_map(|conn_id| self.connections.get(conn_id).map(|e| e.user_id))
            .collect()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> PresenceRegistry {
        PresenceRegistry::new(8, 5)
    }

    #[tokio::test]
    async fn publish_reaches_subscribers_in_order() {
        let reg = registry();
        let conn = ConnId::new();
        let mut out = reg.attach(&conn, 1);
        assert!(out.user_came_online);
        reg.subscribe(&conn, 100);

        reg.publish(100, "frame-1", &[]);
        reg.publish(100, "frame-2", &[]);

        assert_eq!(out.receiver.recv().await.unwrap(), "frame-1");
        assert_eq!(out.receiver.recv().await.unwrap(), "frame-2");
    }

    #[tokio::test]
    async fn skip_users_withholds_delivery() {
        let reg = registry();
        let a = ConnId::new();
        let b = ConnId::new();
        let mut out_a = reg.attach(&a, 1);
        let mut out_b = reg.attach(&b, 2);
        reg.subscribe(&a, 100);
        reg.subscribe(&b, 100);

        reg.publish(100, "secret", &[1]);
        assert_eq!(out_b.receiver.recv().await.unwrap(), "secret");
        assert!(out_a.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn slow_consumer_is_dropped_not_blocked() {
        let reg = PresenceRegistry::new(2, 5);
        let conn = ConnId::new();
        let mut out = reg.attach(&conn, 1);
        reg.subscribe(&conn, 100);

        reg.publish(100, "a", &[]);
        reg.publish(100, "b", &[]);
        // queue (capacity 2) is now full; the third publish cuts the connection
        let slow = reg.publish(100, "c", &[]);
        assert_eq!(slow.len(), 1);
        assert_eq!(reg.connection_count(), 0);

        // buffered frames drain, then the stream ends; nothing was silently lost
        assert_eq!(out.receiver.recv().await.unwrap(), "a");
        assert_eq!(out.receiver.recv().await.unwrap(), "b");
        assert!(out.receiver.recv().await.is_none());
    }

    #[tokio::test]
    async fn detach_last_handle_goes_offline() {
        let reg = registry();
        let c1 = ConnId::new();
        let c2 = ConnId::new();
        let _o1 = reg.attach(&c1, 1);
        let o2 = reg.attach(&c2, 1);
        assert!(!o2.user_came_online);
        assert!(reg.is_user_online(1));

        let d1 = reg.detach(&c1).unwrap();
        assert!(!d1.user_went_offline);
        let d2 = reg.detach(&c2).unwrap();
        assert!(d2.user_went_offline);
        assert!(!reg.is_user_online(1));
    }

    #[tokio::test]
    async fn publish_to_user_ignores_subscriptions() {
        let reg = registry();
        let conn = ConnId::new();
        let mut out = reg.attach(&conn, 5);
        // no subscribe call
        assert!(reg.publish_to_user(5, "notice"));
        assert_eq!(out.receiver.recv().await.unwrap(), "notice");
        assert!(!reg.publish_to_user(6, "nobody"));
    }

    #[test]
    fn typing_expires() {
        let reg = PresenceRegistry::new(8, 0);
        reg.typing(100, 1);
        // TTL of zero: expired immediately
        assert!(reg.typing_users(100).is_empty());

        let reg = registry();
        reg.typing(100, 1);
        reg.typing(100, 2);
        assert_eq!(reg.typing_users(100), vec![1, 2]);
    }

    #[tokio::test]
    async fn users_subscribed_reflects_membership_of_the_moment() {
        let reg = registry();
        let conn = ConnId::new();
        let _out = reg.attach(&conn, 9);
        reg.subscribe(&conn, 42);
        assert!(reg.users_subscribed(42).contains(&9));

        reg.unsubscribe(&conn, 42);
        assert!(reg.users_subscribed(42).is_empty());
    }
}
