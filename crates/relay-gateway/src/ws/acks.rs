use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;

struct PendingFrame {
    message_id: i64,
    frame: String,
    sent_at: Instant,
}

/// Per-session ledger of message frames awaiting client acknowledgement.
///
/// Keyed by session (not connection) so a reconnect under the same bearer
/// replays what the previous connection never confirmed. Bounded per
/// session and time-bounded overall; clients that fall outside the window
/// resynchronize through `history` instead.
pub struct PendingAcks {
    map: DashMap<String, VecDeque<PendingFrame>>,
    max_per_session: usize,
    retention: Duration,
}

impl PendingAcks {
    pub fn new(max_per_session: usize, retention_secs: u64) -> Self {
        Self {
            map: DashMap::new(),
            max_per_session,
            retention: Duration::from_secs(retention_secs),
        }
    }

    /// Remember a delivered-but-unacked message frame.
    pub fn track(&self, session_id: &str, message_id: i64, frame: &str) {
        let mut queue = self.map.entry(session_id.to_string()).or_default();
        // One entry per message id; a retransmit refreshes the clock.
        queue.retain(|p| p.message_id != message_id);
        while queue.len() >= self.max_per_session {
            queue.pop_front();
        }
        queue.push_back(PendingFrame {
            message_id,
            frame: frame.to_string(),
            sent_at: Instant::now(),
        });
    }

    /// Client confirmed receipt of these message ids.
    pub fn ack(&self, session_id: &str, message_ids: &[i64]) {
        if let Some(mut queue) = self.map.get_mut(session_id) {
            queue.retain(|p| !message_ids.contains(&p.message_id));
        }
    }

    /// Frames to retransmit on reconnect, oldest first. Entries stay
    /// tracked until acked or expired.
    pub fn replay(&self, session_id: &str) -> Vec<String> {
        let retention = self.retention;
        let Some(mut queue) = self.map.get_mut(session_id) else {
            return Vec::new();
        };
        queue.retain(|p| p.sent_at.elapsed() < retention);
        queue.iter().map(|p| p.frame.clone()).collect()
    }

    /// Drop expired entries and empty sessions. Janitor hook.
    pub fn prune(&self) {
        let retention = self.retention;
        self.map.retain(|_, queue| {
            queue.retain(|p| p.sent_at.elapsed() < retention);
            !queue.is_empty()
        });
    }

    pub fn pending_count(&self, session_id: &str) -> usize {
        self.map.get(session_id).map(|q| q.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_ack_replay_cycle() {
        let acks = PendingAcks::new(10, 300);
        acks.track("s-1", 1, "frame-1");
        acks.track("s-1", 2, "frame-2");
        assert_eq!(acks.replay("s-1"), vec!["frame-1", "frame-2"]);

        acks.ack("s-1", &[1]);
        assert_eq!(acks.replay("s-1"), vec!["frame-2"]);
        acks.ack("s-1", &[2]);
        assert!(acks.replay("s-1").is_empty());
    }

    #[test]
    fn bounded_per_session() {
        let acks = PendingAcks::new(3, 300);
        for id in 0..5 {
            acks.track("s-1", id, &format!("frame-{}", id));
        }
        // oldest two were evicted
        assert_eq!(acks.pending_count("s-1"), 3);
        assert_eq!(acks.replay("s-1")[0], "frame-2");
    }

    #[test]
    fn retrack_same_message_does_not_duplicate() {
        let acks = PendingAcks::new(10, 300);
        acks.track("s-1", 1, "frame-1");
        acks.track("s-1", 1, "frame-1b");
        assert_eq!(acks.pending_count("s-1"), 1);
        assert_eq!(acks.replay("s-1"), vec!["frame-1b"]);
    }

    #[test]
    fn expired_entries_are_pruned() {
        let acks = PendingAcks::new(10, 0);
        acks.track("s-1", 1, "frame-1");
        std::thread::sleep(Duration::from_millis(5));
        assert!(acks.replay("s-1").is_empty());
        acks.prune();
        assert_eq!(acks.pending_count("s-1"), 0);
    }

    #[test]
    fn sessions_are_isolated() {
        let acks = PendingAcks::new(10, 300);
        acks.track("s-1", 1, "a");
        acks.track("s-2", 1, "b");
        acks.ack("s-1", &[1]);
        assert!(acks.replay("s-1").is_empty());
        assert_eq!(acks.replay("s-2"), vec!["b"]);
    }
}
