use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::types::Conversation;

const CACHE_TTL: Duration = Duration::from_secs(60);
const CACHE_MAX: usize = 1024;

/// Read-through cache for conversation rows. Conversations mutate rarely
/// (block/unblock, metadata edits) so a short TTL plus explicit
/// invalidation on write keeps the hot fan-out path off the database.
pub struct ConversationCache {
    map: Mutex<HashMap<i64, (Conversation, Instant)>>,
}

impl ConversationCache {
    pub fn new() -> Self {
        Self {
            map: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, id: i64) -> Option<Conversation> {
        let map = self.map.lock().unwrap();
        map.get(&id)
            .filter(|(_, at)| at.elapsed() < CACHE_TTL)
            .map(|(c, _)| c.clone())
    }

    pub fn put(&self, conversation: Conversation) {
        let mut map = self.map.lock().unwrap();
        if map.len() >= CACHE_MAX {
            map.retain(|_, (_, at)| at.elapsed() < CACHE_TTL);
            if map.len() >= CACHE_MAX {
                map.clear();
            }
        }
        map.insert(conversation.id, (conversation, Instant::now()));
    }

    pub fn invalidate(&self, id: i64) {
        self.map.lock().unwrap().remove(&id);
    }
}

impl Default for ConversationCache {
    fn default() -> Self {
        Self::new()
    }
}
