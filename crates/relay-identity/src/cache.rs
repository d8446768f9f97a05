use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::types::User;

/// Cache entries expire after this long.
const CACHE_TTL: Duration = Duration::from_secs(60);
/// Maximum cached users before eviction. Simple eviction: when full, drop
/// expired entries first, then the whole map if still full.
const CACHE_MAX: usize = 512;

struct Entry {
    user: User,
    inserted: Instant,
}

/// Read-through cache over the user store.
///
/// Three lookup keys (id, email, handle) resolve through two secondary
/// maps into the primary id map, so invalidation only needs the user's id
/// plus its current email/handle.
pub struct UserCache {
    by_id: Mutex<HashMap<i64, Entry>>,
    email_to_id: Mutex<HashMap<String, i64>>,
    handle_to_id: Mutex<HashMap<String, i64>>,
}

impl UserCache {
    pub fn new() -> Self {
        Self {
            by_id: Mutex::new(HashMap::new()),
            email_to_id: Mutex::new(HashMap::new()),
            handle_to_id: Mutex::new(HashMap::new()),
        }
    }

    pub fn by_id(&self, id: i64) -> Option<User> {
        let map = self.by_id.lock().unwrap();
        map.get(&id)
            .filter(|e| e.inserted.elapsed() < CACHE_TTL)
            .map(|e| e.user.clone())
    }

    pub fn by_email(&self, email: &str) -> Option<User> {
        let id = *self.email_to_id.lock().unwrap().get(email)?;
        self.by_id(id)
    }

    pub fn by_handle(&self, handle: &str) -> Option<User> {
        let id = *self.handle_to_id.lock().unwrap().get(handle)?;
        self.by_id(id)
    }

    pub fn put(&self, user: User) {
        let mut map = self.by_id.lock().unwrap();
        if map.len() >= CACHE_MAX {
            map.retain(|_, e| e.inserted.elapsed() < CACHE_TTL);
            if map.len() >= CACHE_MAX {
                map.clear();
                self.email_to_id.lock().unwrap().clear();
                self.handle_to_id.lock().unwrap().clear();
            }
        }
        self.email_to_id
            .lock()
            .unwrap()
            .insert(user.email.clone(), user.id);
        self.handle_to_id
            .lock()
            .unwrap()
            .insert(user.handle.clone(), user.id);
        map.insert(
            user.id,
            Entry {
                user,
                inserted: Instant::now(),
            },
        );
    }

    /// Drop all three keys of a mutated user.
    pub fn invalidate(&self, user: &User) {
        self.by_id.lock().unwrap().remove(&user.id);
        self.email_to_id.lock().unwrap().remove(&user.email);
        self.handle_to_id.lock().unwrap().remove(&user.handle);
    }
}

impl Default for UserCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::types::{PlatformRole, UserStatus};

    fn user(id: i64, handle: &str, email: &str) -> User {
        User {
            id,
            uuid: format!("uuid-{}", id),
            handle: handle.to_string(),
            email: email.to_string(),
            password_hash: String::new(),
            role: PlatformRole::Member,
            status: UserStatus::Active,
            online: false,
            last_seen_at: None,
            profile: serde_json::Value::Null,
            failed_logins: 0,
            locked_until: None,
            deleted_at: None,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn three_keys_resolve_one_entry() {
        let cache = UserCache::new();
        cache.put(user(1, "alice", "alice@example.com"));

        assert!(cache.by_id(1).is_some());
        assert!(cache.by_email("alice@example.com").is_some());
        assert!(cache.by_handle("alice").is_some());
    }

    #[test]
    fn invalidate_clears_all_keys() {
        let cache = UserCache::new();
        let u = user(1, "alice", "alice@example.com");
        cache.put(u.clone());
        cache.invalidate(&u);

        assert!(cache.by_id(1).is_none());
        assert!(cache.by_email("alice@example.com").is_none());
        assert!(cache.by_handle("alice").is_none());
    }
}
