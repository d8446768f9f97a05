use std::sync::{Arc, Mutex};

use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, SaltString};
use argon2::{Argon2, PasswordVerifier};
use relay_core::types::{PlatformRole, UserStatus};
use rusqlite::Connection;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::cache::UserCache;
use crate::error::{IdentityError, Result};
use crate::types::User;

const USER_COLUMNS: &str = "id, uuid, handle, email, password_hash, role, status, online,
     last_seen_at, profile, failed_logins, locked_until, deleted_at, created_at, updated_at";

/// User store: registration, credential checks with lockout, lookups, and
/// soft deletion. Lookups go through a read-through cache keyed by id,
/// email, and handle; every mutation invalidates all three keys.
pub struct UserStore {
    db: Arc<Mutex<Connection>>,
    cache: UserCache,
    lockout_threshold: u32,
    lockout_secs: u64,
}

impl UserStore {
    pub fn new(db: Arc<Mutex<Connection>>, lockout_threshold: u32, lockout_secs: u64) -> Self {
        Self {
            db,
            cache: UserCache::new(),
            lockout_threshold,
            lockout_secs,
        }
    }

    /// Create a new active user with an argon2id password verifier.
    #[instrument(skip(self, password), fields(handle, email))]
    pub fn register(&self, handle: &str, email: &str, password: &str) -> Result<User> {
        validate_handle(handle)?;
        validate_email(email)?;
        if password.len() < 8 {
            return Err(IdentityError::Validation(
                "password must be at least 8 characters".to_string(),
            ));
        }

        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| IdentityError::Hash(e.to_string()))?
            .to_string();

        let now = chrono::Utc::now().to_rfc3339();
        let uuid = Uuid::now_v7().to_string();
        let db = self.db.lock().unwrap();
        let inserted = db.execute(
            "INSERT INTO users (uuid, handle, email, password_hash, role, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'active', ?6, ?6)",
            rusqlite::params![uuid, handle, email, hash, PlatformRole::Member.to_string(), now],
        );

        match inserted {
            Ok(_) => {
                let id = db.last_insert_rowid();
                info!(user_id = id, handle, "user registered");
                self.load(&db, id)
            }
            // The partial unique indexes turn duplicate live email/handle
            // into a constraint failure; disambiguate by re-probing.
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                if lookup_live(&db, "email", email)?.is_some() {
                    Err(IdentityError::DuplicateEmail(email.to_string()))
                } else {
                    Err(IdentityError::DuplicateHandle(handle.to_string()))
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Verify email + password, enforcing the failed-login lockout.
    ///
    /// Counter semantics: every failed attempt increments `failed_logins`;
    /// reaching the threshold stamps `locked_until`. A success resets both.
    #[instrument(skip(self, password), fields(email))]
    pub fn authenticate(&self, email: &str, password: &str) -> Result<User> {
        let now = chrono::Utc::now();
        let user = {
            let db = self.db.lock().unwrap();
            lookup_live(&db, "email", email)?.ok_or(IdentityError::InvalidCredentials)?
        };

        if user.status == UserStatus::Suspended {
            return Err(IdentityError::InvalidCredentials);
        }
        if let Some(until) = &user.locked_until {
            if until.as_str() > now.to_rfc3339().as_str() {
                return Err(IdentityError::LockedOut { until: until.clone() });
            }
        }

        let parsed = PasswordHash::new(&user.password_hash)
            .map_err(|e| IdentityError::Hash(e.to_string()))?;
        let ok = Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok();

        let db = self.db.lock().unwrap();
        if ok {
            db.execute(
                "UPDATE users SET failed_logins = 0, locked_until = NULL, updated_at = ?1
                 WHERE id = ?2",
                rusqlite::params![now.to_rfc3339(), user.id],
            )?;
            self.cache.invalidate(&user);
            return self.load(&db, user.id);
        }

        // An expired lockout starts a fresh counting window.
        let lockout_expired = user
            .locked_until
            .as_deref()
            .map(|u| u <= now.to_rfc3339().as_str())
            .unwrap_or(false);
        let failed = if lockout_expired { 1 } else { user.failed_logins + 1 };
        let locked_until = if failed >= self.lockout_threshold {
            let until = (now + chrono::Duration::seconds(self.lockout_secs as i64)).to_rfc3339();
            warn!(user_id = user.id, failed, %until, "account locked after repeated failures");
            Some(until)
        } else {
            None
        };
        db.execute(
            "UPDATE users SET failed_logins = ?1,
                    locked_until = COALESCE(?2, locked_until),
                    updated_at = ?3
             WHERE id = ?4",
            rusqlite::params![failed, locked_until, now.to_rfc3339(), user.id],
        )?;
        self.cache.invalidate(&user);

        match locked_until {
            Some(until) => Err(IdentityError::LockedOut { until }),
            None => Err(IdentityError::InvalidCredentials),
        }
    }

    /// Fetch a non-deleted user by numeric id.
    pub fn get(&self, id: i64) -> Result<Option<User>> {
        if let Some(user) = self.cache.by_id(id) {
            return Ok(Some(user));
        }
        let db = self.db.lock().unwrap();
        let user = lookup_live_by_id(&db, id)?;
        if let Some(u) = &user {
            self.cache.put(u.clone());
        }
        Ok(user)
    }

    pub fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        if let Some(user) = self.cache.by_email(email) {
            return Ok(Some(user));
        }
        let db = self.db.lock().unwrap();
        let user = lookup_live(&db, "email", email)?;
        if let Some(u) = &user {
            self.cache.put(u.clone());
        }
        Ok(user)
    }

    pub fn get_by_handle(&self, handle: &str) -> Result<Option<User>> {
        if let Some(user) = self.cache.by_handle(handle) {
            return Ok(Some(user));
        }
        let db = self.db.lock().unwrap();
        let user = lookup_live(&db, "handle", handle)?;
        if let Some(u) = &user {
            self.cache.put(u.clone());
        }
        Ok(user)
    }

    /// Resolve a set of handles to user ids in one query. Unknown handles
    /// are absent from the result; callers drop unresolved mentions.
    pub fn resolve_handles(&self, handles: &[String]) -> Result<Vec<(String, i64)>> {
        if handles.is_empty() {
            return Ok(Vec::new());
        }
        let db = self.db.lock().unwrap();
        let placeholders = vec!["?"; handles.len()].join(",");
        let sql = format!(
            "SELECT handle, id FROM users
             WHERE deleted_at IS NULL AND handle IN ({})",
            placeholders
        );
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(handles.iter()),
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
        )?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Soft delete: the row stays (messages keep their author) but the user
    /// vanishes from lookups and frees their email/handle.
    #[instrument(skip(self))]
    pub fn soft_delete(&self, id: i64) -> Result<()> {
        let user = self.get(id)?.ok_or(IdentityError::UserNotFound(id))?;
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE users SET status = 'deleted', deleted_at = ?1, updated_at = ?1
             WHERE id = ?2 AND deleted_at IS NULL",
            rusqlite::params![now, id],
        )?;
        self.cache.invalidate(&user);
        info!(user_id = id, "user soft-deleted");
        Ok(())
    }

    /// Flip the online flag; stamps last_seen when going offline.
    pub fn set_online(&self, id: i64, online: bool) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        if online {
            db.execute(
                "UPDATE users SET online = 1, updated_at = ?1 WHERE id = ?2",
                rusqlite::params![now, id],
            )?;
        } else {
            db.execute(
                "UPDATE users SET online = 0, last_seen_at = ?1, updated_at = ?1 WHERE id = ?2",
                rusqlite::params![now, id],
            )?;
        }
        if let Some(user) = lookup_live_by_id(&db, id)? {
            self.cache.invalidate(&user);
        }
        Ok(())
    }

    fn load(&self, db: &Connection, id: i64) -> Result<User> {
        lookup_live_by_id(db, id)?.ok_or(IdentityError::UserNotFound(id))
    }
}

fn validate_handle(handle: &str) -> Result<()> {
    let ok = (2..=32).contains(&handle.len())
        && handle
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(IdentityError::Validation(format!(
            "handle must be 2-32 chars of [a-zA-Z0-9_-]: {}",
            handle
        )))
    }
}

fn validate_email(email: &str) -> Result<()> {
    let ok = email.len() <= 254 && email.contains('@') && !email.starts_with('@');
    if ok {
        Ok(())
    } else {
        Err(IdentityError::Validation(format!("invalid email: {}", email)))
    }
}

fn lookup_live(db: &Connection, column: &str, value: &str) -> Result<Option<User>> {
    // column is one of a fixed set of identifiers, never user input.
    let sql = format!(
        "SELECT {} FROM users WHERE {} = ?1 AND deleted_at IS NULL",
        USER_COLUMNS, column
    );
    match db.query_row(&sql, [value], row_to_user) {
        Ok(u) => Ok(Some(u)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn lookup_live_by_id(db: &Connection, id: i64) -> Result<Option<User>> {
    let sql = format!(
        "SELECT {} FROM users WHERE id = ?1 AND deleted_at IS NULL",
        USER_COLUMNS
    );
    match db.query_row(&sql, [id], row_to_user) {
        Ok(u) => Ok(Some(u)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Map a SELECT row (column order from USER_COLUMNS) to a User.
pub(crate) fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    use std::str::FromStr;
    let profile: String = row.get(9)?;
    Ok(User {
        id: row.get(0)?,
        uuid: row.get(1)?,
        handle: row.get(2)?,
        email: row.get(3)?,
        password_hash: row.get(4)?,
        role: PlatformRole::from_str(&row.get::<_, String>(5)?).unwrap_or_default(),
        status: UserStatus::from_str(&row.get::<_, String>(6)?).unwrap_or_default(),
        online: row.get::<_, i64>(7)? != 0,
        last_seen_at: row.get(8)?,
        profile: serde_json::from_str(&profile).unwrap_or(serde_json::Value::Null),
        failed_logins: row.get::<_, i64>(10)? as u32,
        locked_until: row.get(11)?,
        deleted_at: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;

    fn store() -> UserStore {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        UserStore::new(Arc::new(Mutex::new(conn)), 3, 900)
    }

    #[test]
    fn register_and_authenticate() {
        let store = store();
        let user = store.register("alice", "alice@example.com", "hunter22!").unwrap();
        assert_eq!(user.handle, "alice");
        assert_eq!(user.role, PlatformRole::Member);

        let authed = store.authenticate("alice@example.com", "hunter22!").unwrap();
        assert_eq!(authed.id, user.id);
    }

    #[test]
    fn duplicate_email_and_handle_rejected() {
        let store = store();
        store.register("alice", "alice@example.com", "password1").unwrap();

        assert!(matches!(
            store.register("alice2", "alice@example.com", "password1"),
            Err(IdentityError::DuplicateEmail(_))
        ));
        assert!(matches!(
            store.register("alice", "other@example.com", "password1"),
            Err(IdentityError::DuplicateHandle(_))
        ));
    }

    #[test]
    fn soft_delete_frees_handle_and_hides_user() {
        let store = store();
        let user = store.register("bob", "bob@example.com", "password1").unwrap();
        store.soft_delete(user.id).unwrap();

        assert!(store.get(user.id).unwrap().is_none());
        assert!(store.get_by_handle("bob").unwrap().is_none());
        // Handle is free again.
        store.register("bob", "bob2@example.com", "password1").unwrap();
    }

    #[test]
    fn lockout_after_threshold_failures() {
        let store = store();
        store.register("carol", "carol@example.com", "password1").unwrap();

        for _ in 0..2 {
            assert!(matches!(
                store.authenticate("carol@example.com", "wrong"),
                Err(IdentityError::InvalidCredentials)
            ));
        }
        // Third failure crosses the threshold.
        assert!(matches!(
            store.authenticate("carol@example.com", "wrong"),
            Err(IdentityError::LockedOut { .. })
        ));
        // Correct password is refused while locked.
        assert!(matches!(
            store.authenticate("carol@example.com", "password1"),
            Err(IdentityError::LockedOut { .. })
        ));
    }

    #[test]
    fn resolve_handles_drops_unknown() {
        let store = store();
        let alice = store.register("alice", "a@example.com", "password1").unwrap();
        let resolved = store
            .resolve_handles(&["alice".to_string(), "ghost".to_string()])
            .unwrap();
        assert_eq!(resolved, vec![("alice".to_string(), alice.id)]);
    }

    #[test]
    fn set_online_stamps_last_seen_on_disconnect() {
        let store = store();
        let user = store.register("dave", "d@example.com", "password1").unwrap();
        store.set_online(user.id, true).unwrap();
        assert!(store.get(user.id).unwrap().unwrap().online);

        store.set_online(user.id, false).unwrap();
        let user = store.get(user.id).unwrap().unwrap();
        assert!(!user.online);
        assert!(user.last_seen_at.is_some());
    }
}
