use std::sync::{Arc, Mutex};

use relay_core::config::AuthConfig;
use rusqlite::Connection;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::{IdentityError, Result};
use crate::token::{self, Claims};
use crate::types::Session;

/// Session store: issues bearer tokens, resolves them back to sessions,
/// and enforces idle + absolute TTLs on top of the token's own expiry.
pub struct SessionManager {
    db: Arc<Mutex<Connection>>,
    auth: AuthConfig,
}

impl SessionManager {
    pub fn new(db: Arc<Mutex<Connection>>, auth: AuthConfig) -> Self {
        Self { db, auth }
    }

    /// Create a session record and a signed bearer token for it.
    #[instrument(skip(self), fields(user_id))]
    pub fn issue(
        &self,
        user_id: i64,
        user_uuid: &str,
        ip: Option<&str>,
        agent: Option<&str>,
    ) -> Result<(Session, String)> {
        let now = chrono::Utc::now();
        let session_id = Uuid::now_v7().to_string();

        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO sessions (id, user_id, created_at, last_used_at, active, ip, agent)
             VALUES (?1, ?2, ?3, ?3, 1, ?4, ?5)",
            rusqlite::params![session_id, user_id, now.to_rfc3339(), ip, agent],
        )?;
        drop(db);

        let claims = Claims {
            sid: session_id.clone(),
            uid: user_uuid.to_string(),
            iat: now.timestamp(),
            exp: now.timestamp() + self.auth.session_absolute_ttl_secs as i64,
        };
        let bearer = token::sign(&claims, &self.auth)?;
        info!(session_id = %session_id, user_id, "session issued");

        Ok((
            Session {
                id: session_id,
                user_id,
                created_at: now.to_rfc3339(),
                last_used_at: now.to_rfc3339(),
                active: true,
                ip: ip.map(String::from),
                agent: agent.map(String::from),
            },
            bearer,
        ))
    }

    /// Validate a bearer token and return the live session behind it.
    ///
    /// Order: signature → session row → active flag → idle TTL. Storage
    /// failures surface as `Database` and the caller must not grant access.
    pub fn resolve(&self, bearer: &str) -> Result<Session> {
        let now = chrono::Utc::now();
        let claims = token::verify(bearer, &self.auth, now.timestamp())?;

        let db = self.db.lock().unwrap();
        let session = match db.query_row(
            "SELECT id, user_id, created_at, last_used_at, active, ip, agent
             FROM sessions WHERE id = ?1",
            [&claims.sid],
            row_to_session,
        ) {
            Ok(s) => s,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                return Err(IdentityError::SessionRevoked)
            }
            Err(e) => return Err(e.into()),
        };

        if !session.active {
            return Err(IdentityError::SessionRevoked);
        }

        // Idle expiry is independent of the token's own expiration.
        let last_used = chrono::DateTime::parse_from_rfc3339(&session.last_used_at)
            .map_err(|_| IdentityError::SessionRevoked)?;
        let idle = now.signed_duration_since(last_used.with_timezone(&chrono::Utc));
        if idle.num_seconds() > self.auth.session_idle_ttl_secs as i64 {
            db.execute("UPDATE sessions SET active = 0 WHERE id = ?1", [&session.id])?;
            return Err(IdentityError::TokenExpired);
        }

        Ok(session)
    }

    /// Bump last_used. Called on every authenticated operation.
    pub fn touch(&self, session_id: &str) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE sessions SET last_used_at = ?1 WHERE id = ?2 AND active = 1",
            rusqlite::params![now, session_id],
        )?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn revoke(&self, session_id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute("UPDATE sessions SET active = 0 WHERE id = ?1", [session_id])?;
        if n == 0 {
            return Err(IdentityError::SessionRevoked);
        }
        info!(%session_id, "session revoked");
        Ok(())
    }

    /// Revoke every active session a user holds (logout-everywhere,
    /// password reset, account recovery). Returns how many were revoked.
    #[instrument(skip(self))]
    pub fn revoke_all_for_user(&self, user_id: i64) -> Result<usize> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE sessions SET active = 0 WHERE user_id = ?1 AND active = 1",
            [user_id],
        )?;
        info!(user_id, revoked = n, "all sessions revoked for user");
        Ok(n)
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        user_id: row.get(1)?,
        created_at: row.get(2)?,
        last_used_at: row.get(3)?,
        active: row.get::<_, i64>(4)? != 0,
        ip: row.get(5)?,
        agent: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use relay_core::config::SigningKey;

    fn insert_user(conn: &Connection, id: i64, uuid: &str) {
        conn.execute(
            "INSERT INTO users (id, uuid, handle, email, password_hash, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'x', '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
            rusqlite::params![id, uuid, format!("handle-{id}"), format!("user{id}@example.com")],
        )
        .unwrap();
    }

    fn manager(idle_secs: u64) -> SessionManager {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        insert_user(&conn, 1, "user-uuid-1");
        insert_user(&conn, 7, "user-uuid-7");
        insert_user(&conn, 8, "user-uuid-8");
        let auth = AuthConfig {
            signing_keys: vec![SigningKey { id: 1, secret: "test-secret-32-bytes-long!!!!!!!".into() }],
            active_key_id: 1,
            session_idle_ttl_secs: idle_secs,
            ..Default::default()
        };
        SessionManager::new(Arc::new(Mutex::new(conn)), auth)
    }

    #[test]
    fn issue_and_resolve() {
        let mgr = manager(1800);
        let (session, bearer) = mgr.issue(1, "user-uuid-1", Some("127.0.0.1"), None).unwrap();
        let resolved = mgr.resolve(&bearer).unwrap();
        assert_eq!(resolved.id, session.id);
        assert_eq!(resolved.user_id, 1);
    }

    #[test]
    fn revoked_session_rejects_resolve() {
        let mgr = manager(1800);
        let (session, bearer) = mgr.issue(1, "user-uuid-1", None, None).unwrap();
        mgr.revoke(&session.id).unwrap();
        assert!(matches!(
            mgr.resolve(&bearer),
            Err(IdentityError::SessionRevoked)
        ));
    }

    #[test]
    fn revoke_all_kills_every_session() {
        let mgr = manager(1800);
        let (_, b1) = mgr.issue(7, "user-uuid-7", None, None).unwrap();
        let (_, b2) = mgr.issue(7, "user-uuid-7", None, None).unwrap();
        let (_, other) = mgr.issue(8, "user-uuid-8", None, None).unwrap();

        assert_eq!(mgr.revoke_all_for_user(7).unwrap(), 2);
        assert!(mgr.resolve(&b1).is_err());
        assert!(mgr.resolve(&b2).is_err());
        assert!(mgr.resolve(&other).is_ok());
    }

    #[test]
    fn idle_expiry_deactivates_session() {
        let mgr = manager(0);
        let (_, bearer) = mgr.issue(1, "user-uuid-1", None, None).unwrap();
        // idle TTL of zero: any elapsed time trips the check
        std::thread::sleep(std::time::Duration::from_millis(1100));
        assert!(matches!(
            mgr.resolve(&bearer),
            Err(IdentityError::TokenExpired)
        ));
        // and the session is now flipped inactive, so even a fresh check fails
        assert!(matches!(
            mgr.resolve(&bearer),
            Err(IdentityError::SessionRevoked)
        ));
    }

    #[test]
    fn garbage_bearer_is_invalid() {
        let mgr = manager(1800);
        assert!(matches!(
            mgr.resolve("not-a-token"),
            Err(IdentityError::TokenInvalid)
        ));
    }
}
