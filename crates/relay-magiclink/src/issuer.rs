use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use relay_core::config::MagicLinkConfig;
use rusqlite::Connection;
use sha2::{Digest, Sha256};
use tracing::{info, instrument, warn};

use crate::db::init_db;
use crate::error::{MagicLinkError, Result};
use crate::types::{ConsumedLink, GeneratedLink, Purpose, Validation};

/// Issues and consumes purpose-scoped single-use tokens.
///
/// Tokens are 32 bytes of OS randomness, URL-safe base64 encoded; storage
/// keeps only the SHA-256 of the raw token. Consumption is a compare-and-set
/// on `consumed_at`: exactly one concurrent caller wins.
pub struct MagicLinkIssuer {
    db: Arc<Mutex<Connection>>,
    config: MagicLinkConfig,
}

impl MagicLinkIssuer {
    pub fn new(db: Arc<Mutex<Connection>>, config: MagicLinkConfig) -> Result<Self> {
        {
            let conn = db.lock().unwrap();
            init_db(&conn)?;
        }
        Ok(Self { db, config })
    }

    /// Generate a fresh link for (email, purpose).
    ///
    /// `user_id` is the account the email resolved to, if any; the caller
    /// owns that lookup so this crate stays independent of the user store.
    /// Purposes that require an account fail with `UnknownEmail` when it is
    /// absent. Enforces the hourly rate window and the active-link cap
    /// (oldest active link is revoked beyond the cap).
    #[instrument(skip(self), fields(email, purpose = %purpose))]
    pub fn generate(
        &self,
        email: &str,
        purpose: Purpose,
        user_id: Option<i64>,
        ip: Option<&str>,
        agent: Option<&str>,
    ) -> Result<GeneratedLink> {
        if purpose.requires_existing_user() && user_id.is_none() {
            return Err(MagicLinkError::UnknownEmail);
        }

        let now = chrono::Utc::now();
        let db = self.db.lock().unwrap();
        self.check_rate(&db, email, purpose, now)?;
        self.enforce_active_cap(&db, email, purpose, user_id, now)?;

        let mut raw = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut raw);
        let token = URL_SAFE_NO_PAD.encode(raw);
        let token_hash = hex::encode(Sha256::digest(token.as_bytes()));

        let expires_at =
            (now + chrono::Duration::seconds(purpose.ttl_secs(&self.config) as i64)).to_rfc3339();
        db.execute(
            "INSERT INTO magic_links
             (token_hash, email, user_id, purpose, created_at, expires_at, ip, agent)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                token_hash,
                email,
                user_id,
                purpose.to_string(),
                now.to_rfc3339(),
                expires_at,
                ip,
                agent
            ],
        )?;
        info!(email, %purpose, "magic link generated");

        Ok(GeneratedLink {
            url: format!("{}?token={}", self.config.base_url, token),
            token,
            purpose,
            expires_at,
        })
    }

    /// Report validity without consuming. Safe to call repeatedly.
    pub fn validate(&self, token: &str) -> Result<Validation> {
        let token_hash = hex::encode(Sha256::digest(token.as_bytes()));
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let row = query_link(&db, &token_hash)?;

        Ok(match row {
            None => Validation::NotFound,
            Some(link) if link.consumed_at.is_some() => Validation::Consumed,
            Some(link) if link.revoked_at.is_some() => Validation::Revoked,
            Some(link) if link.expires_at <= now => Validation::Expired,
            Some(link) => Validation::Valid {
                email: link.email,
                user_id: link.user_id,
                purpose: link.purpose,
                expires_at: link.expires_at,
            },
        })
    }

    /// Atomically consume the token. Only the first caller succeeds; all
    /// later (or concurrent) callers see `AlreadyConsumed`.
    #[instrument(skip(self, token))]
    pub fn consume(&self, token: &str) -> Result<ConsumedLink> {
        let token_hash = hex::encode(Sha256::digest(token.as_bytes()));
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();

        let changed = db.execute(
            "UPDATE magic_links SET consumed_at = ?1
             WHERE token_hash = ?2
               AND consumed_at IS NULL
               AND revoked_at IS NULL
               AND expires_at > ?1",
            rusqlite::params![now, token_hash],
        )?;

        if changed == 1 {
            let link = query_link(&db, &token_hash)?.ok_or(MagicLinkError::NotFound)?;
            info!(email = %link.email, purpose = %link.purpose, "magic link consumed");
            return Ok(ConsumedLink {
                email: link.email,
                user_id: link.user_id,
                purpose: link.purpose,
            });
        }

        // CAS lost; re-read to report the precise reason.
        match query_link(&db, &token_hash)? {
            None => Err(MagicLinkError::NotFound),
            Some(link) if link.consumed_at.is_some() => Err(MagicLinkError::AlreadyConsumed),
            Some(link) if link.revoked_at.is_some() => Err(MagicLinkError::Revoked),
            Some(_) => Err(MagicLinkError::Expired),
        }
    }

    /// Invalidate a single link without consuming it.
    pub fn revoke(&self, token: &str) -> Result<()> {
        let token_hash = hex::encode(Sha256::digest(token.as_bytes()));
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE magic_links SET revoked_at = ?1
             WHERE token_hash = ?2 AND consumed_at IS NULL AND revoked_at IS NULL",
            rusqlite::params![now, token_hash],
        )?;
        if n == 0 {
            return Err(MagicLinkError::NotFound);
        }
        Ok(())
    }

    /// Bulk-invalidate every live link bound to a user (password change,
    /// account recovery). Returns how many were revoked.
    #[instrument(skip(self))]
    pub fn revoke_all_for(&self, user_id: i64) -> Result<usize> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE magic_links SET revoked_at = ?1
             WHERE user_id = ?2 AND consumed_at IS NULL AND revoked_at IS NULL",
            rusqlite::params![now, user_id],
        )?;
        info!(user_id, revoked = n, "bulk magic-link revocation");
        Ok(n)
    }

    /// Delete rows whose lifecycle ended before the horizon. Janitor hook.
    pub fn sweep_expired(&self, older_than_secs: u64) -> Result<usize> {
        let horizon =
            (chrono::Utc::now() - chrono::Duration::seconds(older_than_secs as i64)).to_rfc3339();
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "DELETE FROM magic_links
             WHERE expires_at < ?1 OR consumed_at < ?1 OR revoked_at < ?1",
            [&horizon],
        )?;
        Ok(n)
    }

    /// Rolling hourly window per (email, purpose). The counter is
    /// set-and-expire: the first increment stamps the window start and the
    /// whole row resets one hour after that stamp.
    fn check_rate(
        &self,
        db: &Connection,
        email: &str,
        purpose: Purpose,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        let row: Option<(String, u32)> = match db.query_row(
            "SELECT window_started_at, count FROM magic_link_rates
             WHERE email = ?1 AND purpose = ?2",
            rusqlite::params![email, purpose.to_string()],
            |r| Ok((r.get(0)?, r.get(1)?)),
        ) {
            Ok(v) => Some(v),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(e.into()),
        };

        let window_end = |started: &str| {
            chrono::DateTime::parse_from_rfc3339(started)
                .map(|t| t.with_timezone(&chrono::Utc) + chrono::Duration::hours(1))
                .ok()
        };

        match row {
            None => {
                db.execute(
                    "INSERT INTO magic_link_rates (email, purpose, window_started_at, count)
                     VALUES (?1, ?2, ?3, 1)",
                    rusqlite::params![email, purpose.to_string(), now.to_rfc3339()],
                )?;
                Ok(())
            }
            Some((started, _)) if window_end(&started).map(|end| now >= end).unwrap_or(true) => {
                db.execute(
                    "UPDATE magic_link_rates SET window_started_at = ?3, count = 1
                     WHERE email = ?1 AND purpose = ?2",
                    rusqlite::params![email, purpose.to_string(), now.to_rfc3339()],
                )?;
                Ok(())
            }
            Some((started, count)) if count >= self.config.rate_per_hour => {
                let retry_after_secs = window_end(&started)
                    .map(|end| (end - now).num_seconds().max(0) as u64)
                    .unwrap_or(0);
                warn!(email, %purpose, count, "magic link rate limit hit");
                Err(MagicLinkError::RateLimited { retry_after_secs })
            }
            Some(_) => {
                db.execute(
                    "UPDATE magic_link_rates SET count = count + 1
                     WHERE email = ?1 AND purpose = ?2",
                    rusqlite::params![email, purpose.to_string()],
                )?;
                Ok(())
            }
        }
    }

    /// At most `active_cap` live links per (user|email, purpose); the
    /// oldest live link is revoked to make room.
    fn enforce_active_cap(
        &self,
        db: &Connection,
        email: &str,
        purpose: Purpose,
        user_id: Option<i64>,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        let now_s = now.to_rfc3339();
        let (filter, key): (&str, String) = match user_id {
            Some(id) => ("user_id = ?1", id.to_string()),
            None => ("email = ?1", email.to_string()),
        };
        let count: u32 = db.query_row(
            &format!(
                "SELECT COUNT(*) FROM magic_links
                 WHERE {} AND purpose = ?2
                   AND consumed_at IS NULL AND revoked_at IS NULL AND expires_at > ?3",
                filter
            ),
            rusqlite::params![key, purpose.to_string(), now_s],
            |r| r.get(0),
        )?;

        if count >= self.config.active_cap {
            db.execute(
                &format!(
                    "UPDATE magic_links SET revoked_at = ?3
                     WHERE id = (SELECT id FROM magic_links
                                 WHERE {} AND purpose = ?2
                                   AND consumed_at IS NULL AND revoked_at IS NULL
                                   AND expires_at > ?3
                                 ORDER BY created_at, id LIMIT 1)",
                    filter
                ),
                rusqlite::params![key, purpose.to_string(), now_s],
            )?;
        }
        Ok(())
    }
}

struct LinkRow {
    email: String,
    user_id: Option<i64>,
    purpose: Purpose,
    expires_at: String,
    consumed_at: Option<String>,
    revoked_at: Option<String>,
}

fn query_link(db: &Connection, token_hash: &str) -> Result<Option<LinkRow>> {
    use std::str::FromStr;
    match db.query_row(
        "SELECT email, user_id, purpose, expires_at, consumed_at, revoked_at
         FROM magic_links WHERE token_hash = ?1",
        [token_hash],
        |row| {
            Ok(LinkRow {
                email: row.get(0)?,
                user_id: row.get(1)?,
                purpose: Purpose::from_str(&row.get::<_, String>(2)?)
                    .unwrap_or(Purpose::Login),
                expires_at: row.get(3)?,
                consumed_at: row.get(4)?,
                revoked_at: row.get(5)?,
            })
        },
    ) {
        Ok(r) => Ok(Some(r)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer() -> MagicLinkIssuer {
        issuer_with(MagicLinkConfig::default())
    }

    fn issuer_with(config: MagicLinkConfig) -> MagicLinkIssuer {
        let conn = Connection::open_in_memory().unwrap();
        MagicLinkIssuer::new(Arc::new(Mutex::new(conn)), config).unwrap()
    }

    #[test]
    fn generate_validate_consume_once() {
        let issuer = issuer();
        let link = issuer
            .generate("a@example.com", Purpose::Login, Some(1), None, None)
            .unwrap();
        assert!(link.url.contains(&link.token));

        assert!(matches!(
            issuer.validate(&link.token).unwrap(),
            Validation::Valid { user_id: Some(1), .. }
        ));
        // Validate does not consume.
        assert!(matches!(
            issuer.validate(&link.token).unwrap(),
            Validation::Valid { .. }
        ));

        let consumed = issuer.consume(&link.token).unwrap();
        assert_eq!(consumed.user_id, Some(1));
        assert!(matches!(
            issuer.consume(&link.token),
            Err(MagicLinkError::AlreadyConsumed)
        ));
        assert_eq!(issuer.validate(&link.token).unwrap(), Validation::Consumed);
    }

    #[test]
    fn concurrent_consume_has_one_winner() {
        let issuer = Arc::new(issuer());
        let link = issuer
            .generate("race@example.com", Purpose::Login, Some(7), None, None)
            .unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let issuer = issuer.clone();
                let token = link.token.clone();
                std::thread::spawn(move || issuer.consume(&token))
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);
        for r in results.iter().filter(|r| r.is_err()) {
            assert!(matches!(r, Err(MagicLinkError::AlreadyConsumed)));
        }
    }

    #[test]
    fn login_requires_known_email() {
        let issuer = issuer();
        assert!(matches!(
            issuer.generate("nobody@example.com", Purpose::Login, None, None, None),
            Err(MagicLinkError::UnknownEmail)
        ));
        // Registration is fine for unknown emails.
        issuer
            .generate("nobody@example.com", Purpose::Registration, None, None, None)
            .unwrap();
    }

    #[test]
    fn sixth_request_in_window_is_rate_limited() {
        let issuer = issuer();
        for _ in 0..5 {
            issuer
                .generate("eve@example.com", Purpose::Login, Some(9), None, None)
                .unwrap();
        }
        let err = issuer.generate("eve@example.com", Purpose::Login, Some(9), None, None);
        match err {
            Err(MagicLinkError::RateLimited { retry_after_secs }) => {
                assert!(retry_after_secs <= 3600);
            }
            other => panic!("expected RateLimited, got {:?}", other.map(|l| l.url)),
        }
    }

    #[test]
    fn rate_window_resets_after_an_hour() {
        let issuer = issuer();
        issuer
            .generate("eve@example.com", Purpose::Login, Some(9), None, None)
            .unwrap();
        // Age the window artificially.
        {
            let db = issuer.db.lock().unwrap();
            db.execute(
                "UPDATE magic_link_rates SET window_started_at = '2000-01-01T00:00:00+00:00',
                 count = 5",
                [],
            )
            .unwrap();
        }
        // Would be over quota in the old window; succeeds because it reset.
        issuer
            .generate("eve@example.com", Purpose::Login, Some(9), None, None)
            .unwrap();
    }

    #[test]
    fn active_cap_evicts_oldest() {
        let mut cfg = MagicLinkConfig::default();
        cfg.active_cap = 2;
        let issuer = issuer_with(cfg);

        let first = issuer
            .generate("a@example.com", Purpose::Login, Some(1), None, None)
            .unwrap();
        let second = issuer
            .generate("a@example.com", Purpose::Login, Some(1), None, None)
            .unwrap();
        let third = issuer
            .generate("a@example.com", Purpose::Login, Some(1), None, None)
            .unwrap();

        assert_eq!(issuer.validate(&first.token).unwrap(), Validation::Revoked);
        assert!(matches!(issuer.validate(&second.token).unwrap(), Validation::Valid { .. }));
        assert!(matches!(issuer.validate(&third.token).unwrap(), Validation::Valid { .. }));
    }

    #[test]
    fn expired_link_reports_expired() {
        let issuer = issuer();
        let link = issuer
            .generate("a@example.com", Purpose::Login, Some(1), None, None)
            .unwrap();
        {
            let db = issuer.db.lock().unwrap();
            db.execute(
                "UPDATE magic_links SET expires_at = '2000-01-01T00:00:00+00:00'",
                [],
            )
            .unwrap();
        }
        assert_eq!(issuer.validate(&link.token).unwrap(), Validation::Expired);
        assert!(matches!(
            issuer.consume(&link.token),
            Err(MagicLinkError::Expired)
        ));
    }

    #[test]
    fn revoke_all_for_user() {
        let issuer = issuer();
        let a = issuer
            .generate("a@example.com", Purpose::Login, Some(1), None, None)
            .unwrap();
        let b = issuer
            .generate("a@example.com", Purpose::PasswordReset, Some(1), None, None)
            .unwrap();
        let other = issuer
            .generate("b@example.com", Purpose::Login, Some(2), None, None)
            .unwrap();

        assert_eq!(issuer.revoke_all_for(1).unwrap(), 2);
        assert_eq!(issuer.validate(&a.token).unwrap(), Validation::Revoked);
        assert_eq!(issuer.validate(&b.token).unwrap(), Validation::Revoked);
        assert!(matches!(issuer.validate(&other.token).unwrap(), Validation::Valid { .. }));
    }
}
