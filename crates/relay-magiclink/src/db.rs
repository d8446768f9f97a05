use rusqlite::Connection;

use crate::error::Result;

/// Initialise magic-link storage. Idempotent.
///
/// `magic_link_rates` holds the rolling hourly counters: one row per
/// (email, purpose), reset when the window ages out.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS magic_links (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            token_hash   TEXT NOT NULL UNIQUE,
            email        TEXT NOT NULL,
            user_id      INTEGER,
            purpose      TEXT NOT NULL,
            created_at   TEXT NOT NULL,
            expires_at   TEXT NOT NULL,
            consumed_at  TEXT,
            revoked_at   TEXT,
            ip           TEXT,
            agent        TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_magic_links_user
            ON magic_links(user_id, purpose);
        CREATE INDEX IF NOT EXISTS idx_magic_links_email
            ON magic_links(email, purpose);

        CREATE TABLE IF NOT EXISTS magic_link_rates (
            email              TEXT NOT NULL,
            purpose            TEXT NOT NULL,
            window_started_at  TEXT NOT NULL,
            count              INTEGER NOT NULL DEFAULT 1,
            PRIMARY KEY (email, purpose)
        );",
    )?;
    Ok(())
}
