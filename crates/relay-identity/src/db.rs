use rusqlite::Connection;

use crate::error::Result;

/// Initialise the identity tables. Safe to call on every startup —
/// `IF NOT EXISTS` makes it idempotent.
///
/// Uniqueness of email/handle is scoped to non-deleted users via partial
/// indexes, so a soft-deleted account frees its handle.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            uuid           TEXT NOT NULL UNIQUE,
            handle         TEXT NOT NULL,
            email          TEXT NOT NULL,
            password_hash  TEXT NOT NULL,
            role           TEXT NOT NULL DEFAULT 'member',
            status         TEXT NOT NULL DEFAULT 'active',
            online         INTEGER NOT NULL DEFAULT 0,
            last_seen_at   TEXT,
            profile        TEXT NOT NULL DEFAULT '{}',  -- JSON
            failed_logins  INTEGER NOT NULL DEFAULT 0,
            locked_until   TEXT,
            deleted_at     TEXT,
            created_at     TEXT NOT NULL,
            updated_at     TEXT NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_users_email_live
            ON users(email) WHERE deleted_at IS NULL;
        CREATE UNIQUE INDEX IF NOT EXISTS idx_users_handle_live
            ON users(handle) WHERE deleted_at IS NULL;

        CREATE TABLE IF NOT EXISTS sessions (
            id            TEXT PRIMARY KEY,
            user_id       INTEGER NOT NULL REFERENCES users(id),
            created_at    TEXT NOT NULL,
            last_used_at  TEXT NOT NULL,
            active        INTEGER NOT NULL DEFAULT 1,
            ip            TEXT,
            agent         TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_sessions_user
            ON sessions(user_id, active);",
    )?;
    Ok(())
}
