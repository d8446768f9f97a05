use rusqlite::Connection;

use crate::error::Result;

/// Initialise the conversation subsystem tables. Idempotent.
///
/// Layout notes:
///   - `dm_conversations` is the canonical pair index: (user_lo, user_hi)
///     with user_lo < user_hi, so a DM pair is addressable by one key.
///   - live membership uniqueness is a partial index on left_at IS NULL,
///     so a user may rejoin a room they left without violating it.
///   - `message_idempotency` backs the 10-minute dedupe window; rows are
///     swept by the janitor.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS conversations (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            uuid         TEXT NOT NULL UNIQUE,
            kind         TEXT NOT NULL,
            owner        INTEGER,
            name         TEXT,
            description  TEXT,
            member_cap   INTEGER,
            created_at   TEXT NOT NULL,
            updated_at   TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS dm_conversations (
            conversation_id  INTEGER NOT NULL UNIQUE REFERENCES conversations(id),
            user_lo          INTEGER NOT NULL,
            user_hi          INTEGER NOT NULL,
            blocked_by       INTEGER,
            UNIQUE (user_lo, user_hi)
        );

        CREATE TABLE IF NOT EXISTS conversation_members (
            conversation_id  INTEGER NOT NULL REFERENCES conversations(id),
            user_id          INTEGER NOT NULL,
            role             TEXT NOT NULL DEFAULT 'member',
            joined_at        TEXT NOT NULL,
            left_at          TEXT
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_members_live
            ON conversation_members(conversation_id, user_id) WHERE left_at IS NULL;
        CREATE INDEX IF NOT EXISTS idx_members_user
            ON conversation_members(user_id) WHERE left_at IS NULL;

        CREATE TABLE IF NOT EXISTS messages (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            uuid                TEXT NOT NULL UNIQUE,
            conversation_id     INTEGER NOT NULL REFERENCES conversations(id),
            author              INTEGER NOT NULL,
            content             TEXT NOT NULL,
            metadata            TEXT NOT NULL DEFAULT '{}',  -- JSON
            parent_id           INTEGER REFERENCES messages(id),
            thread_reply_count  INTEGER NOT NULL DEFAULT 0,
            pinned              INTEGER NOT NULL DEFAULT 0,
            edited              INTEGER NOT NULL DEFAULT 0,
            edit_count          INTEGER NOT NULL DEFAULT 0,
            status              TEXT NOT NULL DEFAULT 'sent',
            created_at          TEXT NOT NULL,
            edited_at           TEXT,
            deleted_at          TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_messages_page
            ON messages(conversation_id, created_at, id) WHERE deleted_at IS NULL;
        CREATE INDEX IF NOT EXISTS idx_messages_parent
            ON messages(parent_id);

        CREATE TABLE IF NOT EXISTS message_reactions (
            message_id  INTEGER NOT NULL REFERENCES messages(id),
            user_id     INTEGER NOT NULL,
            emoji       TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            UNIQUE (message_id, user_id, emoji)
        );

        CREATE TABLE IF NOT EXISTS message_mentions (
            message_id  INTEGER NOT NULL REFERENCES messages(id),
            user_id     INTEGER NOT NULL,
            UNIQUE (message_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS message_idempotency (
            conversation_id  INTEGER NOT NULL,
            idempotency_key  TEXT NOT NULL,
            message_id       INTEGER NOT NULL,
            created_at       TEXT NOT NULL,
            UNIQUE (conversation_id, idempotency_key)
        );",
    )?;
    Ok(())
}
