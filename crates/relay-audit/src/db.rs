use rusqlite::Connection;

use crate::error::Result;

/// Initialise both event streams. Safe to call on every startup — uses
/// `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS audit_logs (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            actor       INTEGER,
            action      TEXT NOT NULL,
            resource    TEXT NOT NULL,
            details     TEXT NOT NULL DEFAULT '{}',  -- JSON
            success     INTEGER NOT NULL DEFAULT 1,
            created_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_audit_actor
            ON audit_logs(actor, created_at);
        CREATE INDEX IF NOT EXISTS idx_audit_resource
            ON audit_logs(resource, created_at);
        CREATE INDEX IF NOT EXISTS idx_audit_action
            ON audit_logs(action, created_at);

        CREATE TABLE IF NOT EXISTS security_events (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            kind        TEXT NOT NULL,
            severity    TEXT NOT NULL,
            actor       INTEGER,
            details     TEXT NOT NULL DEFAULT '{}',  -- JSON
            created_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_security_severity
            ON security_events(severity, created_at);",
    )?;
    Ok(())
}
