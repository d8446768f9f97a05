use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::{instrument, warn};

use crate::db::init_db;
use crate::error::{AuditError, Result};
use crate::types::{AuditEvent, AuditQuery, SecurityEvent, Severity};

/// Append-only writer and reader for both event streams.
///
/// Wraps a shared SQLite connection; writes are single statements so no
/// explicit transactions are needed. The log never mutates existing rows;
/// the only delete path is the retention sweep.
#[derive(Clone)]
pub struct AuditLog {
    db: Arc<Mutex<Connection>>,
}

impl AuditLog {
    pub fn new(db: Arc<Mutex<Connection>>) -> Result<Self> {
        {
            let conn = db.lock().unwrap();
            init_db(&conn)?;
        }
        Ok(Self { db })
    }

    /// Append to the business audit stream.
    #[instrument(skip(self, details), fields(action, resource))]
    pub fn record(
        &self,
        actor: Option<i64>,
        action: &str,
        resource: &str,
        details: serde_json::Value,
        success: bool,
    ) -> Result<i64> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO audit_logs (actor, action, resource, details, success, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![actor, action, resource, details.to_string(), success, now],
        )?;
        Ok(db.last_insert_rowid())
    }

    /// Append to the security stream. High/critical entries are also logged
    /// so operators see them without querying.
    #[instrument(skip(self, details), fields(kind, severity = %severity))]
    pub fn security(
        &self,
        kind: &str,
        severity: Severity,
        actor: Option<i64>,
        details: serde_json::Value,
    ) -> Result<i64> {
        if severity >= Severity::High {
            warn!(kind, %severity, ?actor, "security event");
        }
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO security_events (kind, severity, actor, details, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![kind, severity.to_string(), actor, details.to_string(), now],
        )?;
        Ok(db.last_insert_rowid())
    }

    /// Query the audit stream. Results are ordered oldest-first within the
    /// range; per-resource order is total because created_at ties break on id.
    pub fn query(&self, q: &AuditQuery) -> Result<Vec<AuditEvent>> {
        if let (Some(from), Some(to)) = (&q.from, &q.to) {
            if from > to {
                return Err(AuditError::InvalidRange(format!("{} > {}", from, to)));
            }
        }

        let mut sql = String::from(
            "SELECT id, actor, action, resource, details, success, created_at
             FROM audit_logs WHERE 1=1",
        );
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        if let Some(actor) = q.actor {
            sql.push_str(" AND actor = ?");
            params.push(Box::new(actor));
        }
        if let Some(action) = &q.action {
            sql.push_str(" AND action = ?");
            params.push(Box::new(action.clone()));
        }
        if let Some(resource) = &q.resource {
            sql.push_str(" AND resource = ?");
            params.push(Box::new(resource.clone()));
        }
        if let Some(from) = &q.from {
            sql.push_str(" AND created_at >= ?");
            params.push(Box::new(from.clone()));
        }
        if let Some(to) = &q.to {
            sql.push_str(" AND created_at < ?");
            params.push(Box::new(to.clone()));
        }
        sql.push_str(" ORDER BY created_at, id LIMIT ?");
        let limit = if q.limit == 0 { 100 } else { q.limit };
        params.push(Box::new(limit as i64));

        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())),
            row_to_audit,
        )?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Query the security stream by minimum severity and time range.
    pub fn query_security(
        &self,
        min_severity: Severity,
        from: Option<&str>,
        to: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SecurityEvent>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, kind, severity, actor, details, created_at
             FROM security_events
             WHERE created_at >= COALESCE(?1, created_at)
               AND created_at < COALESCE(?2, 'Z')
             ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map(rusqlite::params![from, to], row_to_security)?;
        let limit = if limit == 0 { 100 } else { limit };
        Ok(rows
            .filter_map(|r| r.ok())
            .filter(|e| e.severity >= min_severity)
            .take(limit)
            .collect())
    }

    /// Delete rows older than the retention horizon. Returns rows removed.
    #[instrument(skip(self))]
    pub fn sweep_retention(&self, retention_days: u32) -> Result<usize> {
        let horizon = (chrono::Utc::now()
            - chrono::Duration::days(i64::from(retention_days)))
        .to_rfc3339();
        let db = self.db.lock().unwrap();
        let a = db.execute("DELETE FROM audit_logs WHERE created_at < ?1", [&horizon])?;
        let s = db.execute(
            "DELETE FROM security_events WHERE created_at < ?1",
            [&horizon],
        )?;
        Ok(a + s)
    }
}

fn row_to_audit(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuditEvent> {
    let details: String = row.get(4)?;
    Ok(AuditEvent {
        id: row.get(0)?,
        actor: row.get(1)?,
        action: row.get(2)?,
        resource: row.get(3)?,
        details: serde_json::from_str(&details).unwrap_or(serde_json::Value::Null),
        success: row.get::<_, i64>(5)? != 0,
        created_at: row.get(6)?,
    })
}

fn row_to_security(row: &rusqlite::Row<'_>) -> rusqlite::Result<SecurityEvent> {
    use std::str::FromStr;
    let details: String = row.get(4)?;
    Ok(SecurityEvent {
        id: row.get(0)?,
        kind: row.get(1)?,
        severity: Severity::from_str(&row.get::<_, String>(2)?).unwrap_or(Severity::Low),
        actor: row.get(3)?,
        details: serde_json::from_str(&details).unwrap_or(serde_json::Value::Null),
        created_at: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::actions;

    fn log() -> AuditLog {
        let conn = Connection::open_in_memory().unwrap();
        AuditLog::new(Arc::new(Mutex::new(conn))).unwrap()
    }

    #[test]
    fn record_and_query_by_resource() {
        let log = log();
        log.record(
            Some(1),
            actions::MESSAGE_CREATED,
            "message:10",
            serde_json::json!({"conversation": 100}),
            true,
        )
        .unwrap();
        log.record(Some(2), actions::MESSAGE_PINNED, "message:10", serde_json::json!({}), true)
            .unwrap();
        log.record(Some(1), actions::MESSAGE_CREATED, "message:11", serde_json::json!({}), true)
            .unwrap();

        let events = log
            .query(&AuditQuery {
                resource: Some("message:10".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(events.len(), 2);
        // per-resource total order
        assert!(events[0].id < events[1].id);
    }

    #[test]
    fn security_filter_by_min_severity() {
        let log = log();
        log.security("auth.failed", Severity::Low, Some(1), serde_json::json!({}))
            .unwrap();
        log.security("auth.lockout", Severity::High, Some(1), serde_json::json!({}))
            .unwrap();

        let high = log.query_security(Severity::High, None, None, 10).unwrap();
        assert_eq!(high.len(), 1);
        assert_eq!(high[0].kind, "auth.lockout");

        let all = log.query_security(Severity::Low, None, None, 10).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn retention_sweep_removes_old_rows() {
        let log = log();
        // Insert a row dated well past the horizon by writing directly.
        {
            let db = log.db.lock().unwrap();
            db.execute(
                "INSERT INTO audit_logs (actor, action, resource, details, success, created_at)
                 VALUES (1, 'x', 'y', '{}', 1, '2000-01-01T00:00:00+00:00')",
                [],
            )
            .unwrap();
        }
        log.record(Some(1), "recent", "z", serde_json::json!({}), true)
            .unwrap();

        let removed = log.sweep_retention(30).unwrap();
        assert_eq!(removed, 1);
        let left = log.query(&AuditQuery::default()).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].action, "recent");
    }

    #[test]
    fn inverted_range_is_rejected() {
        let log = log();
        let err = log.query(&AuditQuery {
            from: Some("2026-01-02T00:00:00+00:00".into()),
            to: Some("2026-01-01T00:00:00+00:00".into()),
            ..Default::default()
        });
        assert!(err.is_err());
    }
}
