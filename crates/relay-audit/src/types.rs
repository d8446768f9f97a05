use serde::{Deserialize, Serialize};

/// One entry in the business audit stream. Append-only: rows are never
/// updated or deleted inside the retention horizon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: i64,
    /// Acting user, or None for system-initiated actions.
    pub actor: Option<i64>,
    /// Verb, e.g. "message.created", "magic-link.consumed".
    pub action: String,
    /// Target, e.g. "conversation:100" or "message:512".
    pub resource: String,
    /// Free-form JSON context.
    pub details: serde_json::Value,
    pub success: bool,
    /// RFC3339 UTC.
    pub created_at: String,
}

/// Severity annotation on the security stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {}", other)),
        }
    }
}

/// One entry in the security event stream (suspicious activity, rate-limit
/// breach, moderation action, repeated auth failure).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: i64,
    /// Event kind, e.g. "auth.lockout", "rate-limit.breach".
    pub kind: String,
    pub severity: Severity,
    pub actor: Option<i64>,
    pub details: serde_json::Value,
    pub created_at: String,
}

/// Filter for the audit stream. All fields are conjunctive; None matches all.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub actor: Option<i64>,
    pub action: Option<String>,
    pub resource: Option<String>,
    /// Inclusive RFC3339 lower bound.
    pub from: Option<String>,
    /// Exclusive RFC3339 upper bound.
    pub to: Option<String>,
    pub limit: usize,
}

/// Well-known audit action verbs, kept in one place so streams stay greppable.
pub mod actions {
    pub const USER_REGISTERED: &str = "user.registered";
    pub const USER_DELETED: &str = "user.deleted";
    pub const CONVERSATION_CREATED: &str = "conversation.created";
    pub const MEMBER_JOINED: &str = "member.joined";
    pub const MEMBER_LEFT: &str = "member.left";
    pub const MESSAGE_CREATED: &str = "message.created";
    pub const MESSAGE_EDITED: &str = "message.edited";
    pub const MESSAGE_DELETED: &str = "message.deleted";
    pub const MESSAGE_PINNED: &str = "message.pinned";
    pub const MESSAGE_UNPINNED: &str = "message.unpinned";
    pub const DM_BLOCKED: &str = "dm.blocked";
    pub const DM_UNBLOCKED: &str = "dm.unblocked";
    pub const MAGIC_LINK_GENERATED: &str = "magic-link.generated";
    pub const MAGIC_LINK_CONSUMED: &str = "magic-link.consumed";
    pub const MAGIC_LINK_REVOKED: &str = "magic-link.revoked";
    pub const SESSION_ISSUED: &str = "session.issued";
    pub const SESSION_REVOKED: &str = "session.revoked";
}
