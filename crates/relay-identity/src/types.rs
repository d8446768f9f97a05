use relay_core::types::{PlatformRole, UserStatus};
use serde::{Deserialize, Serialize};

/// Full user record. The password verifier never leaves this crate; wire
/// surfaces serialize [`PublicUser`] instead.
#[derive(Debug, Clone)]
pub struct User {
    /// Stable numeric id (SQLite rowid).
    pub id: i64,
    /// Globally unique opaque id (UUIDv7).
    pub uuid: String,
    pub handle: String,
    pub email: String,
    /// Argon2id PHC string.
    pub password_hash: String,
    pub role: PlatformRole,
    pub status: UserStatus,
    pub online: bool,
    pub last_seen_at: Option<String>,
    /// Free-form profile blob (display name, avatar, bio, …).
    pub profile: serde_json::Value,
    /// Consecutive failed logins; reset on success. Monotonic per attempt.
    pub failed_logins: u32,
    pub locked_until: Option<String>,
    pub deleted_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl User {
    pub fn to_public(&self) -> PublicUser {
        PublicUser {
            id: self.id,
            uuid: self.uuid.clone(),
            handle: self.handle.clone(),
            role: self.role,
            online: self.online,
            last_seen_at: self.last_seen_at.clone(),
        }
    }
}

/// The subset of a user that crosses the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: i64,
    pub uuid: String,
    pub handle: String,
    pub role: PlatformRole,
    pub online: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen_at: Option<String>,
}

/// A bearer session. Inactive sessions reject all operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// UUIDv7.
    pub id: String,
    pub user_id: i64,
    pub created_at: String,
    pub last_used_at: String,
    pub active: bool,
    /// Remote address at issue time.
    pub ip: Option<String>,
    /// User agent at issue time.
    pub agent: Option<String>,
}
