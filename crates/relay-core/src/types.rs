use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stable numeric user id (SQLite rowid). The wire surface uses this id;
/// the opaque UUID lives alongside it in the users table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl UserId {
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for UserId {
    fn from(v: i64) -> Self {
        Self(v)
    }
}

/// Stable numeric conversation id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub i64);

impl ConversationId {
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ConversationId {
    fn from(v: i64) -> Self {
        Self(v)
    }
}

/// Stable numeric message id. Ties message ordering: (created_at, id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl MessageId {
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for MessageId {
    fn from(v: i64) -> Self {
        Self(v)
    }
}

/// Session identifier (UUIDv7 — time-sortable for log correlation).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Per-connection identifier (random UUID, never persisted).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnId(pub String);

impl ConnId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Platform-wide role ladder. Variant order is the privilege order, so the
/// derived `Ord` gives `Guest < Member < Moderator < Admin < Superadmin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlatformRole {
    Guest,
    #[default]
    Member,
    Moderator,
    Admin,
    Superadmin,
}

impl PlatformRole {
    pub fn is_staff(&self) -> bool {
        *self >= PlatformRole::Moderator
    }
}

impl fmt::Display for PlatformRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlatformRole::Guest => "guest",
            PlatformRole::Member => "member",
            PlatformRole::Moderator => "moderator",
            PlatformRole::Admin => "admin",
            PlatformRole::Superadmin => "superadmin",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for PlatformRole {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "guest" => Ok(PlatformRole::Guest),
            "member" => Ok(PlatformRole::Member),
            "moderator" => Ok(PlatformRole::Moderator),
            "admin" => Ok(PlatformRole::Admin),
            "superadmin" => Ok(PlatformRole::Superadmin),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// Role within a single conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConversationRole {
    Owner,
    Moderator,
    #[default]
    Member,
}

impl fmt::Display for ConversationRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConversationRole::Owner => "owner",
            ConversationRole::Moderator => "moderator",
            ConversationRole::Member => "member",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ConversationRole {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "owner" => Ok(ConversationRole::Owner),
            "moderator" => Ok(ConversationRole::Moderator),
            "member" => Ok(ConversationRole::Member),
            other => Err(format!("unknown conversation role: {}", other)),
        }
    }
}

/// Account lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    #[default]
    Active,
    Suspended,
    Deleted,
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UserStatus::Active => "active",
            UserStatus::Suspended => "suspended",
            UserStatus::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for UserStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "active" => Ok(UserStatus::Active),
            "suspended" => Ok(UserStatus::Suspended),
            "deleted" => Ok(UserStatus::Deleted),
            other => Err(format!("unknown user status: {}", other)),
        }
    }
}

/// What kind of container a conversation is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConversationKind {
    PublicRoom,
    PrivateRoom,
    DmPair,
}

impl ConversationKind {
    pub fn is_room(&self) -> bool {
        !matches!(self, ConversationKind::DmPair)
    }
}

impl fmt::Display for ConversationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConversationKind::PublicRoom => "public-room",
            ConversationKind::PrivateRoom => "private-room",
            ConversationKind::DmPair => "dm-pair",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ConversationKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "public-room" => Ok(ConversationKind::PublicRoom),
            "private-room" => Ok(ConversationKind::PrivateRoom),
            "dm-pair" => Ok(ConversationKind::DmPair),
            other => Err(format!("unknown conversation kind: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn role_ladder_is_ordered() {
        assert!(PlatformRole::Guest < PlatformRole::Member);
        assert!(PlatformRole::Member < PlatformRole::Moderator);
        assert!(PlatformRole::Moderator < PlatformRole::Admin);
        assert!(PlatformRole::Admin < PlatformRole::Superadmin);
        assert!(PlatformRole::Moderator.is_staff());
        assert!(!PlatformRole::Member.is_staff());
    }

    #[test]
    fn role_round_trips_through_str() {
        for role in [
            PlatformRole::Guest,
            PlatformRole::Member,
            PlatformRole::Moderator,
            PlatformRole::Admin,
            PlatformRole::Superadmin,
        ] {
            assert_eq!(PlatformRole::from_str(&role.to_string()).unwrap(), role);
        }
        assert!(PlatformRole::from_str("emperor").is_err());
    }

    #[test]
    fn conversation_kind_room_check() {
        assert!(ConversationKind::PublicRoom.is_room());
        assert!(ConversationKind::PrivateRoom.is_room());
        assert!(!ConversationKind::DmPair.is_room());
    }
}
