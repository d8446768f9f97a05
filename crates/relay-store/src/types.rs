use relay_core::types::{ConversationKind, ConversationRole};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: i64,
    pub uuid: String,
    pub kind: ConversationKind,
    /// Null for dm-pair.
    pub owner: Option<i64>,
    /// Required for rooms, absent for dm-pair.
    pub name: Option<String>,
    pub description: Option<String>,
    pub member_cap: Option<u32>,
    /// dm-pair only: the user who blocked, if any.
    pub blocked_by: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Membership {
    pub conversation_id: i64,
    pub user_id: i64,
    pub role: ConversationRole,
    pub joined_at: String,
    /// Null means currently a member.
    pub left_at: Option<String>,
}

/// Delivery status tracked on the message row. The server persists
/// messages as `sent`; `delivered` and `failed` are client-reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sending,
    #[default]
    Sent,
    Delivered,
    Failed,
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MessageStatus::Sending => "sending",
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "sending" => Ok(MessageStatus::Sending),
            "sent" => Ok(MessageStatus::Sent),
            "delivered" => Ok(MessageStatus::Delivered),
            "failed" => Ok(MessageStatus::Failed),
            other => Err(format!("unknown message status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    /// Opaque external id (UUIDv7).
    pub uuid: String,
    pub conversation_id: i64,
    pub author: i64,
    pub content: String,
    pub metadata: serde_json::Value,
    /// Reply target; always within the same conversation.
    pub parent_id: Option<i64>,
    /// Cached count of direct replies.
    pub thread_reply_count: u32,
    pub pinned: bool,
    pub edited: bool,
    pub edit_count: u32,
    pub status: MessageStatus,
    pub created_at: String,
    pub edited_at: Option<String>,
    pub deleted_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reaction {
    pub message_id: i64,
    pub user_id: i64,
    pub emoji: String,
    pub created_at: String,
}

/// Opaque pagination cursor over the (created_at, id) total order.
/// Wire form: `<created_at>|<id>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub created_at: String,
    pub id: i64,
}

impl Cursor {
    pub fn encode(&self) -> String {
        format!("{}|{}", self.created_at, self.id)
    }

    pub fn decode(s: &str) -> Option<Self> {
        let (created_at, id) = s.rsplit_once('|')?;
        Some(Self {
            created_at: created_at.to_string(),
            id: id.parse().ok()?,
        })
    }
}

/// One backwards page of messages, oldest-first, plus the cursor for the
/// next (older) page when more remain.
#[derive(Debug, Clone)]
pub struct Page {
    pub messages: Vec<Message>,
    pub next_cursor: Option<Cursor>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_round_trip() {
        let c = Cursor {
            created_at: "2026-08-01T12:00:00+00:00".into(),
            id: 42,
        };
        assert_eq!(Cursor::decode(&c.encode()), Some(c));
        assert_eq!(Cursor::decode("garbage"), None);
        assert_eq!(Cursor::decode("a|b"), None);
    }
}
