use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Client → Server frames, tagged by `type`.
///
/// Wire: `{ "type": "send", "conversation": 100, "content": "hi", ... }`
/// The frame set is closed, so the discriminator lives in the type system
/// rather than a stringly dispatch table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum ClientFrame {
    /// Bearer hand-in when it wasn't carried by the upgrade request.
    Auth { token: String },
    Join {
        conversation: i64,
    },
    Leave {
        conversation: i64,
    },
    Send {
        conversation: i64,
        content: String,
        #[serde(default)]
        parent: Option<i64>,
        #[serde(default)]
        metadata: Option<Value>,
        #[serde(default)]
        idempotency_key: Option<String>,
    },
    Typing {
        conversation: i64,
    },
    Ack {
        message_ids: Vec<i64>,
    },
    History {
        conversation: i64,
        #[serde(default)]
        before_cursor: Option<String>,
        #[serde(default)]
        limit: Option<usize>,
    },
    Ping {
        timestamp: i64,
    },
}

/// A message as it crosses the wire, shared by the `message` push frame
/// and `history` pages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    pub id: i64,
    pub conversation: i64,
    pub author: i64,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<i64>,
    pub metadata: Value,
    pub created_at: String,
    #[serde(default)]
    pub edited: bool,
    #[serde(default)]
    pub edit_count: u32,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub thread_reply_count: u32,
}

/// Server → Client frames. Mirrors the inbound schema for symmetry;
/// outbound carries server-assigned ids and timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum ServerFrame {
    Ready {
        session_id: String,
        user: Value,
    },
    Message(WireMessage),
    Edit {
        id: i64,
        conversation: i64,
        content: String,
        edited_at: String,
        edit_count: u32,
    },
    Reaction {
        message_id: i64,
        user: i64,
        emoji: String,
        added: bool,
    },
    Pin {
        message_id: i64,
        conversation: i64,
        pinned: bool,
    },
    Typing {
        conversation: i64,
        user: i64,
    },
    History {
        conversation: i64,
        messages: Vec<WireMessage>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        next_cursor: Option<String>,
    },
    Presence {
        user: i64,
        online: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_seen: Option<String>,
    },
    /// Live delivery channel of the notification dispatcher. Distinct from
    /// `message`: a notification is not part of any conversation's ordered
    /// stream and carries its own id, priority, and kind in the payload.
    Notification {
        payload: Value,
    },
    Error {
        code: String,
        message: String,
    },
    Pong {
        timestamp: i64,
    },
}

impl ServerFrame {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerFrame::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }

    /// Serialize for the socket. Frame construction is infallible, so a
    /// serialization failure can only be a programming error; it degrades
    /// to an opaque error frame rather than panicking the writer.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"error","code":"INTERNAL","message":"frame serialization"}"#.to_string()
        })
    }
}
