use std::sync::Arc;

use relay_audit::types::actions;
use relay_core::error::ErrorKind;
use relay_core::types::{ConnId, ConversationKind};
use relay_identity::types::Session;
use relay_pipeline::pipeline::wire_message;
use relay_protocol::{ClientFrame, ServerFrame};
use relay_store::types::Cursor;
use serde_json::json;

use crate::app::AppState;

/// What the connection loop should do after a frame is handled.
pub enum FrameOutcome {
    /// Send these frames back on this connection.
    Reply(Vec<ServerFrame>),
    /// Nothing to send.
    Silent,
    /// Send the frame, then close the connection.
    Fatal(ServerFrame),
}

/// Dispatch one authenticated inbound frame.
pub fn handle_frame(
    state: &Arc<AppState>,
    session: &Session,
    conn_id: &ConnId,
    frame: ClientFrame,
) -> FrameOutcome {
    match frame {
        ClientFrame::Auth { .. } => FrameOutcome::Reply(vec![ServerFrame::error(
            ErrorKind::Conflict.code(),
            "already authenticated",
        )]),

        ClientFrame::Join { conversation } => handle_join(state, session, conn_id, conversation),

        ClientFrame::Leave { conversation } => {
            state.presence.unsubscribe(conn_id, conversation);
            FrameOutcome::Silent
        }

        ClientFrame::Send {
            conversation,
            content,
            parent,
            metadata,
            idempotency_key,
        } => match state.pipeline.submit(
            session,
            conversation,
            &content,
            parent,
            metadata,
            idempotency_key.as_deref(),
        ) {
            Ok(outcome) => {
                // The direct reply doubles as the submit acknowledgement;
                // subscribers (the author included) may also see the
                // published copy; clients dedupe by id.
                FrameOutcome::Reply(vec![ServerFrame::Message(wire_message(&outcome.message))])
            }
            Err(e) => error_outcome(e.kind(), e.to_string()),
        },

        ClientFrame::Typing { conversation } => match state.pipeline.typing(session, conversation) {
            Ok(()) => FrameOutcome::Silent,
            Err(e) => error_outcome(e.kind(), e.to_string()),
        },

        ClientFrame::Ack { message_ids } => {
            state.pending_acks.ack(&session.id, &message_ids);
            FrameOutcome::Silent
        }

        ClientFrame::History {
            conversation,
            before_cursor,
            limit,
        } => {
            let cursor = match before_cursor.as_deref() {
                Some(raw) => match Cursor::decode(raw) {
                    Some(c) => Some(c),
                    None => {
                        return FrameOutcome::Reply(vec![ServerFrame::error(
                            ErrorKind::Validation.code(),
                            "malformed cursor",
                        )])
                    }
                },
                None => None,
            };
            match state
                .pipeline
                .history(session, conversation, cursor.as_ref(), limit.unwrap_or(50))
            {
                Ok(page) => FrameOutcome::Reply(vec![ServerFrame::History {
                    conversation,
                    messages: page.messages.iter().map(wire_message).collect(),
                    next_cursor: page.next_cursor.map(|c| c.encode()),
                }]),
                Err(e) => error_outcome(e.kind(), e.to_string()),
            }
        }

        ClientFrame::Ping { timestamp } => {
            FrameOutcome::Reply(vec![ServerFrame::Pong { timestamp }])
        }
    }
}

/// Join = ensure membership (public rooms auto-join) + subscribe the
/// connection to the conversation's live stream.
fn handle_join(
    state: &Arc<AppState>,
    session: &Session,
    conn_id: &ConnId,
    conversation: i64,
) -> FrameOutcome {
    let conv = match state.conversations.get(conversation) {
        Ok(Some(c)) => c,
        Ok(None) => {
            return FrameOutcome::Reply(vec![ServerFrame::error(
                ErrorKind::NotFound.code(),
                format!("conversation {} not found", conversation),
            )])
        }
        Err(e) => return error_outcome(e.kind(), e.to_string()),
    };

    let already_member = match state.conversations.is_member(conversation, session.user_id) {
        Ok(m) => m,
        Err(e) => return error_outcome(e.kind(), e.to_string()),
    };

    if !already_member {
        if conv.kind != ConversationKind::PublicRoom {
            return FrameOutcome::Reply(vec![ServerFrame::error(
                ErrorKind::Forbidden.code(),
                "not a member of this conversation",
            )]);
        }
        if let Err(e) = state.conversations.join(conversation, session.user_id) {
            return error_outcome(e.kind(), e.to_string());
        }
        let _ = state.audit.record(
            Some(session.user_id),
            actions::MEMBER_JOINED,
            &format!("conversation:{}", conversation),
            json!({}),
            true,
        );
    }

    state.presence.subscribe(conn_id, conversation);

    // Seed the new subscriber with who is typing right now; the indicator
    // self-expires, so no stop frame will follow.
    let typing: Vec<ServerFrame> = state
        .presence
        .typing_users(conversation)
        .into_iter()
        .filter(|user| *user != session.user_id)
        .map(|user| ServerFrame::Typing { conversation, user })
        .collect();
    if typing.is_empty() {
        FrameOutcome::Silent
    } else {
        FrameOutcome::Reply(typing)
    }
}

fn error_outcome(kind: ErrorKind, message: String) -> FrameOutcome {
    let frame = ServerFrame::error(kind.code(), message);
    if kind == ErrorKind::Unauthenticated {
        FrameOutcome::Fatal(frame)
    } else {
        FrameOutcome::Reply(vec![frame])
    }
}
