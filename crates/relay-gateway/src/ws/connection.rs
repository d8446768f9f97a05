use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{ws::Message, ws::WebSocket, State, WebSocketUpgrade},
    http::HeaderMap,
    response::IntoResponse,
};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use relay_core::config::{HANDSHAKE_TIMEOUT_MS, MAX_PAYLOAD_BYTES};
use relay_core::error::ErrorKind;
use relay_core::types::ConnId;
use relay_identity::types::Session;
use relay_protocol::{ClientFrame, ServerFrame};
use tracing::{debug, info, warn};

use crate::app::AppState;
use crate::ws::handlers::{handle_frame, FrameOutcome};

/// How long a closing connection may spend flushing queued frames.
const SHUTDOWN_FLUSH_GRACE: Duration = Duration::from_secs(2);

/// Axum handler — upgrades HTTP to WebSocket at GET /ws. The bearer may
/// ride the upgrade request; otherwise the client owes an `auth` frame
/// within the handshake window.
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);
    ws.on_upgrade(move |socket| handle_connection(socket, state, bearer))
}

/// Per-connection task — lives for the entire socket lifetime.
async fn handle_connection(socket: WebSocket, state: Arc<AppState>, bearer: Option<String>) {
    let conn_id = ConnId::new();
    let (mut tx, mut rx) = socket.split();

    let Some(session) = authenticate(&mut tx, &mut rx, &state, bearer).await else {
        let _ = tx.send(Message::Close(None)).await;
        return;
    };
    let user = match state.users.get(session.user_id) {
        Ok(Some(u)) => u,
        _ => {
            let _ = send_frame(
                &mut tx,
                &ServerFrame::error(ErrorKind::Unauthenticated.code(), "account gone"),
            )
            .await;
            return;
        }
    };
    info!(conn_id = %conn_id, user_id = user.id, "ws authenticated");

    let mut attach = state.presence.attach(&conn_id, user.id);
    if attach.user_came_online {
        let _ = state.users.set_online(user.id, true);
        publish_presence(&state, user.id, true);
    }

    let ready = ServerFrame::Ready {
        session_id: session.id.clone(),
        user: serde_json::to_value(user.to_public()).unwrap_or(serde_json::Value::Null),
    };
    if send_frame(&mut tx, &ready).await.is_err() {
        cleanup(&state, &conn_id).await;
        return;
    }

    // At-least-once: retransmit whatever the previous connection of this
    // session never acked.
    for frame in state.pending_acks.replay(&session.id) {
        if tx.send(Message::Text(frame.into())).await.is_err() {
            cleanup(&state, &conn_id).await;
            return;
        }
    }

    let hb = Duration::from_secs(state.config.presence.heartbeat_interval_secs.max(1));
    let grace = hb * state.config.presence.heartbeat_grace_multiplier.max(1);
    let mut tick = tokio::time::interval(hb);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut last_activity = Instant::now();
    let shutdown = state.shutdown.child_token();

    loop {
        tokio::select! {
            msg = rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        last_activity = Instant::now();
                        if text.len() > MAX_PAYLOAD_BYTES {
                            let _ = send_frame(&mut tx, &ServerFrame::error(
                                ErrorKind::Validation.code(), "payload too large")).await;
                            break;
                        }
                        let frame: ClientFrame = match serde_json::from_str(text.as_str()) {
                            Ok(f) => f,
                            Err(e) => {
                                debug!(conn_id = %conn_id, error = %e, "malformed frame");
                                let _ = send_frame(&mut tx, &ServerFrame::error(
                                    ErrorKind::Validation.code(), "malformed frame")).await;
                                continue;
                            }
                        };
                        match handle_frame(&state, &session, &conn_id, frame) {
                            FrameOutcome::Silent => {}
                            FrameOutcome::Reply(frames) => {
                                let mut dead = false;
                                for f in &frames {
                                    if send_frame(&mut tx, f).await.is_err() {
                                        dead = true;
                                        break;
                                    }
                                }
                                if dead { break; }
                            }
                            FrameOutcome::Fatal(frame) => {
                                let _ = send_frame(&mut tx, &frame).await;
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        last_activity = Instant::now();
                        let _ = tx.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_activity = Instant::now();
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(conn_id = %conn_id, error = %e, "socket read error");
                        break;
                    }
                    _ => {}
                }
            }

            outbound = attach.receiver.recv() => {
                match outbound {
                    Some(frame) => {
                        track_message_frame(&state, &session, &frame);
                        if tx.send(Message::Text(frame.into())).await.is_err() {
                            break;
                        }
                    }
                    // Sender side dropped: the registry cut us as a slow
                    // consumer (or is shutting down). Resynchronization is
                    // the client's job via history after reconnect.
                    None => {
                        warn!(conn_id = %conn_id, "outbound stream closed; dropping connection");
                        break;
                    }
                }
            }

            _ = tick.tick() => {
                if last_activity.elapsed() > grace {
                    info!(conn_id = %conn_id, "heartbeat missed beyond grace; closing");
                    break;
                }
            }

            _ = shutdown.cancelled() => {
                flush_pending(&mut tx, &mut attach.receiver, &state, &session).await;
                break;
            }
        }
    }

    let _ = tx.send(Message::Close(None)).await;
    cleanup(&state, &conn_id).await;
    info!(conn_id = %conn_id, "ws connection closed");
}

/// Resolve the bearer from the upgrade, or wait for an `auth` frame.
async fn authenticate(
    tx: &mut SplitSink<WebSocket, Message>,
    rx: &mut SplitStream<WebSocket>,
    state: &Arc<AppState>,
    bearer: Option<String>,
) -> Option<Session> {
    let token = match bearer {
        Some(token) => token,
        None => {
            let deadline = Duration::from_millis(HANDSHAKE_TIMEOUT_MS);
            let first = tokio::time::timeout(deadline, rx.next()).await;
            match first {
                Ok(Some(Ok(Message::Text(text)))) => {
                    match serde_json::from_str::<ClientFrame>(text.as_str()) {
                        Ok(ClientFrame::Auth { token }) => token,
                        _ => {
                            let _ = send_frame(tx, &ServerFrame::error(
                                ErrorKind::Unauthenticated.code(),
                                "first frame must be auth",
                            ))
                            .await;
                            return None;
                        }
                    }
                }
                Ok(_) => return None,
                Err(_) => {
                    debug!("handshake timeout");
                    return None;
                }
            }
        }
    };

    match state.sessions.resolve(&token) {
        Ok(session) => Some(session),
        Err(e) => {
            let _ = send_frame(tx, &ServerFrame::error(e.kind().code(), e.to_string())).await;
            None
        }
    }
}

/// On shutdown, drain already-queued frames for a short grace period so
/// in-flight messages are not lost mid-socket.
async fn flush_pending(
    tx: &mut SplitSink<WebSocket, Message>,
    receiver: &mut tokio::sync::mpsc::Receiver<String>,
    state: &Arc<AppState>,
    session: &Session,
) {
    let deadline = Instant::now() + SHUTDOWN_FLUSH_GRACE;
    while let Ok(frame) = tokio::time::timeout_at(deadline.into(), receiver.recv()).await {
        let Some(frame) = frame else { break };
        track_message_frame(state, session, &frame);
        if tx.send(Message::Text(frame.into())).await.is_err() {
            break;
        }
        if receiver.is_empty() {
            break;
        }
    }
}

/// Message frames enter the ack ledger so reconnects can replay them.
fn track_message_frame(state: &Arc<AppState>, session: &Session, frame: &str) {
    if !frame.contains(r#""type":"message""#) {
        return;
    }
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(frame) {
        if value["type"] == "message" {
            if let Some(id) = value["id"].as_i64() {
                state.pending_acks.track(&session.id, id, frame);
            }
        }
    }
}

async fn send_frame(
    tx: &mut SplitSink<WebSocket, Message>,
    frame: &ServerFrame,
) -> Result<(), axum::Error> {
    tx.send(Message::Text(frame.to_json().into())).await
}

async fn cleanup(state: &Arc<AppState>, conn_id: &ConnId) {
    if let Some(outcome) = state.presence.detach(conn_id) {
        if outcome.user_went_offline {
            let _ = state.users.set_online(outcome.user_id, false);
            publish_presence(state, outcome.user_id, false);
        }
    }
}

/// Tell everyone who shares a conversation with this user that they went
/// on- or offline.
fn publish_presence(state: &Arc<AppState>, user_id: i64, online: bool) {
    let last_seen = if online {
        None
    } else {
        Some(chrono::Utc::now().to_rfc3339())
    };
    let frame = ServerFrame::Presence {
        user: user_id,
        online,
        last_seen,
    }
    .to_json();
    if let Ok(conversations) = state.conversations.conversations_for(user_id) {
        for conversation in conversations {
            state.presence.publish(conversation, &frame, &[user_id]);
        }
    }
}
