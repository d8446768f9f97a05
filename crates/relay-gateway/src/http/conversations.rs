use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use relay_audit::types::actions;
use relay_core::error::ErrorKind;
use relay_core::types::{ConversationKind, ConversationRole};
use relay_store::types::Conversation;
use serde::Deserialize;
use serde_json::json;

use crate::app::AppState;
use crate::http::error::ApiError;
use crate::http::require_session;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomBody {
    /// "public-room" or "private-room".
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub member_cap: Option<u32>,
}

/// POST /conversations — create a room owned by the caller.
pub async fn create_room_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateRoomBody>,
) -> Result<Json<Conversation>, ApiError> {
    let session = require_session(&state, &headers)?;
    let kind = ConversationKind::from_str(&body.kind)
        .map_err(|e| ApiError::new(ErrorKind::Validation, e))?;

    let conversation = state.conversations.create_room(
        session.user_id,
        kind,
        &body.name,
        body.description.as_deref(),
        body.member_cap,
    )?;
    let _ = state.audit.record(
        Some(session.user_id),
        actions::CONVERSATION_CREATED,
        &format!("conversation:{}", conversation.id),
        json!({ "kind": body.kind, "name": body.name }),
        true,
    );
    Ok(Json(conversation))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DmBody {
    pub user_id: i64,
}

/// POST /conversations/dm — open (or find) the DM pair with another user.
pub async fn open_dm_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<DmBody>,
) -> Result<Json<Conversation>, ApiError> {
    let session = require_session(&state, &headers)?;
    if state.users.get(body.user_id)?.is_none() {
        return Err(ApiError::new(ErrorKind::NotFound, "no such user"));
    }
    let conversation = state
        .conversations
        .get_or_create_dm(session.user_id, body.user_id)?;
    Ok(Json(conversation))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMemberBody {
    pub user_id: i64,
    #[serde(default)]
    pub role: Option<String>,
}

/// POST /conversations/{id}/members — staff-gated invite.
pub async fn add_member_handler(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<AddMemberBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = require_session(&state, &headers)?;
    let role = match body.role.as_deref() {
        Some(raw) => ConversationRole::from_str(raw)
            .map_err(|e| ApiError::new(ErrorKind::Validation, e))?,
        None => ConversationRole::Member,
    };
    if state.users.get(body.user_id)?.is_none() {
        return Err(ApiError::new(ErrorKind::NotFound, "no such user"));
    }

    state
        .conversations
        .add_member(conversation_id, session.user_id, body.user_id, role)?;
    let _ = state.audit.record(
        Some(session.user_id),
        actions::MEMBER_JOINED,
        &format!("conversation:{}", conversation_id),
        json!({ "user": body.user_id, "role": role.to_string() }),
        true,
    );
    Ok(Json(json!({ "ok": true })))
}

/// POST /conversations/{id}/leave
pub async fn leave_handler(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = require_session(&state, &headers)?;
    state.conversations.leave(conversation_id, session.user_id)?;
    let _ = state.audit.record(
        Some(session.user_id),
        actions::MEMBER_LEFT,
        &format!("conversation:{}", conversation_id),
        json!({}),
        true,
    );
    Ok(Json(json!({ "ok": true })))
}

/// POST /conversations/{id}/block — DM pairs only.
pub async fn block_handler(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = require_session(&state, &headers)?;
    state.conversations.block_dm(conversation_id, session.user_id)?;
    let _ = state.audit.record(
        Some(session.user_id),
        actions::DM_BLOCKED,
        &format!("conversation:{}", conversation_id),
        json!({}),
        true,
    );
    Ok(Json(json!({ "ok": true })))
}

/// POST /conversations/{id}/unblock
pub async fn unblock_handler(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = require_session(&state, &headers)?;
    state
        .conversations
        .unblock_dm(conversation_id, session.user_id)?;
    let _ = state.audit.record(
        Some(session.user_id),
        actions::DM_UNBLOCKED,
        &format!("conversation:{}", conversation_id),
        json!({}),
        true,
    );
    Ok(Json(json!({ "ok": true })))
}
