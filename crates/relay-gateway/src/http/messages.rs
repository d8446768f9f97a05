use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use relay_core::error::ErrorKind;
use relay_pipeline::pipeline::wire_message;
use relay_protocol::WireMessage;
use relay_store::types::Cursor;
use serde::{Deserialize, Serialize};

use crate::app::AppState;
use crate::http::error::ApiError;
use crate::http::require_session;

#[derive(Deserialize)]
pub struct PageQuery {
    pub before: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResponse {
    pub messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// GET /conversations/{id}/messages?before=&limit=
pub async fn list_messages_handler(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<i64>,
    Query(query): Query<PageQuery>,
    headers: HeaderMap,
) -> Result<Json<PageResponse>, ApiError> {
    let session = require_session(&state, &headers)?;

    let cursor = match query.before.as_deref() {
        Some(raw) => Some(
            Cursor::decode(raw)
                .ok_or_else(|| ApiError::new(ErrorKind::Validation, "malformed cursor"))?,
        ),
        None => None,
    };

    let page = state.pipeline.history(
        &session,
        conversation_id,
        cursor.as_ref(),
        query.limit.unwrap_or(50),
    )?;

    Ok(Json(PageResponse {
        messages: page.messages.iter().map(wire_message).collect(),
        next_cursor: page.next_cursor.map(|c| c.encode()),
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostMessageBody {
    pub content: String,
    #[serde(default)]
    pub parent: Option<i64>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// POST /conversations/{id}/messages
pub async fn post_message_handler(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<PostMessageBody>,
) -> Result<Json<WireMessage>, ApiError> {
    let session = require_session(&state, &headers)?;
    let outcome = state.pipeline.submit(
        &session,
        conversation_id,
        &body.content,
        body.parent,
        body.metadata,
        body.idempotency_key.as_deref(),
    )?;
    Ok(Json(wire_message(&outcome.message)))
}

#[derive(Deserialize)]
pub struct EditBody {
    pub content: String,
}

/// PUT /messages/{id} — author-only edit within the policy window.
pub async fn edit_message_handler(
    State(state): State<Arc<AppState>>,
    Path(message_id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<EditBody>,
) -> Result<Json<WireMessage>, ApiError> {
    let session = require_session(&state, &headers)?;
    let message = state.pipeline.edit(&session, message_id, &body.content)?;
    Ok(Json(wire_message(&message)))
}

/// DELETE /messages/{id} — soft delete; the row stays for history.
pub async fn delete_message_handler(
    State(state): State<Arc<AppState>>,
    Path(message_id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = require_session(&state, &headers)?;
    state.messages.soft_delete(message_id, session.user_id)?;
    let _ = state.audit.record(
        Some(session.user_id),
        relay_audit::types::actions::MESSAGE_DELETED,
        &format!("message:{}", message_id),
        serde_json::json!({}),
        true,
    );
    Ok(Json(serde_json::json!({ "ok": true })))
}

#[derive(Deserialize)]
pub struct ReactionBody {
    pub emoji: String,
}

/// POST /messages/{id}/reactions — idempotent add.
pub async fn add_reaction_handler(
    State(state): State<Arc<AppState>>,
    Path(message_id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<ReactionBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = require_session(&state, &headers)?;
    let added = state.pipeline.react(&session, message_id, &body.emoji, true)?;
    Ok(Json(serde_json::json!({ "added": added })))
}

/// DELETE /messages/{id}/reactions/{emoji} — idempotent remove.
pub async fn remove_reaction_handler(
    State(state): State<Arc<AppState>>,
    Path((message_id, emoji)): Path<(i64, String)>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = require_session(&state, &headers)?;
    let removed = state.pipeline.react(&session, message_id, &emoji, false)?;
    Ok(Json(serde_json::json!({ "removed": removed })))
}

#[derive(Deserialize)]
pub struct PinBody {
    pub pinned: bool,
}

/// PUT /messages/{id}/pin
pub async fn pin_message_handler(
    State(state): State<Arc<AppState>>,
    Path(message_id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<PinBody>,
) -> Result<Json<WireMessage>, ApiError> {
    let session = require_session(&state, &headers)?;
    let message = state.pipeline.set_pinned(&session, message_id, body.pinned)?;
    Ok(Json(wire_message(&message)))
}

/// GET /conversations/{id}/pins — the unordered pinned set.
pub async fn list_pins_handler(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<Vec<WireMessage>>, ApiError> {
    let session = require_session(&state, &headers)?;
    if !state
        .conversations
        .is_member(conversation_id, session.user_id)?
    {
        return Err(ApiError::new(
            ErrorKind::Forbidden,
            "not a member of this conversation",
        ));
    }
    let pinned = state.messages.pinned(conversation_id)?;
    Ok(Json(pinned.iter().map(wire_message).collect()))
}
