use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use relay_core::error::ErrorKind;
use relay_notify::types::{Notification, NotificationRequest};
use serde::Deserialize;
use serde_json::json;

use crate::app::AppState;
use crate::http::error::ApiError;
use crate::http::require_session;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendBody {
    /// Explicit recipients; empty plus `broadcast: true` goes to everyone
    /// on the live channel.
    #[serde(default)]
    pub user_ids: Vec<i64>,
    #[serde(default)]
    pub broadcast: bool,
    #[serde(flatten)]
    pub request: NotificationRequest,
}

/// POST /notifications/send — staff-only fan-out entry point.
pub async fn send_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<SendBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = require_session(&state, &headers)?;
    let caller = state
        .users
        .get(session.user_id)?
        .ok_or_else(|| ApiError::new(ErrorKind::Unauthenticated, "account gone"))?;
    if !caller.role.is_staff() {
        return Err(ApiError::new(
            ErrorKind::Forbidden,
            "sending notifications requires a staff role",
        ));
    }

    if body.broadcast {
        let n = state.dispatcher.broadcast(&body.request)?;
        return Ok(Json(json!({ "sent": [n.id], "failed": [] })));
    }
    if body.user_ids.is_empty() {
        return Err(ApiError::new(ErrorKind::Validation, "no recipients"));
    }

    let results = state.dispatcher.send_bulk(&body.user_ids, &body.request);
    let mut sent = Vec::new();
    let mut failed = Vec::new();
    for (user_id, result) in results {
        match result {
            Ok(n) => sent.push(json!({ "user": user_id, "notification": n.id })),
            Err(e) => failed.push(json!({ "user": user_id, "error": e.kind().code() })),
        }
    }
    Ok(Json(json!({ "sent": sent, "failed": failed })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    #[serde(default)]
    pub unread_only: bool,
    pub limit: Option<usize>,
}

/// GET /notifications?unreadOnly= — the caller's own inbox.
pub async fn list_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
    headers: HeaderMap,
) -> Result<Json<Vec<Notification>>, ApiError> {
    let session = require_session(&state, &headers)?;
    let items = state.notifications.list_for(
        session.user_id,
        query.unread_only,
        query.limit.unwrap_or(50),
    )?;
    Ok(Json(items))
}

/// PUT /notifications/{id}/read
pub async fn mark_read_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = require_session(&state, &headers)?;
    state.notifications.mark_read(&id, session.user_id)?;
    Ok(Json(json!({ "ok": true })))
}
