pub mod audit;
pub mod auth;
pub mod conversations;
pub mod error;
pub mod health;
pub mod messages;
pub mod notifications;

use std::sync::Arc;

use axum::http::HeaderMap;
use relay_core::error::ErrorKind;
use relay_identity::types::Session;

use crate::app::AppState;
use error::ApiError;

/// Resolve the `Authorization: Bearer` header into a live session and
/// touch it. Every authenticated REST handler goes through here.
pub fn require_session(state: &Arc<AppState>, headers: &HeaderMap) -> Result<Session, ApiError> {
    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::new(ErrorKind::Unauthenticated, "missing bearer token"))?;

    let session = state.sessions.resolve(bearer)?;
    state.sessions.touch(&session.id)?;
    Ok(session)
}
