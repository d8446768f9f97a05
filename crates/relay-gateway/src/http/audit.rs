use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use relay_audit::types::{AuditEvent, AuditQuery, SecurityEvent, Severity};
use relay_core::error::ErrorKind;
use serde::Deserialize;

use crate::app::AppState;
use crate::http::error::ApiError;
use crate::http::require_session;

fn require_staff(state: &Arc<AppState>, headers: &HeaderMap) -> Result<i64, ApiError> {
    let session = require_session(state, headers)?;
    let caller = state
        .users
        .get(session.user_id)?
        .ok_or_else(|| ApiError::new(ErrorKind::Unauthenticated, "account gone"))?;
    if !caller.role.is_staff() {
        return Err(ApiError::new(
            ErrorKind::Forbidden,
            "audit access requires a staff role",
        ));
    }
    Ok(session.user_id)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditQueryParams {
    pub actor: Option<i64>,
    pub action: Option<String>,
    pub resource: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub limit: Option<usize>,
}

/// GET /audit — staff query over the business audit stream.
pub async fn audit_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AuditQueryParams>,
    headers: HeaderMap,
) -> Result<Json<Vec<AuditEvent>>, ApiError> {
    require_staff(&state, &headers)?;
    let events = state.audit.query(&AuditQuery {
        actor: params.actor,
        action: params.action,
        resource: params.resource,
        from: params.from,
        to: params.to,
        limit: params.limit.unwrap_or(100),
    })?;
    Ok(Json(events))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityQueryParams {
    pub min_severity: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub limit: Option<usize>,
}

/// GET /security-events — staff query over the security stream.
pub async fn security_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SecurityQueryParams>,
    headers: HeaderMap,
) -> Result<Json<Vec<SecurityEvent>>, ApiError> {
    require_staff(&state, &headers)?;
    let min = match params.min_severity.as_deref() {
        Some(raw) => {
            Severity::from_str(raw).map_err(|e| ApiError::new(ErrorKind::Validation, e))?
        }
        None => Severity::Low,
    };
    let events = state.audit.query_security(
        min,
        params.from.as_deref(),
        params.to.as_deref(),
        params.limit.unwrap_or(100),
    )?;
    Ok(Json(events))
}
