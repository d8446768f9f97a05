use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::Json;
use relay_audit::types::{actions, Severity};
use relay_core::error::ErrorKind;
use relay_magiclink::types::Purpose;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use tracing::warn;

use crate::app::AppState;
use crate::http::error::ApiError;
use crate::http::require_session;

#[derive(Deserialize)]
pub struct RegisterBody {
    pub handle: String,
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct SessionResponse {
    pub token: String,
    pub user: relay_identity::types::PublicUser,
}

/// POST /auth/register — create an account and log it straight in.
pub async fn register_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<RegisterBody>,
) -> Result<Json<SessionResponse>, ApiError> {
    let user = state
        .users
        .register(&body.handle, &body.email, &body.password)?;
    let _ = state.audit.record(
        Some(user.id),
        actions::USER_REGISTERED,
        &format!("user:{}", user.id),
        json!({ "handle": user.handle }),
        true,
    );
    issue_session(&state, &user, addr, &headers)
}

#[derive(Deserialize)]
pub struct LoginBody {
    pub email: String,
    pub password: String,
}

/// POST /auth/login — password login with lockout enforcement.
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<LoginBody>,
) -> Result<Json<SessionResponse>, ApiError> {
    match state.users.authenticate(&body.email, &body.password) {
        Ok(user) => issue_session(&state, &user, addr, &headers),
        Err(e) => {
            if matches!(e, relay_identity::IdentityError::LockedOut { .. }) {
                let _ = state.audit.security(
                    "auth.lockout",
                    Severity::High,
                    None,
                    json!({ "email": body.email }),
                );
            } else {
                let _ = state.audit.security(
                    "auth.failed",
                    Severity::Low,
                    None,
                    json!({ "email": body.email }),
                );
            }
            Err(e.into())
        }
    }
}

/// POST /auth/logout — revoke the presented session.
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = require_session(&state, &headers)?;
    state.sessions.revoke(&session.id)?;
    let _ = state.audit.record(
        Some(session.user_id),
        actions::SESSION_REVOKED,
        &format!("session:{}", session.id),
        json!({}),
        true,
    );
    Ok(Json(json!({ "ok": true })))
}

/// DELETE /users/me — soft delete: lookups stop finding the account, its
/// messages stay, and every credential it holds is revoked.
pub async fn delete_account_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = require_session(&state, &headers)?;
    state.users.soft_delete(session.user_id)?;
    let _ = state.sessions.revoke_all_for_user(session.user_id);
    let _ = state.magic_links.revoke_all_for(session.user_id);
    let _ = state.audit.record(
        Some(session.user_id),
        actions::USER_DELETED,
        &format!("user:{}", session.user_id),
        json!({}),
        true,
    );
    Ok(Json(json!({ "ok": true })))
}

#[derive(Deserialize)]
pub struct MagicLinkBody {
    pub email: String,
    pub purpose: String,
}

/// POST /auth/magic-link — generate and (best-effort) deliver a link.
///
/// The response does not reveal whether the email maps to an account;
/// purposes that require one fail internally but still return `{ok}` so
/// the endpoint cannot be used for account enumeration.
pub async fn magic_link_request_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(body): Json<MagicLinkBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let purpose = Purpose::from_str(&body.purpose)
        .map_err(|e| ApiError::new(ErrorKind::Validation, e))?;

    let user = state.users.get_by_email(&body.email)?;
    let user_id = user.as_ref().map(|u| u.id);

    let generated = match state.magic_links.generate(
        &body.email,
        purpose,
        user_id,
        Some(&addr.ip().to_string()),
        None,
    ) {
        Ok(link) => link,
        Err(relay_magiclink::MagicLinkError::UnknownEmail) => {
            // Indistinguishable from success on the outside.
            return Ok(Json(json!({ "ok": true })));
        }
        Err(e) => return Err(e.into()),
    };

    let _ = state.audit.record(
        user_id,
        actions::MAGIC_LINK_GENERATED,
        &format!("magic-link:{}", purpose),
        json!({ "email": body.email }),
        true,
    );

    // Delivery is best-effort: a mailer failure is logged and the link
    // stays valid; the user can request a fresh one.
    if let Err(e) = state
        .mailer
        .deliver(&body.email, &generated.url, purpose)
        .await
    {
        warn!(email = %body.email, error = %e, "magic link delivery failed");
    }

    Ok(Json(json!({ "ok": true })))
}

#[derive(Deserialize)]
pub struct ValidateBody {
    pub token: String,
}

/// POST /auth/magic-link/validate — non-consuming validity probe; safe to
/// call repeatedly (e.g. when rendering the landing page of a link).
pub async fn magic_link_validate_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ValidateBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    use relay_magiclink::types::Validation;
    let status = match state.magic_links.validate(&body.token)? {
        Validation::Valid { purpose, expires_at, .. } => {
            json!({ "valid": true, "purpose": purpose.to_string(), "expiresAt": expires_at })
        }
        Validation::Consumed => json!({ "valid": false, "reason": "consumed" }),
        Validation::Expired => json!({ "valid": false, "reason": "expired" }),
        Validation::Revoked => json!({ "valid": false, "reason": "revoked" }),
        Validation::NotFound => json!({ "valid": false, "reason": "not-found" }),
    };
    Ok(Json(status))
}

#[derive(Deserialize)]
pub struct ConsumeBody {
    pub token: String,
}

/// POST /auth/magic-link/consume — single-use exchange for a bearer.
pub async fn magic_link_consume_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<ConsumeBody>,
) -> Result<Json<SessionResponse>, ApiError> {
    let consumed = state.magic_links.consume(&body.token)?;

    let user = match consumed.user_id {
        Some(id) => state
            .users
            .get(id)?
            .ok_or_else(|| ApiError::new(ErrorKind::NotFound, "account no longer exists"))?,
        None => {
            return Err(ApiError::new(
                ErrorKind::Conflict,
                "link is not bound to an account; complete registration first",
            ))
        }
    };

    let _ = state.audit.record(
        Some(user.id),
        actions::MAGIC_LINK_CONSUMED,
        &format!("magic-link:{}", consumed.purpose),
        json!({ "email": consumed.email }),
        true,
    );

    // Recovery flows kill every other credential the account holds.
    if matches!(consumed.purpose, Purpose::AccountRecover | Purpose::PasswordReset) {
        let _ = state.sessions.revoke_all_for_user(user.id);
        let _ = state.magic_links.revoke_all_for(user.id);
    }

    issue_session(&state, &user, addr, &headers)
}

fn issue_session(
    state: &Arc<AppState>,
    user: &relay_identity::types::User,
    addr: SocketAddr,
    headers: &HeaderMap,
) -> Result<Json<SessionResponse>, ApiError> {
    let agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let (session, token) = state.sessions.issue(
        user.id,
        &user.uuid,
        Some(&addr.ip().to_string()),
        agent.as_deref(),
    )?;
    let _ = state.audit.record(
        Some(user.id),
        actions::SESSION_ISSUED,
        &format!("session:{}", session.id),
        json!({}),
        true,
    );
    Ok(Json(SessionResponse {
        token,
        user: user.to_public(),
    }))
}
