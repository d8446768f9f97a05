use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use relay_core::error::ErrorKind;
use serde::Serialize;

/// Stable error body shared by REST responses and (shape-wise) WS error
/// frames. No stack traces cross this boundary.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
    pub retry_after_secs: Option<u64>,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after_secs: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self.kind {
            ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Overloaded => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Internal detail stays in the logs; the client sees the kind only.
        let status = self.status();
        let message = match self.kind {
            ErrorKind::Internal | ErrorKind::Unavailable => "temporary failure".to_string(),
            _ => self.message,
        };
        (
            status,
            Json(ErrorBody {
                code: self.kind.code(),
                message,
                retry_after_secs: self.retry_after_secs,
            }),
        )
            .into_response()
    }
}

impl From<relay_identity::IdentityError> for ApiError {
    fn from(e: relay_identity::IdentityError) -> Self {
        let retry = match &e {
            relay_identity::IdentityError::LockedOut { .. } => Some(900),
            _ => None,
        };
        Self {
            kind: e.kind(),
            message: e.to_string(),
            retry_after_secs: retry,
        }
    }
}

impl From<relay_magiclink::MagicLinkError> for ApiError {
    fn from(e: relay_magiclink::MagicLinkError) -> Self {
        let retry = match &e {
            relay_magiclink::MagicLinkError::RateLimited { retry_after_secs } => {
                Some(*retry_after_secs)
            }
            _ => None,
        };
        Self {
            kind: e.kind(),
            message: e.to_string(),
            retry_after_secs: retry,
        }
    }
}

impl From<relay_store::StoreError> for ApiError {
    fn from(e: relay_store::StoreError) -> Self {
        Self::new(e.kind(), e.to_string())
    }
}

impl From<relay_notify::NotifyError> for ApiError {
    fn from(e: relay_notify::NotifyError) -> Self {
        Self::new(e.kind(), e.to_string())
    }
}

impl From<relay_pipeline::PipelineError> for ApiError {
    fn from(e: relay_pipeline::PipelineError) -> Self {
        let retry = match &e {
            relay_pipeline::PipelineError::RateLimited { retry_after_secs } => {
                Some(*retry_after_secs)
            }
            _ => None,
        };
        Self {
            kind: e.kind(),
            message: e.to_string(),
            retry_after_secs: retry,
        }
    }
}

impl From<relay_audit::AuditError> for ApiError {
    fn from(e: relay_audit::AuditError) -> Self {
        Self::new(e.kind(), e.to_string())
    }
}
