use relay_core::error::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("token signature or format invalid")]
    TokenInvalid,

    #[error("token expired")]
    TokenExpired,

    #[error("session revoked or idle-expired")]
    SessionRevoked,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("account locked until {until}")]
    LockedOut { until: String },

    #[error("email already registered: {0}")]
    DuplicateEmail(String),

    #[error("handle already taken: {0}")]
    DuplicateHandle(String),

    #[error("user not found: {0}")]
    UserNotFound(i64),

    #[error("validation: {0}")]
    Validation(String),

    #[error("password hashing error: {0}")]
    Hash(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl IdentityError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IdentityError::TokenInvalid
            | IdentityError::TokenExpired
            | IdentityError::SessionRevoked
            | IdentityError::InvalidCredentials => ErrorKind::Unauthenticated,
            IdentityError::LockedOut { .. } => ErrorKind::RateLimited,
            IdentityError::DuplicateEmail(_) | IdentityError::DuplicateHandle(_) => {
                ErrorKind::Conflict
            }
            IdentityError::UserNotFound(_) => ErrorKind::NotFound,
            IdentityError::Validation(_) => ErrorKind::Validation,
            IdentityError::Hash(_) => ErrorKind::Internal,
            IdentityError::Database(_) => ErrorKind::Unavailable,
        }
    }
}

pub type Result<T> = std::result::Result<T, IdentityError>;
