use relay_core::error::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MagicLinkError {
    #[error("rate limited; retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("no account for this email")]
    UnknownEmail,

    #[error("link already consumed")]
    AlreadyConsumed,

    #[error("link expired")]
    Expired,

    #[error("link revoked")]
    Revoked,

    #[error("link not found")]
    NotFound,

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl MagicLinkError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MagicLinkError::RateLimited { .. } => ErrorKind::RateLimited,
            MagicLinkError::UnknownEmail => ErrorKind::NotFound,
            MagicLinkError::AlreadyConsumed => ErrorKind::Conflict,
            MagicLinkError::Expired | MagicLinkError::Revoked | MagicLinkError::NotFound => {
                ErrorKind::NotFound
            }
            MagicLinkError::Database(_) => ErrorKind::Unavailable,
        }
    }
}

pub type Result<T> = std::result::Result<T, MagicLinkError>;
