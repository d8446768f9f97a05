use relay_core::error::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification queue is full")]
    Overloaded,

    #[error("notification not found: {0}")]
    NotFound(String),

    #[error("notification expired")]
    Expired,

    #[error("validation: {0}")]
    Validation(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl NotifyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            NotifyError::Overloaded => ErrorKind::Overloaded,
            NotifyError::NotFound(_) => ErrorKind::NotFound,
            NotifyError::Expired => ErrorKind::Conflict,
            NotifyError::Validation(_) => ErrorKind::Validation,
            NotifyError::Database(_) => ErrorKind::Unavailable,
        }
    }
}

pub type Result<T> = std::result::Result<T, NotifyError>;
