use relay_core::error::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("invalid time range: {0}")]
    InvalidRange(String),
}

impl AuditError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuditError::Database(_) => ErrorKind::Unavailable,
            AuditError::InvalidRange(_) => ErrorKind::Validation,
        }
    }
}

pub type Result<T> = std::result::Result<T, AuditError>;
