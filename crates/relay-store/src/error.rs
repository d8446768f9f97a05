use relay_core::error::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("conversation not found: {0}")]
    ConversationNotFound(i64),

    #[error("message not found: {0}")]
    MessageNotFound(i64),

    #[error("not a member of conversation {0}")]
    NotAMember(i64),

    #[error("{0}")]
    Forbidden(String),

    #[error("conversation is full (cap {0})")]
    MemberCapReached(u32),

    #[error("parent message {parent} is not in conversation {conversation}")]
    ParentMismatch { parent: i64, conversation: i64 },

    #[error("edit window elapsed")]
    EditWindowElapsed,

    #[error("validation: {0}")]
    Validation(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::ConversationNotFound(_) | StoreError::MessageNotFound(_) => {
                ErrorKind::NotFound
            }
            StoreError::NotAMember(_) | StoreError::Forbidden(_) => ErrorKind::Forbidden,
            StoreError::MemberCapReached(_) => ErrorKind::Conflict,
            StoreError::ParentMismatch { .. } | StoreError::Validation(_) => ErrorKind::Validation,
            StoreError::EditWindowElapsed => ErrorKind::Forbidden,
            StoreError::Database(_) => ErrorKind::Unavailable,
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
