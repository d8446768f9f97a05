use relay_core::error::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Identity(#[from] relay_identity::IdentityError),

    #[error(transparent)]
    Store(#[from] relay_store::StoreError),

    #[error(transparent)]
    Notify(#[from] relay_notify::NotifyError),

    #[error("rate limited; retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("validation: {0}")]
    Validation(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Identity(e) => e.kind(),
            PipelineError::Store(e) => e.kind(),
            PipelineError::Notify(e) => e.kind(),
            PipelineError::RateLimited { .. } => ErrorKind::RateLimited,
            PipelineError::Validation(_) => ErrorKind::Validation,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
