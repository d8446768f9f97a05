use thiserror::Error;

/// Coarse error taxonomy shared by every subsystem.
///
/// Per-crate error enums carry the detail; this kind is what crosses the
/// wire (REST bodies and WS `error` frames) and what the gateway maps to
/// HTTP status codes. Stack traces never leave the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No valid bearer. Live connections are closed on this.
    Unauthenticated,
    /// Bearer valid but policy denied. Connection stays open.
    Forbidden,
    /// Target entity absent.
    NotFound,
    /// Duplicate handle/email, idempotency replay, already-consumed link.
    Conflict,
    /// Quota exceeded; carries a retry-after hint where available.
    RateLimited,
    /// Malformed content, too long, bad mention.
    Validation,
    /// Queue full or downstream saturated; transient, retry with backoff.
    Overloaded,
    /// Storage or bus unreachable; logged as ops event.
    Unavailable,
    /// Invariant violation; logged at high severity, opaque to clients.
    Internal,
}

impl ErrorKind {
    /// Stable wire code for REST error bodies and WS `error` frames.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Unauthenticated => "UNAUTHENTICATED",
            ErrorKind::Forbidden => "FORBIDDEN",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::RateLimited => "RATE_LIMITED",
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::Overloaded => "OVERLOADED",
            ErrorKind::Unavailable => "UNAVAILABLE",
            ErrorKind::Internal => "INTERNAL",
        }
    }

    /// Whether a client retry of the same request can reasonably succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimited | ErrorKind::Overloaded | ErrorKind::Unavailable
        )
    }
}

/// Errors owned by relay-core itself (config loading, id parsing).
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Config(_) => ErrorKind::Validation,
            CoreError::Serialization(_) => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(ErrorKind::Unauthenticated.code(), "UNAUTHENTICATED");
        assert_eq!(ErrorKind::RateLimited.code(), "RATE_LIMITED");
        assert_eq!(ErrorKind::Internal.code(), "INTERNAL");
    }

    #[test]
    fn transient_kinds() {
        assert!(ErrorKind::Overloaded.is_transient());
        assert!(ErrorKind::Unavailable.is_transient());
        assert!(!ErrorKind::Forbidden.is_transient());
    }
}
