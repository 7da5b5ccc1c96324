use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error, Clone)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("credential store error: {0}")]
    Store(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("push delivery error: {0}")]
    Push(String),

    #[error("event transport error: {0}")]
    Transport(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error")]
    Internal,
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Serialization(e.to_string())
    }
}

impl From<redis::RedisError> for AppError {
    fn from(e: redis::RedisError) -> Self {
        AppError::Store(e.to_string())
    }
}

impl AppError {
    /// Returns whether this error is transient (store or transport hiccup)
    /// as opposed to a caller mistake. Transient errors are retried on the
    /// owning component's own schedule, never inline.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Store(_) | AppError::Transport(_))
    }
}
