use thiserror::Error;

/// Push Provider Error Types
#[derive(Error, Debug)]
pub enum PushError {
    #[error("Provider not configured for platform: {0}")]
    NotConfigured(String),

    #[error("Push send request failed: {0}")]
    SendRequestError(String),

    #[error("Failed to parse provider response: {0}")]
    ResponseParseError(String),

    #[error("Provider API error: {0} - {1}")]
    ApiError(String, String),

    #[error("Internal error")]
    Internal,
}

impl From<PushError> for String {
    fn from(err: PushError) -> Self {
        err.to_string()
    }
}
