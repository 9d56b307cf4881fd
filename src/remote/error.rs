use std::time::Duration;

use thiserror::Error;

/// Failure of a remote lookup
///
/// Cloneable so every caller coalesced onto one request receives the same
/// outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("http status {status}: {message}")]
    Http { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid request: {0}")]
    InvalidInput(String),

    #[error("malformed response: {0}")]
    Decode(String),
}

impl FetchError {
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        FetchError::Http {
            status,
            message: message.into(),
        }
    }

    /// Whether another attempt could succeed: network errors, timeouts and 5xx
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Http { status, .. } => (500..600).contains(status),
            FetchError::Network(_) | FetchError::Timeout(_) => true,
            FetchError::InvalidInput(_) | FetchError::Decode(_) => false,
        }
    }
}
