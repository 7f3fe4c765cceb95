//! Metadata store error types.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Record already exists: {0}")]
    AlreadyExists(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Server error ({0}): {1}")]
    ServerError(u16, String),

    #[error("Rate limited, retry after {0}ms")]
    RateLimited(u64),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn request_failed(msg: impl Into<String>) -> Self {
        Self::RequestFailed(msg.into())
    }

    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Map an HTTP status and body to an error.
    pub fn from_http_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        match status {
            404 => Self::NotFound(body),
            409 => Self::AlreadyExists(body),
            // PostgREST does not send Retry-After; use a fixed hint
            429 => Self::RateLimited(1000),
            500..=599 => Self::ServerError(status, body),
            _ => Self::RequestFailed(format!("HTTP {}: {}", status, body)),
        }
    }

    /// HTTP status this error corresponds to, if any.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            StoreError::NotFound(_) => Some(404),
            StoreError::AlreadyExists(_) => Some(409),
            StoreError::RateLimited(_) => Some(429),
            StoreError::ServerError(status, _) => Some(*status),
            StoreError::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            StoreError::RateLimited(ms) => Some(*ms),
            _ => None,
        }
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Network(_) | StoreError::RateLimited(_) | StoreError::ServerError(_, _)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_http_status() {
        assert!(matches!(StoreError::from_http_status(404, "x"), StoreError::NotFound(_)));
        assert!(matches!(
            StoreError::from_http_status(409, "x"),
            StoreError::AlreadyExists(_)
        ));
        assert!(matches!(
            StoreError::from_http_status(503, "x"),
            StoreError::ServerError(503, _)
        ));
        assert!(matches!(
            StoreError::from_http_status(400, "x"),
            StoreError::RequestFailed(_)
        ));
    }

    #[test]
    fn test_retryable() {
        assert!(StoreError::from_http_status(429, "slow down").is_retryable());
        assert!(StoreError::from_http_status(502, "bad gateway").is_retryable());
        assert!(!StoreError::from_http_status(400, "bad request").is_retryable());
        assert!(!StoreError::not_found("sample").is_retryable());
    }

    #[test]
    fn test_http_status_getter() {
        assert_eq!(StoreError::RateLimited(10).http_status(), Some(429));
        assert_eq!(StoreError::ServerError(500, "e".into()).http_status(), Some(500));
        assert_eq!(StoreError::config("bad").http_status(), None);
    }
}
