//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Render failed: {0}")]
    RenderFailed(String),

    #[error("Render timed out after {0} seconds")]
    RenderTimeout(u64),

    #[error("Invalid render output: {0}")]
    InvalidOutput(String),

    #[error("Invalid recipe: {0}")]
    InvalidRecipe(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Scene build failed: {0}")]
    SceneBuildFailed(String),

    #[error("Collaborator call failed: {0}")]
    CollaboratorFailed(String),

    #[error("Collaborator rejected request: {0}")]
    CollaboratorRejected(String),

    #[error("Vision error: {0}")]
    Vision(#[from] rqv_vision::VisionError),

    #[error("Store error: {0}")]
    Store(#[from] rqv_store::StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] rqv_queue::QueueError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Image decode error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn render_failed(msg: impl Into<String>) -> Self {
        Self::RenderFailed(msg.into())
    }

    pub fn invalid_output(msg: impl Into<String>) -> Self {
        Self::InvalidOutput(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn collaborator_failed(msg: impl Into<String>) -> Self {
        Self::CollaboratorFailed(msg.into())
    }

    /// Map a non-success HTTP status from a collaborator. 5xx and 429 are
    /// retryable, other statuses are not.
    pub fn from_http_status(service: &str, status: u16, body: &str) -> Self {
        let msg = format!("{} returned {}: {}", service, status, body);
        if status >= 500 || status == 429 {
            Self::CollaboratorFailed(msg)
        } else {
            Self::CollaboratorRejected(msg)
        }
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::CollaboratorFailed(_) | WorkerError::Http(_) => true,
            WorkerError::Store(e) => e.is_retryable(),
            WorkerError::Queue(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Whether the failure should still produce a terminal FAIL verdict for
    /// the sample rather than abort it.
    pub fn is_render_failure(&self) -> bool {
        matches!(
            self,
            WorkerError::RenderFailed(_)
                | WorkerError::RenderTimeout(_)
                | WorkerError::InvalidOutput(_)
                | WorkerError::SceneBuildFailed(_)
                | WorkerError::Image(_)
        )
    }
}
