//! Executor error types.

use std::time::Duration;

use thiserror::Error;

pub type ExecutorResult<T> = Result<T, ExecutorError>;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Model server timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ExecutorError {
    pub fn request_failed(msg: impl Into<String>) -> Self {
        Self::RequestFailed(msg.into())
    }

    pub fn invalid_image(msg: impl Into<String>) -> Self {
        Self::InvalidImage(msg.into())
    }

    /// Whether the model server might succeed on a later request.
    ///
    /// The worker pool never retries a job; this only informs logging and
    /// callers that resubmit.
    pub fn is_transient(&self) -> bool {
        matches!(self, ExecutorError::Timeout(_) | ExecutorError::Network(_))
    }
}
