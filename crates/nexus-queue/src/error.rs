//! Queue admission errors.

use nexus_models::CameraId;
use thiserror::Error;

pub type AdmissionResult<T> = Result<T, AdmissionError>;

/// Why a submission was refused. Refused requests never become jobs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    #[error("Queue is full (capacity: {capacity})")]
    QueueFull { capacity: usize },

    #[error("Camera {camera_id} throttled: {limit} jobs already in flight")]
    SourceThrottled { camera_id: CameraId, limit: usize },

    #[error("Queue is shutting down")]
    ShuttingDown,
}

impl AdmissionError {
    /// Check if the submitter may retry later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AdmissionError::QueueFull { .. } | AdmissionError::SourceThrottled { .. }
        )
    }

    /// Short label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            AdmissionError::QueueFull { .. } => "queue_full",
            AdmissionError::SourceThrottled { .. } => "source_throttled",
            AdmissionError::ShuttingDown => "shutting_down",
        }
    }
}
