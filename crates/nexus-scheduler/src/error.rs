//! Scheduler error types.

use std::time::Duration;

use nexus_executor::ExecutorError;
use nexus_models::{JobError, JobId};
use nexus_queue::AdmissionError;
use nexus_stream::StreamError;
use nexus_worker::WorkerError;
use thiserror::Error;

pub type SchedulerResult<T> = Result<T, SchedulerError>;

#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Refused at submission; no job was created.
    #[error("Admission refused: {0}")]
    Admission(#[from] AdmissionError),

    #[error("Job {job_id} failed: {message}")]
    Execution { job_id: JobId, message: String },

    /// The executor exceeded the job's budget.
    #[error("Job {job_id} timed out after {elapsed:?}")]
    JobTimedOut { job_id: JobId, elapsed: Duration },

    /// The caller stopped waiting. `cancelled` tells whether the job was
    /// still queued and got cancelled.
    #[error("Timed out after {timeout:?} waiting for job {job_id}")]
    Timeout {
        job_id: JobId,
        timeout: Duration,
        cancelled: bool,
    },

    #[error("Job {0} was cancelled")]
    Cancelled(JobId),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Camera error: {0}")]
    Stream(#[from] StreamError),

    #[error("Worker pool error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SchedulerError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Map the terminal failure of a job.
    pub fn from_job(job_id: JobId, error: JobError) -> Self {
        match error {
            JobError::Execution(message) => Self::Execution { job_id, message },
            JobError::TimedOut(elapsed) => Self::JobTimedOut { job_id, elapsed },
            JobError::Cancelled => Self::Cancelled(job_id),
        }
    }

    /// Either kind of timeout: the executor's or the caller's.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::JobTimedOut { .. } | Self::Timeout { .. })
    }

    /// Whether retrying the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Admission(e) => e.is_retryable(),
            Self::JobTimedOut { .. } | Self::Timeout { .. } => true,
            _ => false,
        }
    }
}
