//! Structured job logging.
//!
//! Keeps the job lifecycle lines uniform: every line carries the job id, the
//! worker that holds it and the model.

use std::time::Duration;

use nexus_models::{JobId, JobState};
use tracing::{debug, error, info, warn, Span};

/// Job logger for one job on one worker.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    worker: usize,
    model_id: String,
}

impl JobLogger {
    pub fn new(job_id: &JobId, worker: usize, model_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            worker,
            model_id: model_id.to_string(),
        }
    }

    /// Log that the worker picked the job up.
    pub fn log_start(&self, queue_wait: Duration, budget: Duration) {
        debug!(
            job_id = %self.job_id,
            worker = self.worker,
            model_id = %self.model_id,
            queue_wait_ms = queue_wait.as_millis() as u64,
            budget_ms = budget.as_millis() as u64,
            "Job started"
        );
    }

    /// Log how the job settled.
    pub fn log_outcome(&self, state: JobState, elapsed: Duration, detail: Option<&str>) {
        let elapsed_ms = elapsed.as_millis() as u64;
        match state {
            JobState::Completed => info!(
                job_id = %self.job_id,
                worker = self.worker,
                model_id = %self.model_id,
                elapsed_ms,
                "Job completed"
            ),
            JobState::Cancelled => info!(
                job_id = %self.job_id,
                worker = self.worker,
                elapsed_ms,
                "Job cancelled while running"
            ),
            JobState::TimedOut => warn!(
                job_id = %self.job_id,
                worker = self.worker,
                model_id = %self.model_id,
                elapsed_ms,
                "Job timed out"
            ),
            _ => warn!(
                job_id = %self.job_id,
                worker = self.worker,
                model_id = %self.model_id,
                elapsed_ms,
                error = detail.unwrap_or("unknown"),
                "Job failed"
            ),
        }
    }

    /// Log a failure outside the executor (sink, bookkeeping).
    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            worker = self.worker,
            "Job error: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn worker(&self) -> usize {
        self.worker
    }

    /// Span covering the whole job on this worker.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            worker = self.worker,
            model_id = %self.model_id
        )
    }
}
