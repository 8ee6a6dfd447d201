//! Worker metrics.
//!
//! - Jobs by terminal state
//! - Execution and queue-wait histograms
//! - Busy workers gauge
//! - Sink failures

use std::time::Duration;

use metrics::{counter, gauge, histogram};
use nexus_models::JobState;

/// Metric name constants for consistency.
pub mod names {
    /// Jobs settled by a worker, by state.
    pub const JOBS_TOTAL: &str = "nexus_jobs_total";

    /// Time from dequeue to settle, in seconds.
    pub const JOB_DURATION_SECONDS: &str = "nexus_job_duration_seconds";

    /// Time spent queued before a worker picked the job up, in seconds.
    pub const QUEUE_WAIT_SECONDS: &str = "nexus_queue_wait_seconds";

    /// Workers currently holding a job.
    pub const WORKERS_BUSY: &str = "nexus_workers_busy";

    /// Pool size.
    pub const WORKERS_TOTAL: &str = "nexus_workers_total";

    /// Failed or timed out sink calls, by operation.
    pub const SINK_ERRORS_TOTAL: &str = "nexus_sink_errors_total";

    /// Panics caught while processing a job.
    pub const PANICS_TOTAL: &str = "nexus_worker_panics_total";
}

pub fn record_job(state: JobState, model_id: &str, elapsed: Duration) {
    counter!(
        names::JOBS_TOTAL,
        "state" => state.as_str(),
        "model" => model_id.to_string()
    )
    .increment(1);

    histogram!(
        names::JOB_DURATION_SECONDS,
        "state" => state.as_str()
    )
    .record(elapsed.as_secs_f64());
}

pub fn record_queue_wait(wait: Duration) {
    histogram!(names::QUEUE_WAIT_SECONDS).record(wait.as_secs_f64());
}

pub fn set_workers_busy(busy: usize) {
    gauge!(names::WORKERS_BUSY).set(busy as f64);
}

pub fn set_workers_total(size: usize) {
    gauge!(names::WORKERS_TOTAL).set(size as f64);
}

pub fn record_sink_error(operation: &'static str) {
    counter!(names::SINK_ERRORS_TOTAL, "operation" => operation).increment(1);
}

pub fn record_panic() {
    counter!(names::PANICS_TOTAL).increment(1);
}
