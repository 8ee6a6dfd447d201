//! Processing of a single dequeued job.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use nexus_executor::{ExecutorError, ModelExecutor};
use nexus_models::{CameraEvent, InferenceResult, JobOutcome};
use nexus_queue::{DequeuedJob, PriorityQueue};
use nexus_sink::ResultSink;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{warn, Instrument};

use crate::config::WorkerConfig;
use crate::logging::JobLogger;
use crate::metrics;

/// Everything a worker needs to run jobs.
pub(crate) struct WorkerContext {
    pub(crate) config: WorkerConfig,
    pub(crate) queue: Arc<PriorityQueue>,
    pub(crate) executor: Arc<dyn ModelExecutor>,
    pub(crate) sink: Arc<dyn ResultSink>,
}

/// Execution budget: the configured job timeout, shortened by the deadline.
pub(crate) fn effective_timeout(job_timeout: Duration, deadline_left: Option<Duration>) -> Duration {
    match deadline_left {
        Some(left) => job_timeout.min(left),
        None => job_timeout,
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Resolves once the job's cancel flag is raised. Never resolves if the flag
/// can no longer change.
async fn cancel_requested(mut cancel: watch::Receiver<bool>) {
    if cancel.wait_for(|requested| *requested).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Run the job and settle it in the queue, then deliver the result.
pub(crate) async fn process_job(ctx: &WorkerContext, worker: usize, job: DequeuedJob) {
    let request = Arc::clone(&job.request);
    let logger = JobLogger::new(&request.id, worker, &request.model_id);
    let span = logger.create_span();

    async {
        let budget = effective_timeout(ctx.config.job_timeout, job.deadline_remaining());
        metrics::record_queue_wait(job.queue_wait);
        logger.log_start(job.queue_wait, budget);

        let outcome = if budget.is_zero() {
            // Deadline passed while queued.
            JobOutcome::TimedOut(Duration::ZERO)
        } else {
            execute(ctx, &job, budget).await
        };
        let elapsed = job.dequeued_at.elapsed();

        let detail = match &outcome {
            JobOutcome::Failed(msg) => Some(msg.clone()),
            _ => None,
        };
        let Some(settled) = ctx.queue.complete(&request.id, outcome) else {
            logger.log_error("job was no longer running when it settled");
            return;
        };

        logger.log_outcome(settled.state(), elapsed, detail.as_deref());
        metrics::record_job(settled.state(), &request.model_id, elapsed);

        if let Some(result) = settled.result() {
            let delivered = AssertUnwindSafe(deliver(ctx, &logger, result))
                .catch_unwind()
                .await;
            if let Err(panic) = delivered {
                metrics::record_panic();
                metrics::record_sink_error("store");
                logger.log_error(&format!("result sink panicked: {}", panic_message(&*panic)));
            }
        }
        settled.notify();
    }
    .instrument(span)
    .await
}

/// Run the executor under the job budget, isolating panics.
async fn execute(ctx: &WorkerContext, job: &DequeuedJob, budget: Duration) -> JobOutcome {
    let request = &job.request;
    let started = Instant::now();

    let run = AssertUnwindSafe(ctx.executor.run(
        &request.image,
        &request.model_id,
        request.task,
        budget,
    ))
    .catch_unwind();
    let bounded = tokio::time::timeout(budget, run);

    let finished = if ctx.executor.supports_interruption() {
        tokio::select! {
            finished = bounded => Some(finished),
            _ = cancel_requested(job.cancel.clone()) => None,
        }
    } else {
        Some(bounded.await)
    };

    match finished {
        None => JobOutcome::Cancelled,
        Some(Err(_elapsed)) => JobOutcome::TimedOut(budget),
        Some(Ok(Err(panic))) => {
            metrics::record_panic();
            JobOutcome::Failed(format!("executor panicked: {}", panic_message(&*panic)))
        }
        Some(Ok(Ok(Err(ExecutorError::Timeout(_))))) => JobOutcome::TimedOut(budget),
        Some(Ok(Ok(Err(e)))) => JobOutcome::Failed(e.to_string()),
        Some(Ok(Ok(Ok(detections)))) => JobOutcome::Completed(InferenceResult {
            job_id: request.id.clone(),
            model_id: request.model_id.clone(),
            camera_id: request.camera_id.clone(),
            detections,
            error: None,
            processing_duration: started.elapsed(),
        }),
    }
}

/// Hand a completed result to the sink. Failures are logged and counted only.
async fn deliver(ctx: &WorkerContext, logger: &JobLogger, result: &InferenceResult) {
    let timeout = ctx.config.sink_timeout;

    match tokio::time::timeout(timeout, ctx.sink.store(&result.job_id, result)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            metrics::record_sink_error("store");
            logger.log_error(&format!("failed to store result: {}", e));
        }
        Err(_) => {
            metrics::record_sink_error("store");
            logger.log_error(&format!("storing result timed out after {:?}", timeout));
        }
    }

    let Some(camera_id) = &result.camera_id else {
        return;
    };
    if !result.has_detections() {
        return;
    }

    let mut labels: Vec<String> = result.detections.iter().map(|d| d.label.clone()).collect();
    labels.sort();
    labels.dedup();
    let event = CameraEvent::Detections {
        job_id: result.job_id.clone(),
        count: result.detections.len(),
        labels,
        at: Utc::now(),
    };

    match tokio::time::timeout(timeout, ctx.sink.emit(camera_id, event)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            metrics::record_sink_error("emit");
            warn!(camera_id = %camera_id, "Failed to emit detections event: {}", e);
        }
        Err(_) => {
            metrics::record_sink_error("emit");
            warn!(camera_id = %camera_id, "Emitting detections event timed out");
        }
    }
}
