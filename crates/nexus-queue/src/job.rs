//! Job records held by the queue, and the handles it gives out.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use nexus_models::{InferenceJob, InferenceRequest, InferenceResult, JobError, JobId, JobState};
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;

/// What a completion waiter receives.
pub type WaitResult = Result<InferenceResult, JobError>;

/// Position in the ready set: higher priority first, then admission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct QueueKey {
    pub(crate) priority: std::cmp::Reverse<i32>,
    pub(crate) seq: u64,
}

/// Internal job table entry.
pub(crate) struct JobRecord {
    pub(crate) request: Arc<InferenceRequest>,
    pub(crate) key: QueueKey,
    pub(crate) state: JobState,
    pub(crate) attempts: u32,
    pub(crate) enqueued_at: DateTime<Utc>,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) finished_at: Option<DateTime<Utc>>,
    pub(crate) error: Option<String>,
    pub(crate) detection_count: Option<usize>,
    pub(crate) waiters: Vec<oneshot::Sender<WaitResult>>,
    pub(crate) cancel: watch::Sender<bool>,
}

impl JobRecord {
    pub(crate) fn new(request: Arc<InferenceRequest>, key: QueueKey) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            request,
            key,
            state: JobState::Queued,
            attempts: 0,
            enqueued_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
            detection_count: None,
            waiters: Vec::new(),
            cancel,
        }
    }

    pub(crate) fn cancel_requested(&self) -> bool {
        *self.cancel.borrow()
    }

    pub(crate) fn snapshot(&self) -> InferenceJob {
        let req = &self.request;
        InferenceJob {
            id: req.id.clone(),
            model_id: req.model_id.clone(),
            task: req.task,
            priority: req.priority,
            source: req.source,
            camera_id: req.camera_id.clone(),
            state: self.state,
            attempts: self.attempts,
            submitted_at: req.submitted_at,
            enqueued_at: self.enqueued_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            deadline: req.deadline,
            error: self.error.clone(),
            detection_count: self.detection_count,
        }
    }

    /// Move to a terminal state and wake every waiter with `result`.
    pub(crate) fn settle_now(&mut self, state: JobState, result: WaitResult) {
        self.state = state;
        self.finished_at = Some(Utc::now());
        if let Err(e) = &result {
            self.error = Some(e.to_string());
        }
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(result.clone());
        }
    }
}

/// A job handed to a worker. The job is already `Running` in the table.
#[derive(Debug)]
pub struct DequeuedJob {
    pub request: Arc<InferenceRequest>,
    /// Flips to `true` when a caller cancels the running job.
    pub cancel: watch::Receiver<bool>,
    pub dequeued_at: Instant,
    /// Time the job spent queued.
    pub queue_wait: Duration,
}

impl DequeuedJob {
    pub fn job_id(&self) -> &JobId {
        &self.request.id
    }

    pub fn is_cancel_requested(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Time budget left before the request deadline, if it has one.
    pub fn deadline_remaining(&self) -> Option<Duration> {
        self.request.deadline.map(|deadline| {
            (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO)
        })
    }
}

/// Completion signal for a single job.
#[derive(Debug)]
pub struct JobWaiter {
    job_id: JobId,
    rx: oneshot::Receiver<WaitResult>,
}

impl JobWaiter {
    pub(crate) fn new(job_id: JobId, rx: oneshot::Receiver<WaitResult>) -> Self {
        Self { job_id, rx }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Wait until the job reaches a terminal state.
    ///
    /// A job dropped without settling (queue torn down) reports `Cancelled`.
    pub async fn wait(self) -> WaitResult {
        self.rx.await.unwrap_or(Err(JobError::Cancelled))
    }
}

/// A job that just reached a terminal state via `PriorityQueue::complete`.
///
/// Waiters are only woken by [`Settled::notify`], so the worker can hand the
/// result to the sink first.
#[derive(Debug)]
pub struct Settled {
    pub job: InferenceJob,
    pub outcome: WaitResult,
    pub(crate) waiters: Vec<oneshot::Sender<WaitResult>>,
}

impl Settled {
    pub fn state(&self) -> JobState {
        self.job.state
    }

    /// Result to deliver, present only for `Completed` jobs.
    pub fn result(&self) -> Option<&InferenceResult> {
        self.outcome.as_ref().ok()
    }

    /// Wake everyone awaiting this job.
    pub fn notify(self) {
        for waiter in self.waiters {
            let _ = waiter.send(self.outcome.clone());
        }
    }
}
