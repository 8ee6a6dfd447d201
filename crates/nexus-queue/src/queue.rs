//! Priority queue with admission control.
//!
//! All state lives behind a single mutex, so `submit`, `dequeue`, `cancel`
//! and `complete` are linearizable with respect to each other. The lock is
//! never held across an `.await`.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use nexus_models::{
    CameraId, InferenceJob, InferenceRequest, JobError, JobId, JobOutcome, JobState, Priority,
};
use tokio::sync::{oneshot, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::error::{AdmissionError, AdmissionResult};
use crate::job::{DequeuedJob, JobRecord, JobWaiter, QueueKey, Settled, WaitResult};
use crate::stats::{PriorityCount, QueueStats, QueueTotals};

#[derive(Default)]
struct QueueState {
    /// Ready set ordered by priority then admission sequence.
    ready: BTreeMap<QueueKey, JobId>,
    /// Admission instant of every queued job, keyed by sequence (oldest first).
    admitted: BTreeMap<u64, Instant>,
    /// Queued job count per priority value.
    per_priority: BTreeMap<i32, usize>,
    /// Queued + running jobs per camera.
    camera_inflight: HashMap<CameraId, usize>,
    jobs: HashMap<JobId, JobRecord>,
    /// Terminal jobs in settle order, for bounded retention.
    finished: VecDeque<JobId>,
    running: usize,
    next_seq: u64,
    closed: bool,
    totals: QueueTotals,
}

impl QueueState {
    /// Take a queued job out of the ready structures.
    fn unlink_ready(&mut self, key: QueueKey) {
        self.ready.remove(&key);
        self.admitted.remove(&key.seq);
        let priority = key.priority.0;
        if let Some(count) = self.per_priority.get_mut(&priority) {
            *count -= 1;
            if *count == 0 {
                self.per_priority.remove(&priority);
            }
        }
    }

    fn release_camera_slot(&mut self, camera_id: Option<&CameraId>) {
        let Some(camera_id) = camera_id else {
            return;
        };
        if let Some(count) = self.camera_inflight.get_mut(camera_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.camera_inflight.remove(camera_id);
            }
        }
    }

    fn count_terminal(&mut self, state: JobState) {
        match state {
            JobState::Completed => self.totals.completed += 1,
            JobState::Failed => self.totals.failed += 1,
            JobState::TimedOut => self.totals.timed_out += 1,
            JobState::Cancelled => self.totals.cancelled += 1,
            JobState::Queued | JobState::Running => {}
        }
    }

    /// Remember a terminal job, evicting the oldest records beyond `limit`.
    fn retain(&mut self, job_id: JobId, limit: usize) {
        self.finished.push_back(job_id);
        while self.finished.len() > limit {
            if let Some(evicted) = self.finished.pop_front() {
                self.jobs.remove(&evicted);
            }
        }
    }

    /// Cancel a queued job in place. Caller has checked the state.
    fn cancel_queued(&mut self, job_id: &JobId, retain_limit: usize) {
        let Some(record) = self.jobs.get_mut(job_id) else {
            return;
        };
        let key = record.key;
        let camera_id = record.request.camera_id.clone();
        record.settle_now(JobState::Cancelled, Err(JobError::Cancelled));
        self.unlink_ready(key);
        self.release_camera_slot(camera_id.as_ref());
        self.count_terminal(JobState::Cancelled);
        self.retain(job_id.clone(), retain_limit);
    }
}

enum Next {
    Job(DequeuedJob),
    Empty,
    Closed,
}

/// Bounded, priority-ordered queue of inference jobs.
pub struct PriorityQueue {
    state: Mutex<QueueState>,
    ready: Notify,
    config: QueueConfig,
}

impl PriorityQueue {
    /// Create a new queue.
    pub fn new(config: QueueConfig) -> Self {
        info!(
            "Creating inference queue (capacity: {}, per-camera in-flight: {})",
            config.capacity, config.max_inflight_per_camera
        );
        Self {
            state: Mutex::new(QueueState::default()),
            ready: Notify::new(),
            config,
        }
    }

    /// Create from environment variables.
    pub fn from_env() -> Self {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit a request. Returns the generated job id.
    pub fn submit(&self, request: InferenceRequest) -> AdmissionResult<JobId> {
        self.admit(request, None)
    }

    /// Admit a request and register a completion waiter for it atomically.
    pub fn submit_with_waiter(
        &self,
        request: InferenceRequest,
    ) -> AdmissionResult<(JobId, JobWaiter)> {
        let (tx, rx) = oneshot::channel();
        let job_id = self.admit(request, Some(tx))?;
        Ok((job_id.clone(), JobWaiter::new(job_id, rx)))
    }

    fn admit(
        &self,
        mut request: InferenceRequest,
        waiter: Option<oneshot::Sender<WaitResult>>,
    ) -> AdmissionResult<JobId> {
        let mut st = self.lock();

        if st.closed {
            st.totals.rejected += 1;
            return Err(AdmissionError::ShuttingDown);
        }

        if st.ready.len() >= self.config.capacity {
            st.totals.rejected += 1;
            debug!(
                depth = st.ready.len(),
                "Rejecting submission: queue full (capacity {})", self.config.capacity
            );
            return Err(AdmissionError::QueueFull {
                capacity: self.config.capacity,
            });
        }

        if let Some(camera_id) = &request.camera_id {
            let limit = self.config.max_inflight_per_camera;
            let inflight = st.camera_inflight.get(camera_id).copied().unwrap_or(0);
            if limit > 0 && inflight >= limit {
                st.totals.rejected += 1;
                return Err(AdmissionError::SourceThrottled {
                    camera_id: camera_id.clone(),
                    limit,
                });
            }
        }

        request.id = JobId::new();
        request.submitted_at = Utc::now();
        let job_id = request.id.clone();

        let seq = st.next_seq;
        st.next_seq += 1;
        let key = QueueKey {
            priority: Reverse(request.priority.value()),
            seq,
        };

        st.ready.insert(key, job_id.clone());
        st.admitted.insert(seq, Instant::now());
        *st.per_priority.entry(request.priority.value()).or_insert(0) += 1;
        if let Some(camera_id) = &request.camera_id {
            *st.camera_inflight.entry(camera_id.clone()).or_insert(0) += 1;
        }

        let priority = request.priority;
        let mut record = JobRecord::new(Arc::new(request), key);
        record.waiters.extend(waiter);
        st.jobs.insert(job_id.clone(), record);
        st.totals.submitted += 1;
        drop(st);

        debug!(job_id = %job_id, priority = %priority, "Job queued");
        self.ready.notify_one();
        Ok(job_id)
    }

    fn next(&self) -> Next {
        let mut st = self.lock();
        if st.closed {
            return Next::Closed;
        }
        let Some((&key, job_id)) = st.ready.first_key_value() else {
            return Next::Empty;
        };
        let job_id = job_id.clone();
        st.unlink_ready(key);

        let Some(record) = st.jobs.get_mut(&job_id) else {
            warn!(job_id = %job_id, "Queued job missing from job table");
            return Next::Empty;
        };
        record.state = JobState::Running;
        record.attempts += 1;
        record.started_at = Some(Utc::now());

        let queue_wait = (Utc::now() - record.enqueued_at)
            .to_std()
            .unwrap_or_default();
        let job = DequeuedJob {
            request: Arc::clone(&record.request),
            cancel: record.cancel.subscribe(),
            dequeued_at: Instant::now(),
            queue_wait,
        };
        st.running += 1;
        Next::Job(job)
    }

    /// Take the next job without waiting.
    pub fn try_dequeue(&self) -> Option<DequeuedJob> {
        match self.next() {
            Next::Job(job) => Some(job),
            Next::Empty | Next::Closed => None,
        }
    }

    /// Take the highest-priority, oldest job, waiting while the queue is empty.
    ///
    /// Returns `None` once the queue has been closed.
    pub async fn dequeue(&self) -> Option<DequeuedJob> {
        loop {
            let notified = self.ready.notified();
            tokio::pin!(notified);
            // Register interest before checking, so a submit racing with the
            // check still wakes us.
            notified.as_mut().enable();

            match self.next() {
                Next::Job(job) => return Some(job),
                Next::Closed => return None,
                Next::Empty => notified.await,
            }
        }
    }

    /// Cancel a job.
    ///
    /// Returns `true` only if the job was still queued; it is then removed and
    /// settled as `Cancelled` immediately. For a running job the cooperative
    /// cancel flag is raised and `false` is returned: the worker either
    /// interrupts the executor or discards its result.
    pub fn cancel(&self, job_id: &JobId) -> bool {
        let mut st = self.lock();
        match st.jobs.get(job_id).map(|r| r.state) {
            Some(JobState::Queued) => {
                st.cancel_queued(job_id, self.config.max_retained_jobs);
                debug!(job_id = %job_id, "Queued job cancelled");
                true
            }
            Some(JobState::Running) => {
                if let Some(record) = st.jobs.get(job_id) {
                    record.cancel.send_replace(true);
                }
                debug!(job_id = %job_id, "Cancel requested for running job");
                false
            }
            _ => false,
        }
    }

    /// Cancel a job only if it has not started. Running jobs are left alone.
    pub fn cancel_if_queued(&self, job_id: &JobId) -> bool {
        let mut st = self.lock();
        match st.jobs.get(job_id).map(|r| r.state) {
            Some(JobState::Queued) => {
                st.cancel_queued(job_id, self.config.max_retained_jobs);
                true
            }
            _ => false,
        }
    }

    /// Settle a running job with the worker's outcome.
    ///
    /// A successful run whose cancel flag was raised settles as `Cancelled`
    /// and its result is withheld. Returns `None` if the job is not running.
    pub fn complete(&self, job_id: &JobId, outcome: JobOutcome) -> Option<Settled> {
        let mut st = self.lock();
        let limit = self.config.max_retained_jobs;
        let record = st.jobs.get_mut(job_id)?;
        if record.state != JobState::Running {
            warn!(
                job_id = %job_id,
                state = %record.state,
                "Ignoring completion for job that is not running"
            );
            return None;
        }

        let cancel_requested = record.cancel_requested();
        let (state, result) = match outcome {
            JobOutcome::Completed(_) if cancel_requested => {
                (JobState::Cancelled, Err(JobError::Cancelled))
            }
            JobOutcome::Completed(result) => {
                record.detection_count = Some(result.detections.len());
                (JobState::Completed, Ok(result))
            }
            JobOutcome::Failed(msg) => (JobState::Failed, Err(JobError::Execution(msg))),
            JobOutcome::TimedOut(after) => (JobState::TimedOut, Err(JobError::TimedOut(after))),
            JobOutcome::Cancelled => (JobState::Cancelled, Err(JobError::Cancelled)),
        };

        debug_assert!(record.state.can_transition_to(state));
        record.state = state;
        record.finished_at = Some(Utc::now());
        if let Err(e) = &result {
            record.error = Some(e.to_string());
        }
        let waiters = std::mem::take(&mut record.waiters);
        let job = record.snapshot();
        let camera_id = record.request.camera_id.clone();

        st.running = st.running.saturating_sub(1);
        st.release_camera_slot(camera_id.as_ref());
        st.count_terminal(state);
        st.retain(job_id.clone(), limit);

        Some(Settled {
            job,
            outcome: result,
            waiters,
        })
    }

    /// Snapshot of a job, if it is known and still retained.
    pub fn status(&self, job_id: &JobId) -> Option<InferenceJob> {
        self.lock().jobs.get(job_id).map(JobRecord::snapshot)
    }

    /// Register a completion waiter on an existing, unfinished job.
    pub fn subscribe(&self, job_id: &JobId) -> Option<JobWaiter> {
        let mut st = self.lock();
        let record = st.jobs.get_mut(job_id)?;
        if record.state.is_terminal() {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        record.waiters.push(tx);
        Some(JobWaiter::new(job_id.clone(), rx))
    }

    /// Queued + running jobs for a camera.
    pub fn camera_inflight(&self, camera_id: &CameraId) -> usize {
        self.lock()
            .camera_inflight
            .get(camera_id)
            .copied()
            .unwrap_or(0)
    }

    /// Number of queued jobs.
    pub fn depth(&self) -> usize {
        self.lock().ready.len()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Current occupancy.
    pub fn stats(&self) -> QueueStats {
        let st = self.lock();
        QueueStats {
            depth: st.ready.len(),
            capacity: self.config.capacity,
            running: st.running,
            per_priority: st
                .per_priority
                .iter()
                .rev()
                .map(|(priority, count)| PriorityCount {
                    priority: Priority(*priority),
                    count: *count,
                })
                .collect(),
            oldest_age: st
                .admitted
                .first_key_value()
                .map(|(_, admitted)| admitted.elapsed()),
            totals: st.totals,
        }
    }

    /// Stop accepting work.
    ///
    /// Every queued job is cancelled and every blocked `dequeue` returns
    /// `None`. Running jobs are unaffected and may still be completed.
    pub fn close(&self) -> Vec<JobId> {
        let mut st = self.lock();
        if st.closed {
            return Vec::new();
        }
        st.closed = true;

        let queued: Vec<JobId> = st.ready.values().cloned().collect();
        for job_id in &queued {
            st.cancel_queued(job_id, self.config.max_retained_jobs);
        }
        drop(st);

        self.ready.notify_waiters();
        info!("Inference queue closed, {} queued jobs cancelled", queued.len());
        queued
    }
}
