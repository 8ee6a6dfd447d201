//! Worker pool.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use nexus_executor::ModelExecutor;
use nexus_models::{JobId, JobOutcome};
use nexus_queue::PriorityQueue;
use nexus_sink::ResultSink;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::metrics;
use crate::process::{panic_message, process_job, WorkerContext};

/// Snapshot of pool activity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WorkerStats {
    pub size: usize,
    /// Workers currently holding a job
    pub busy: usize,
    /// busy / size
    pub utilization: f64,
    /// Jobs taken off the queue since start
    pub processed: u64,
}

#[derive(Default)]
struct PoolShared {
    busy: AtomicUsize,
    processed: AtomicU64,
    /// Job held by each busy worker.
    current: Mutex<HashMap<usize, JobId>>,
}

impl PoolShared {
    fn current(&self) -> MutexGuard<'_, HashMap<usize, JobId>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fixed set of workers draining a `PriorityQueue`.
pub struct WorkerPool {
    size: usize,
    queue: Arc<PriorityQueue>,
    shared: Arc<PoolShared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
    shutdown_timeout: Duration,
}

impl WorkerPool {
    /// Spawn `config.pool_size` workers on the current tokio runtime.
    pub fn start(
        config: WorkerConfig,
        queue: Arc<PriorityQueue>,
        executor: Arc<dyn ModelExecutor>,
        sink: Arc<dyn ResultSink>,
    ) -> WorkerResult<Self> {
        if config.pool_size == 0 {
            return Err(WorkerError::config_error("pool_size must be at least 1"));
        }

        info!(
            "Starting worker pool with {} workers (executor: {}, job timeout: {:?})",
            config.pool_size,
            executor.name(),
            config.job_timeout
        );

        let size = config.pool_size;
        let shutdown_timeout = config.shutdown_timeout;
        let shared = Arc::new(PoolShared::default());
        let ctx = Arc::new(WorkerContext {
            config,
            queue: Arc::clone(&queue),
            executor,
            sink,
        });

        let handles = (0..size)
            .map(|worker| {
                let ctx = Arc::clone(&ctx);
                let shared = Arc::clone(&shared);
                tokio::spawn(worker_loop(ctx, shared, worker))
            })
            .collect();

        metrics::set_workers_total(size);
        metrics::set_workers_busy(0);

        Ok(Self {
            size,
            queue,
            shared,
            handles: Mutex::new(handles),
            stopped: AtomicBool::new(false),
            shutdown_timeout,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn stats(&self) -> WorkerStats {
        let busy = self.shared.busy.load(Ordering::Relaxed);
        WorkerStats {
            size: self.size,
            busy,
            utilization: busy as f64 / self.size as f64,
            processed: self.shared.processed.load(Ordering::Relaxed),
        }
    }

    /// Shut down with the configured timeout.
    pub async fn shutdown_default(&self) -> WorkerResult<()> {
        self.shutdown(self.shutdown_timeout).await
    }

    /// Close the queue and wait for workers to finish their current job.
    ///
    /// Queued jobs are cancelled. Workers still running after `timeout` are
    /// aborted and their jobs settle as `Failed`.
    pub async fn shutdown(&self, timeout: Duration) -> WorkerResult<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Err(WorkerError::AlreadyShutDown);
        }

        let cancelled = self.queue.close();
        info!(
            "Shutting down worker pool ({} queued jobs cancelled)",
            cancelled.len()
        );

        let mut handles = std::mem::take(
            &mut *self.handles.lock().unwrap_or_else(PoisonError::into_inner),
        );

        let drained = tokio::time::timeout(timeout, async {
            for handle in handles.iter_mut() {
                if let Err(e) = handle.await {
                    if e.is_panic() {
                        error!("Worker task panicked during shutdown: {}", e);
                    }
                }
            }
        })
        .await;

        if drained.is_ok() {
            info!("Worker pool stopped");
            return Ok(());
        }

        let mut aborted = 0;
        for handle in &handles {
            if !handle.is_finished() {
                handle.abort();
                aborted += 1;
            }
        }

        let stranded: Vec<JobId> = self.shared.current().drain().map(|(_, id)| id).collect();
        for job_id in stranded {
            let outcome = JobOutcome::Failed("worker aborted during shutdown".to_string());
            if let Some(settled) = self.queue.complete(&job_id, outcome) {
                settled.notify();
            }
        }

        warn!("Worker pool shutdown timed out, {} workers aborted", aborted);
        Err(WorkerError::ShutdownTimeout { aborted })
    }
}

async fn worker_loop(ctx: Arc<WorkerContext>, shared: Arc<PoolShared>, worker: usize) {
    debug!(worker, "Worker started");

    while let Some(job) = ctx.queue.dequeue().await {
        let job_id = job.job_id().clone();
        shared.processed.fetch_add(1, Ordering::Relaxed);
        shared.current().insert(worker, job_id.clone());
        let busy = shared.busy.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::set_workers_busy(busy);

        let processed = AssertUnwindSafe(process_job(&ctx, worker, job))
            .catch_unwind()
            .await;

        if let Err(panic) = processed {
            metrics::record_panic();
            let msg = panic_message(&*panic);
            error!(worker, job_id = %job_id, "Panic while processing job: {}", msg);
            let outcome = JobOutcome::Failed(format!("worker panicked: {}", msg));
            if let Some(settled) = ctx.queue.complete(&job_id, outcome) {
                settled.notify();
            }
        }

        shared.current().remove(&worker);
        let busy = shared.busy.fetch_sub(1, Ordering::Relaxed) - 1;
        metrics::set_workers_busy(busy);
    }

    debug!(worker, "Worker stopped");
}
