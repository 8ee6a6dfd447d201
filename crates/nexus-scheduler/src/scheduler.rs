//! The scheduler: one priority queue feeding one worker pool, shared by API
//! submissions and camera frames.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nexus_executor::{ExecutorBackend, ModelExecutor};
use nexus_models::{CameraId, CameraSession, InferenceJob, InferenceRequest, InferenceResult, JobId};
use nexus_queue::{PriorityQueue, QueueStats};
use nexus_sink::{ResultSink, TracingSink};
use nexus_stream::{
    load_cameras, CameraConfig, CameraStats, Frame, FrameSourceFactory, FrameSubmitter,
    SourceFactory, StreamManager,
};
use nexus_worker::{WorkerPool, WorkerStats};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::error::{SchedulerError, SchedulerResult};

/// Everything a monitoring collaborator needs in one snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    pub queue: QueueStats,
    pub workers: WorkerStats,
    pub cameras: Vec<CameraStats>,
}

/// Builds a [`Scheduler`]. Components left unset come from the config:
/// the executor from `config.executor`, a [`TracingSink`], and the
/// scheme-based [`SourceFactory`].
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    executor: Option<Arc<dyn ModelExecutor>>,
    sink: Option<Arc<dyn ResultSink>>,
    source_factory: Option<Arc<dyn FrameSourceFactory>>,
}

impl SchedulerBuilder {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            executor: None,
            sink: None,
            source_factory: None,
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn ModelExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_source_factory(mut self, factory: Arc<dyn FrameSourceFactory>) -> Self {
        self.source_factory = Some(factory);
        self
    }

    /// Wire the components and start the workers.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> SchedulerResult<Scheduler> {
        let config = self.config;
        config.validate()?;

        let executor: Arc<dyn ModelExecutor> = match self.executor {
            Some(executor) => executor,
            None => Arc::new(ExecutorBackend::from_config(&config.executor)?),
        };
        let sink: Arc<dyn ResultSink> = match self.sink {
            Some(sink) => sink,
            None => Arc::new(TracingSink),
        };
        let source_factory: Arc<dyn FrameSourceFactory> = match self.source_factory {
            Some(factory) => factory,
            None => Arc::new(SourceFactory::new()?),
        };

        let queue = Arc::new(PriorityQueue::new(config.queue.clone()));
        let pool = WorkerPool::start(
            config.worker.clone(),
            Arc::clone(&queue),
            Arc::clone(&executor),
            Arc::clone(&sink),
        )?;
        let submitter: Arc<dyn FrameSubmitter> = queue.clone();
        let streams = StreamManager::new(
            config.stream.clone(),
            source_factory,
            submitter,
            Arc::clone(&sink),
        );

        info!(
            "Scheduler ready (executor: {}, workers: {}, queue capacity: {})",
            executor.name(),
            pool.size(),
            config.queue.capacity
        );

        Ok(Scheduler {
            queue,
            pool,
            streams,
            sink,
            shut_down: AtomicBool::new(false),
        })
    }
}

/// Composition root of the engine.
///
/// Admission errors are returned synchronously and never create a job.
/// Execution failures are recorded on the job and surface through
/// [`Scheduler::get_status`] or [`Scheduler::submit_sync`]. Camera connection
/// failures never leave the stream manager.
pub struct Scheduler {
    queue: Arc<PriorityQueue>,
    pool: WorkerPool,
    streams: StreamManager,
    sink: Arc<dyn ResultSink>,
    shut_down: AtomicBool,
}

impl Scheduler {
    pub fn builder(config: SchedulerConfig) -> SchedulerBuilder {
        SchedulerBuilder::new(config)
    }

    /// Build everything from environment variables.
    pub fn from_env() -> SchedulerResult<Self> {
        SchedulerBuilder::new(SchedulerConfig::from_env()?).build()
    }

    // ------------------------------------------------------------------
    // Jobs
    // ------------------------------------------------------------------

    /// Queue a request and return its job id without waiting.
    pub fn submit_async(&self, request: InferenceRequest) -> SchedulerResult<JobId> {
        let job_id = self.queue.submit(request)?;
        debug!(job_id = %job_id, "Job submitted");
        Ok(job_id)
    }

    /// Queue a request and wait up to `timeout` for its result.
    ///
    /// If the wait expires while the job is still queued, the job is
    /// cancelled. A job already running keeps running and its outcome stays
    /// visible through [`Scheduler::get_status`].
    pub async fn submit_sync(
        &self,
        request: InferenceRequest,
        timeout: Duration,
    ) -> SchedulerResult<InferenceResult> {
        let (job_id, waiter) = self.queue.submit_with_waiter(request)?;
        debug!(job_id = %job_id, timeout_ms = timeout.as_millis() as u64, "Job submitted, waiting");

        match tokio::time::timeout(timeout, waiter.wait()).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Err(SchedulerError::from_job(job_id, e)),
            Err(_) => {
                let cancelled = self.queue.cancel_if_queued(&job_id);
                info!(
                    job_id = %job_id,
                    cancelled,
                    "Gave up waiting for job after {:?}", timeout
                );
                Err(SchedulerError::Timeout {
                    job_id,
                    timeout,
                    cancelled,
                })
            }
        }
    }

    pub fn get_status(&self, job_id: &JobId) -> SchedulerResult<InferenceJob> {
        self.queue
            .status(job_id)
            .ok_or_else(|| SchedulerError::JobNotFound(job_id.clone()))
    }

    /// Cancel a job. Returns `true` only if it was still queued.
    ///
    /// A running job gets its cancel flag raised instead: an interruptible
    /// executor stops early, otherwise the job finishes and its result is
    /// discarded. Either way it ends `Cancelled`.
    pub fn cancel(&self, job_id: &JobId) -> bool {
        let cancelled = self.queue.cancel(job_id);
        debug!(job_id = %job_id, cancelled, "Cancel requested");
        cancelled
    }

    /// Wait for a job submitted with [`Scheduler::submit_async`].
    pub async fn wait(&self, job_id: &JobId) -> SchedulerResult<InferenceResult> {
        let waiter = self
            .queue
            .subscribe(job_id)
            .ok_or_else(|| SchedulerError::JobNotFound(job_id.clone()))?;
        waiter
            .wait()
            .await
            .map_err(|e| SchedulerError::from_job(job_id.clone(), e))
    }

    // ------------------------------------------------------------------
    // Cameras
    // ------------------------------------------------------------------

    pub fn register_camera(&self, camera: CameraConfig) -> SchedulerResult<()> {
        Ok(self.streams.register_camera(camera)?)
    }

    /// Register every camera in a JSON file. Returns how many were added.
    pub async fn load_cameras(&self, path: impl AsRef<Path>) -> SchedulerResult<usize> {
        let path = path.as_ref();
        let cameras = load_cameras(path).await?;
        let mut added = 0;
        for camera in cameras {
            let camera_id = camera.id.clone();
            match self.streams.register_camera(camera) {
                Ok(()) => added += 1,
                Err(e) => warn!(camera_id = %camera_id, "Skipping camera: {}", e),
            }
        }
        info!("Loaded {} cameras from {}", added, path.display());
        Ok(added)
    }

    pub async fn remove_camera(&self, camera_id: &CameraId) -> SchedulerResult<CameraConfig> {
        Ok(self.streams.remove_camera(camera_id).await?)
    }

    pub fn list_cameras(&self) -> Vec<CameraConfig> {
        self.streams.list()
    }

    pub fn start_camera(&self, camera_id: &CameraId) -> SchedulerResult<()> {
        Ok(self.streams.start_camera(camera_id)?)
    }

    /// Start every registered camera marked enabled.
    pub fn start_enabled_cameras(&self) -> usize {
        self.streams.start_enabled()
    }

    pub async fn stop_camera(&self, camera_id: &CameraId) -> SchedulerResult<()> {
        Ok(self.streams.stop_camera(camera_id).await?)
    }

    pub fn camera_status(&self, camera_id: &CameraId) -> SchedulerResult<CameraSession> {
        Ok(self.streams.status(camera_id)?)
    }

    pub fn latest_frame(&self, camera_id: &CameraId) -> Option<Frame> {
        self.streams.latest_frame(camera_id)
    }

    // ------------------------------------------------------------------
    // Observability and lifecycle
    // ------------------------------------------------------------------

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            queue: self.queue.stats(),
            workers: self.pool.stats(),
            cameras: self.streams.stats(),
        }
    }

    pub fn queue(&self) -> &Arc<PriorityQueue> {
        &self.queue
    }

    pub fn sink(&self) -> &Arc<dyn ResultSink> {
        &self.sink
    }

    pub fn streams(&self) -> &StreamManager {
        &self.streams
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Stop cameras, cancel queued jobs and drain the worker pool.
    pub async fn shutdown(&self) -> SchedulerResult<()> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Shutting down scheduler");
        self.streams.stop_all().await;
        self.pool.shutdown_default().await?;
        info!("Scheduler shutdown complete");
        Ok(())
    }
}
