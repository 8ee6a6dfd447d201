#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use nexus_executor::{ExecutorError, ExecutorResult, ModelExecutor};
use nexus_models::{BoundingBox, Detection, ImagePayload, InferenceTask};
use nexus_queue::QueueConfig;
use nexus_scheduler::{
    CameraSession, CameraState, InferenceRequest, JobId, JobState, MemorySink, Priority,
    Scheduler, SchedulerConfig,
};
use nexus_worker::WorkerConfig;

/// Executor whose behaviour is picked by model id:
/// `panic` panics, `fail` errors, `slow` takes 50ms, anything else takes the
/// configured latency. Jobs are identified by their image reference.
pub struct ScriptedExecutor {
    latency: Duration,
    interruptible: bool,
    order: Mutex<Vec<String>>,
    in_flight: Mutex<HashSet<String>>,
    executions: Mutex<HashMap<String, u32>>,
    overlaps: AtomicU64,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            interruptible: true,
            order: Mutex::new(Vec::new()),
            in_flight: Mutex::new(HashSet::new()),
            executions: Mutex::new(HashMap::new()),
            overlaps: AtomicU64::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    pub fn non_interruptible(mut self) -> Self {
        self.interruptible = false;
        self
    }

    /// Jobs in the order execution started.
    pub fn order(&self) -> Vec<String> {
        self.order.lock().unwrap().clone()
    }

    pub fn executions(&self, tag: &str) -> u32 {
        self.executions.lock().unwrap().get(tag).copied().unwrap_or(0)
    }

    pub fn all_executions(&self) -> HashMap<String, u32> {
        self.executions.lock().unwrap().clone()
    }

    /// Times a job started while the same job was already executing.
    pub fn overlaps(&self) -> u64 {
        self.overlaps.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

struct ActiveGuard<'a> {
    executor: &'a ScriptedExecutor,
    tag: String,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.executor.active.fetch_sub(1, Ordering::SeqCst);
        self.executor
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.tag);
    }
}

#[async_trait]
impl ModelExecutor for ScriptedExecutor {
    fn name(&self) -> &str {
        "scripted"
    }

    fn supports_interruption(&self) -> bool {
        self.interruptible
    }

    async fn run(
        &self,
        image: &ImagePayload,
        model_id: &str,
        _task: InferenceTask,
        _timeout: Duration,
    ) -> ExecutorResult<Vec<Detection>> {
        let tag = match image {
            ImagePayload::Reference(key) => key.clone(),
            ImagePayload::Inline(_) => "inline".to_string(),
        };
        self.order.lock().unwrap().push(tag.clone());
        *self.executions.lock().unwrap().entry(tag.clone()).or_default() += 1;
        if !self.in_flight.lock().unwrap().insert(tag.clone()) && tag != "inline" {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        let _guard = ActiveGuard {
            executor: self,
            tag,
        };

        match model_id {
            "panic" => panic!("model crashed"),
            "fail" => return Err(ExecutorError::request_failed("model not loaded")),
            "slow" => tokio::time::sleep(Duration::from_millis(50)).await,
            _ => tokio::time::sleep(self.latency).await,
        }

        Ok(vec![Detection::new(
            0,
            "person",
            0.9,
            BoundingBox::new(0.0, 0.0, 10.0, 10.0),
        )])
    }
}

pub fn config(pool_size: usize, capacity: usize) -> SchedulerConfig {
    SchedulerConfig::default()
        .with_queue(QueueConfig::default().with_capacity(capacity))
        .with_worker(
            WorkerConfig::default()
                .with_pool_size(pool_size)
                .with_job_timeout(Duration::from_secs(5)),
        )
}

pub fn build(
    config: SchedulerConfig,
    executor: Arc<dyn ModelExecutor>,
) -> (Scheduler, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::default());
    let scheduler = Scheduler::builder(config)
        .with_executor(executor)
        .with_sink(sink.clone())
        .build()
        .unwrap();
    (scheduler, sink)
}

/// API request for the default model, tagged through its image reference.
pub fn job(tag: &str, priority: i32) -> InferenceRequest {
    InferenceRequest::api("yolov8n", ImagePayload::reference(tag)).with_priority(Priority(priority))
}

pub fn model_job(model: &str, tag: &str) -> InferenceRequest {
    InferenceRequest::api(model, ImagePayload::reference(tag))
}

/// Poll until every job is terminal.
pub async fn settle(scheduler: &Scheduler, ids: &[JobId]) -> Vec<JobState> {
    for _ in 0..100_000 {
        let states: Vec<JobState> = ids
            .iter()
            .map(|id| scheduler.get_status(id).unwrap().state)
            .collect();
        if states.iter().all(JobState::is_terminal) {
            return states;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("jobs never settled");
}

/// Poll until the camera reaches `state`.
pub async fn camera_in(scheduler: &Scheduler, camera: &str, state: CameraState) -> CameraSession {
    let id = camera.into();
    for _ in 0..100_000 {
        let snapshot = scheduler.camera_status(&id).unwrap();
        if snapshot.state == state {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("camera {} never reached {:?}", camera, state);
}
