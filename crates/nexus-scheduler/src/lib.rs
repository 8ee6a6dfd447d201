//! Inference scheduling engine.
//!
//! This crate provides:
//! - `Scheduler`, the composition root wiring the priority queue, the worker
//!   pool, the camera stream manager, the model executor and the result sink
//! - Synchronous (`submit_sync`) and asynchronous (`submit_async`) submission
//! - Job status, cancellation and camera lifecycle passthrough
//! - `SchedulerConfig` assembled from the environment
//!
//! Cancellation of a running job is best-effort: interruptible executors are
//! stopped at their next await point, other jobs run to completion and their
//! result is discarded without reaching the sink.

pub mod config;
pub mod error;
pub mod scheduler;

pub use config::SchedulerConfig;
pub use error::{SchedulerError, SchedulerResult};
pub use scheduler::{Scheduler, SchedulerBuilder, SchedulerStats};

pub use nexus_executor::{ExecutorBackend, ExecutorKind, FixedExecutor, ModelExecutor};
pub use nexus_models::{
    CameraId, CameraSession, CameraState, ImagePayload, InferenceJob, InferenceRequest,
    InferenceResult, JobId, JobState, Priority,
};
pub use nexus_sink::{MemorySink, ResultSink, TracingSink};
pub use nexus_stream::{CameraConfig, CameraStats};
