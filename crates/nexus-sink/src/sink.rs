//! The sink contract.

use async_trait::async_trait;
use nexus_models::{CameraEvent, CameraId, InferenceResult, JobId};

use crate::error::SinkResult;

/// Destination for completed results and camera events.
///
/// Called concurrently from every worker and camera session. A failing sink
/// never changes a job's state; callers log and count the error.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Persist the result of a completed job.
    async fn store(&self, job_id: &JobId, result: &InferenceResult) -> SinkResult<()>;

    /// Publish an event derived from camera activity.
    async fn emit(&self, camera_id: &CameraId, event: CameraEvent) -> SinkResult<()>;
}
