//! Log-only sink.

use async_trait::async_trait;
use nexus_models::{CameraEvent, CameraId, InferenceResult, JobId};
use tracing::info;

use crate::error::SinkResult;
use crate::sink::ResultSink;

/// Writes every result and event as a structured log line and keeps nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl ResultSink for TracingSink {
    async fn store(&self, job_id: &JobId, result: &InferenceResult) -> SinkResult<()> {
        let labels: Vec<&str> = result.detections.iter().map(|d| d.label.as_str()).collect();
        info!(
            job_id = %job_id,
            model_id = %result.model_id,
            camera_id = result.camera_id.as_ref().map(|c| c.as_str()),
            detections = result.detections.len(),
            duration_ms = result.processing_duration.as_millis() as u64,
            labels = ?labels,
            "Inference result"
        );
        Ok(())
    }

    async fn emit(&self, camera_id: &CameraId, event: CameraEvent) -> SinkResult<()> {
        let payload = serde_json::to_string(&event)?;
        info!(
            camera_id = %camera_id,
            event = event.kind(),
            payload = %payload,
            "Camera event"
        );
        Ok(())
    }
}
