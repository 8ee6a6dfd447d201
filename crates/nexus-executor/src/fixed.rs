//! Canned-response backend.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use nexus_models::{BoundingBox, Detection, ImagePayload, InferenceTask};

use crate::error::{ExecutorError, ExecutorResult};
use crate::executor::ModelExecutor;

/// Returns the same detections for every image after an optional latency.
///
/// Used for dry runs and load tests where no model server is available.
#[derive(Debug, Default)]
pub struct FixedExecutor {
    detections: Vec<Detection>,
    latency: Duration,
    calls: AtomicU64,
}

impl FixedExecutor {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self {
            detections,
            latency: Duration::ZERO,
            calls: AtomicU64::new(0),
        }
    }

    /// A single full-frame "object" detection.
    pub fn single_object() -> Self {
        Self::new(vec![Detection::new(
            0,
            "object",
            1.0,
            BoundingBox::new(0.0, 0.0, 1.0, 1.0),
        )])
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Number of `run` calls so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ModelExecutor for FixedExecutor {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn run(
        &self,
        image: &ImagePayload,
        _model_id: &str,
        _task: InferenceTask,
        _timeout: Duration,
    ) -> ExecutorResult<Vec<Detection>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if image.is_empty() {
            return Err(ExecutorError::invalid_image("empty image payload"));
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(self.detections.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_returns_configured_detections_after_latency() {
        let executor = FixedExecutor::single_object().with_latency(Duration::from_millis(200));
        let started = tokio::time::Instant::now();
        let detections = executor
            .run(
                &ImagePayload::inline(vec![1u8]),
                "any",
                InferenceTask::Detect,
                Duration::from_secs(1),
            )
            .await
            .unwrap();

        assert_eq!(detections.len(), 1);
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert_eq!(executor.calls(), 1);
    }

    #[tokio::test]
    async fn test_rejects_empty_image() {
        let executor = FixedExecutor::default();
        let result = executor
            .run(
                &ImagePayload::reference(""),
                "any",
                InferenceTask::Detect,
                Duration::from_secs(1),
            )
            .await;
        assert!(matches!(result, Err(ExecutorError::InvalidImage(_))));
    }
}
