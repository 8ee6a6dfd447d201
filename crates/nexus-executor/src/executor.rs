//! The executor contract.

use std::time::Duration;

use async_trait::async_trait;
use nexus_models::{Detection, ImagePayload, InferenceTask};

use crate::error::ExecutorResult;

/// Runs one model on one image.
///
/// Implementations are shared by every worker and must be safe for
/// concurrent calls.
#[async_trait]
pub trait ModelExecutor: Send + Sync {
    /// Backend name for logs and metrics.
    fn name(&self) -> &str;

    /// Whether dropping an in-flight `run` future actually stops the work.
    ///
    /// When `false`, a cancelled job is left to finish and its result is
    /// discarded.
    fn supports_interruption(&self) -> bool {
        true
    }

    /// Run `model_id` on `image`. `timeout` is the budget the caller will
    /// enforce; backends may pass it on to the model server.
    async fn run(
        &self,
        image: &ImagePayload,
        model_id: &str,
        task: InferenceTask,
        timeout: Duration,
    ) -> ExecutorResult<Vec<Detection>>;
}
