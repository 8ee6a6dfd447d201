//! Model id routing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nexus_models::{Detection, ImagePayload, InferenceTask};

use crate::error::{ExecutorError, ExecutorResult};
use crate::executor::ModelExecutor;

/// Maps model ids to the executors that serve them.
///
/// Built once at startup and shared by reference. Models without an explicit
/// route go to the fallback executor, if one is set.
#[derive(Default)]
pub struct ModelRegistry {
    routes: HashMap<String, Arc<dyn ModelExecutor>>,
    fallback: Option<Arc<dyn ModelExecutor>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry sending every model to one executor.
    pub fn with_fallback(executor: Arc<dyn ModelExecutor>) -> Self {
        Self {
            routes: HashMap::new(),
            fallback: Some(executor),
        }
    }

    /// Route `model_id` to `executor`, replacing any previous route.
    pub fn register(&mut self, model_id: impl Into<String>, executor: Arc<dyn ModelExecutor>) {
        self.routes.insert(model_id.into(), executor);
    }

    pub fn set_fallback(&mut self, executor: Arc<dyn ModelExecutor>) {
        self.fallback = Some(executor);
    }

    /// Executor serving `model_id`.
    pub fn get(&self, model_id: &str) -> ExecutorResult<&Arc<dyn ModelExecutor>> {
        self.routes
            .get(model_id)
            .or(self.fallback.as_ref())
            .ok_or_else(|| ExecutorError::ModelNotFound(model_id.to_string()))
    }

    /// Explicitly routed model ids.
    pub fn models(&self) -> Vec<String> {
        let mut models: Vec<String> = self.routes.keys().cloned().collect();
        models.sort();
        models
    }

    fn executors(&self) -> impl Iterator<Item = &Arc<dyn ModelExecutor>> {
        self.routes.values().chain(self.fallback.iter())
    }
}

#[async_trait]
impl ModelExecutor for ModelRegistry {
    fn name(&self) -> &str {
        "registry"
    }

    /// Interruptible only if every routed executor is.
    fn supports_interruption(&self) -> bool {
        self.executors().all(|e| e.supports_interruption())
    }

    async fn run(
        &self,
        image: &ImagePayload,
        model_id: &str,
        task: InferenceTask,
        timeout: Duration,
    ) -> ExecutorResult<Vec<Detection>> {
        self.get(model_id)?.run(image, model_id, task, timeout).await
    }
}
