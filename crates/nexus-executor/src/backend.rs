//! Executor backend selection.
//!
//! The backend is chosen once, from configuration, and then used through the
//! `ModelExecutor` trait.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use nexus_models::{Detection, ImagePayload, InferenceTask};
use tracing::info;

use crate::error::{ExecutorError, ExecutorResult};
use crate::executor::ModelExecutor;
use crate::fixed::FixedExecutor;
use crate::remote::{RemoteExecutor, RemoteExecutorConfig};

/// Which backend to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutorKind {
    #[default]
    Remote,
    Fixed,
}

impl ExecutorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutorKind::Remote => "remote",
            ExecutorKind::Fixed => "fixed",
        }
    }
}

impl FromStr for ExecutorKind {
    type Err = ExecutorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "remote" | "http" => Ok(ExecutorKind::Remote),
            "fixed" | "stub" => Ok(ExecutorKind::Fixed),
            other => Err(ExecutorError::Config(format!(
                "unknown executor kind '{}' (expected 'remote' or 'fixed')",
                other
            ))),
        }
    }
}

/// Executor configuration.
#[derive(Debug, Clone, Default)]
pub struct ExecutorConfig {
    pub kind: ExecutorKind,
    pub remote: RemoteExecutorConfig,
    /// Simulated latency for the fixed backend
    pub fixed_latency: Duration,
}

impl ExecutorConfig {
    /// Create config from environment variables.
    pub fn from_env() -> ExecutorResult<Self> {
        let kind = match std::env::var("EXECUTOR_KIND") {
            Ok(value) => value.parse()?,
            Err(_) => ExecutorKind::default(),
        };
        Ok(Self {
            kind,
            remote: RemoteExecutorConfig::from_env(),
            fixed_latency: Duration::from_millis(
                std::env::var("EXECUTOR_FIXED_LATENCY_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0),
            ),
        })
    }
}

/// The configured executor.
pub enum ExecutorBackend {
    Remote(RemoteExecutor),
    Fixed(FixedExecutor),
}

impl ExecutorBackend {
    /// Build the backend named by `config.kind`.
    pub fn from_config(config: &ExecutorConfig) -> ExecutorResult<Self> {
        let backend = match config.kind {
            ExecutorKind::Remote => Self::Remote(RemoteExecutor::new(config.remote.clone())?),
            ExecutorKind::Fixed => {
                Self::Fixed(FixedExecutor::single_object().with_latency(config.fixed_latency))
            }
        };
        info!("Using {} executor backend", config.kind.as_str());
        Ok(backend)
    }

    pub fn kind(&self) -> ExecutorKind {
        match self {
            ExecutorBackend::Remote(_) => ExecutorKind::Remote,
            ExecutorBackend::Fixed(_) => ExecutorKind::Fixed,
        }
    }
}

#[async_trait]
impl ModelExecutor for ExecutorBackend {
    fn name(&self) -> &str {
        match self {
            ExecutorBackend::Remote(e) => e.name(),
            ExecutorBackend::Fixed(e) => e.name(),
        }
    }

    fn supports_interruption(&self) -> bool {
        match self {
            ExecutorBackend::Remote(e) => e.supports_interruption(),
            ExecutorBackend::Fixed(e) => e.supports_interruption(),
        }
    }

    async fn run(
        &self,
        image: &ImagePayload,
        model_id: &str,
        task: InferenceTask,
        timeout: Duration,
    ) -> ExecutorResult<Vec<Detection>> {
        match self {
            ExecutorBackend::Remote(e) => e.run(image, model_id, task, timeout).await,
            ExecutorBackend::Fixed(e) => e.run(image, model_id, task, timeout).await,
        }
    }
}
