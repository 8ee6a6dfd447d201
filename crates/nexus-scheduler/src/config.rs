//! Scheduler configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use nexus_executor::ExecutorConfig;
use nexus_queue::QueueConfig;
use nexus_stream::StreamConfig;
use nexus_worker::WorkerConfig;

use crate::error::{SchedulerError, SchedulerResult};

/// Configuration for every component the scheduler wires together.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub queue: QueueConfig,
    pub worker: WorkerConfig,
    pub stream: StreamConfig,
    pub executor: ExecutorConfig,
    /// JSON camera list registered at startup
    pub cameras_file: Option<PathBuf>,
    /// Prometheus exporter listen address; no exporter when unset
    pub metrics_addr: Option<SocketAddr>,
    /// Interval between periodic stats log lines; zero disables them
    pub stats_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            worker: WorkerConfig::default(),
            stream: StreamConfig::default(),
            executor: ExecutorConfig::default(),
            cameras_file: None,
            metrics_addr: None,
            stats_interval: Duration::from_secs(60),
        }
    }
}

impl SchedulerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> SchedulerResult<Self> {
        let metrics_addr = match std::env::var("METRICS_ADDR") {
            Ok(addr) if !addr.is_empty() => Some(addr.parse().map_err(|e| {
                SchedulerError::config(format!("invalid METRICS_ADDR '{}': {}", addr, e))
            })?),
            _ => None,
        };

        let config = Self {
            queue: QueueConfig::from_env(),
            worker: WorkerConfig::from_env(),
            stream: StreamConfig::from_env(),
            executor: ExecutorConfig::from_env()?,
            cameras_file: std::env::var("CAMERAS_FILE")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            metrics_addr,
            stats_interval: Duration::from_secs(
                std::env::var("STATS_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            ),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    pub fn with_worker(mut self, worker: WorkerConfig) -> Self {
        self.worker = worker;
        self
    }

    pub fn with_stream(mut self, stream: StreamConfig) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_executor(mut self, executor: ExecutorConfig) -> Self {
        self.executor = executor;
        self
    }

    /// Reject settings that would leave the engine unable to run jobs.
    pub fn validate(&self) -> SchedulerResult<()> {
        if self.worker.pool_size == 0 {
            return Err(SchedulerError::config("WORKER_POOL_SIZE must be at least 1"));
        }
        if self.queue.capacity == 0 {
            return Err(SchedulerError::config("QUEUE_CAPACITY must be at least 1"));
        }
        if self.worker.job_timeout.is_zero() {
            return Err(SchedulerError::config("WORKER_JOB_TIMEOUT_MS must be positive"));
        }
        Ok(())
    }
}
