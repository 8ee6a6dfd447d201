//! Inference worker pool.
//!
//! This crate provides:
//! - A fixed pool of tokio workers draining the priority queue
//! - Per-job timeouts bounded by the request deadline
//! - Panic isolation: a panicking job fails, its worker keeps going
//! - Cooperative cancellation of running jobs
//! - Result delivery to the sink and camera detection events
//! - Structured job logging and Prometheus metrics

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod pool;
mod process;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use logging::JobLogger;
pub use pool::{WorkerPool, WorkerStats};
