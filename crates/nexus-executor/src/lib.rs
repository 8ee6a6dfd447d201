//! Model executors for the inference engine.
//!
//! This crate provides:
//! - The `ModelExecutor` contract the worker pool runs jobs through
//! - `RemoteExecutor`, an HTTP client for an external model server
//! - `FixedExecutor`, a canned-response backend for dry runs and load tests
//! - `ExecutorBackend`, the configured choice between the two
//! - `ModelRegistry`, routing model ids to backends

pub mod backend;
pub mod error;
pub mod executor;
pub mod fixed;
pub mod registry;
pub mod remote;

pub use backend::{ExecutorBackend, ExecutorConfig, ExecutorKind};
pub use error::{ExecutorError, ExecutorResult};
pub use executor::ModelExecutor;
pub use fixed::FixedExecutor;
pub use registry::ModelRegistry;
pub use remote::{RemoteExecutor, RemoteExecutorConfig};
