//! Admission-controlled priority queue for inference jobs.
//!
//! This crate provides:
//! - Bounded admission with per-camera in-flight limits
//! - Priority-then-FIFO ordering with cooperative blocking dequeue
//! - Cancellation of queued jobs and cancel flags for running ones
//! - A job table answering status queries and per-job completion waiters

pub mod config;
pub mod error;
pub mod job;
pub mod queue;
pub mod stats;

pub use config::QueueConfig;
pub use error::{AdmissionError, AdmissionResult};
pub use job::{DequeuedJob, JobWaiter, Settled, WaitResult};
pub use queue::PriorityQueue;
pub use stats::{PriorityCount, QueueStats, QueueTotals};
