//! Shared data models for the Nexus inference engine.
//!
//! This crate provides Serde-serializable types for:
//! - Inference requests and their priorities
//! - Job snapshots and lifecycle states
//! - Detections and inference results
//! - Camera sessions and camera events

pub mod camera;
pub mod detection;
pub mod job;
pub mod request;

// Re-export common types
pub use camera::{CameraEvent, CameraId, CameraSession, CameraState};
pub use detection::{BoundingBox, Detection, InferenceResult};
pub use job::{InferenceJob, JobError, JobId, JobOutcome, JobState};
pub use request::{ImagePayload, InferenceRequest, InferenceTask, Priority, RequestSource};
