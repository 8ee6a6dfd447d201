//! Camera stream metrics.

use metrics::{counter, gauge};
use nexus_models::{CameraId, CameraState};

/// Metric name constants for consistency.
pub mod names {
    /// Frames pulled from cameras.
    pub const FRAMES_RECEIVED_TOTAL: &str = "nexus_camera_frames_received_total";

    /// Frames accepted by the queue.
    pub const FRAMES_SUBMITTED_TOTAL: &str = "nexus_camera_frames_submitted_total";

    /// Frames dropped by admission control, by reason.
    pub const FRAMES_DROPPED_TOTAL: &str = "nexus_camera_frames_dropped_total";

    /// Frames skipped by the per-camera rate limiter.
    pub const FRAMES_SKIPPED_TOTAL: &str = "nexus_camera_frames_skipped_total";

    /// Failed connection attempts and stream drops.
    pub const CONNECTION_FAILURES_TOTAL: &str = "nexus_camera_connection_failures_total";

    /// Cameras currently in each state.
    pub const CAMERAS_BY_STATE: &str = "nexus_cameras";
}

pub fn record_frame_received(camera_id: &CameraId) {
    counter!(names::FRAMES_RECEIVED_TOTAL, "camera" => camera_id.to_string()).increment(1);
}

pub fn record_frame_submitted(camera_id: &CameraId) {
    counter!(names::FRAMES_SUBMITTED_TOTAL, "camera" => camera_id.to_string()).increment(1);
}

pub fn record_frame_dropped(camera_id: &CameraId, reason: &'static str) {
    counter!(
        names::FRAMES_DROPPED_TOTAL,
        "camera" => camera_id.to_string(),
        "reason" => reason
    )
    .increment(1);
}

pub fn record_frame_skipped(camera_id: &CameraId) {
    counter!(names::FRAMES_SKIPPED_TOTAL, "camera" => camera_id.to_string()).increment(1);
}

pub fn record_connection_failure(camera_id: &CameraId) {
    counter!(names::CONNECTION_FAILURES_TOTAL, "camera" => camera_id.to_string()).increment(1);
}

/// A session appeared (`delta` 1.0) or went away (-1.0) in `state`.
pub fn record_session(state: CameraState, delta: f64) {
    gauge!(names::CAMERAS_BY_STATE, "state" => state.as_str()).increment(delta);
}

/// Move one camera from `from` to `to` in the per-state gauge.
pub fn record_transition(from: CameraState, to: CameraState) {
    gauge!(names::CAMERAS_BY_STATE, "state" => from.as_str()).decrement(1.0);
    gauge!(names::CAMERAS_BY_STATE, "state" => to.as_str()).increment(1.0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names() {
        assert!(names::FRAMES_DROPPED_TOTAL.starts_with("nexus_camera_"));
        assert!(names::FRAMES_SKIPPED_TOTAL.ends_with("_total"));
    }
}
