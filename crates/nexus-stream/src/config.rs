//! Stream manager and camera configuration.

use std::path::Path;
use std::time::Duration;

use nexus_models::{CameraId, InferenceTask, Priority};
use serde::{Deserialize, Serialize};

use crate::error::{StreamError, StreamResult};

/// Stream manager configuration, shared by every session.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// First reconnect delay
    pub backoff_base: Duration,
    /// Reconnect delay cap
    pub backoff_max: Duration,
    /// Fraction of each delay that may be shaved off at random (0.0 to 0.5)
    pub backoff_jitter: f64,
    /// Streaming time after which the retry count resets
    pub stable_window: Duration,
    /// Max wait for a frame while streaming before treating the stream as dead
    pub frame_timeout: Duration,
    /// Max wait for a connection attempt
    pub connect_timeout: Duration,
    /// How long `stop_camera` waits for the session task to exit
    pub stop_timeout: Duration,
    /// Budget for each sink event
    pub event_timeout: Duration,
    /// Maximum number of registered cameras
    pub max_cameras: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
            backoff_jitter: 0.2,
            stable_window: Duration::from_secs(30),
            frame_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            stop_timeout: Duration::from_secs(5),
            event_timeout: Duration::from_secs(2),
            max_cameras: 100,
        }
    }
}

impl StreamConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        fn millis(key: &str, default: u64) -> Duration {
            Duration::from_millis(
                std::env::var(key)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(default),
            )
        }

        Self {
            backoff_base: millis("STREAM_BACKOFF_BASE_MS", 1_000),
            backoff_max: millis("STREAM_BACKOFF_MAX_MS", 30_000),
            backoff_jitter: std::env::var("STREAM_BACKOFF_JITTER")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0.2),
            stable_window: Duration::from_secs(
                std::env::var("STREAM_STABLE_WINDOW_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            frame_timeout: millis("STREAM_FRAME_TIMEOUT_MS", 10_000),
            connect_timeout: millis("STREAM_CONNECT_TIMEOUT_MS", 10_000),
            stop_timeout: millis("STREAM_STOP_TIMEOUT_MS", 5_000),
            event_timeout: millis("STREAM_EVENT_TIMEOUT_MS", 2_000),
            max_cameras: std::env::var("STREAM_MAX_CAMERAS")
                .or_else(|_| std::env::var("MAX_CAMERAS"))
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(100),
        }
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration, jitter: f64) -> Self {
        self.backoff_base = base;
        self.backoff_max = max;
        self.backoff_jitter = jitter;
        self
    }

    pub fn with_stable_window(mut self, window: Duration) -> Self {
        self.stable_window = window;
        self
    }

    pub fn with_frame_timeout(mut self, timeout: Duration) -> Self {
        self.frame_timeout = timeout;
        self
    }

    pub fn with_max_cameras(mut self, max: usize) -> Self {
        self.max_cameras = max;
        self
    }
}

/// Frame differencing settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionConfig {
    /// Luma difference above which a pixel counts as changed
    #[serde(default = "default_pixel_threshold")]
    pub pixel_threshold: u8,
    /// Changed pixels above which a frame counts as motion
    #[serde(default = "default_min_changed_pixels")]
    pub min_changed_pixels: u64,
}

fn default_pixel_threshold() -> u8 {
    30
}

fn default_min_changed_pixels() -> u64 {
    5000
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            pixel_threshold: default_pixel_threshold(),
            min_changed_pixels: default_min_changed_pixels(),
        }
    }
}

fn default_camera_priority() -> Priority {
    Priority::LOW
}

fn default_max_fps() -> Option<f64> {
    Some(5.0)
}

fn default_enabled() -> bool {
    true
}

/// One configured camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    pub id: CameraId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Stream URL; the scheme picks the frame source
    pub url: String,
    /// Model run on every submitted frame
    pub model_id: String,
    #[serde(default)]
    pub task: InferenceTask,
    #[serde(default = "default_camera_priority")]
    pub priority: Priority,
    /// Max frames submitted per second; `null` disables the limiter
    #[serde(default = "default_max_fps")]
    pub max_fps: Option<f64>,
    /// Motion detection, off when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub motion: Option<MotionConfig>,
    /// Disabled cameras are registered but not started at boot
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl CameraConfig {
    pub fn new(
        id: impl Into<CameraId>,
        url: impl Into<String>,
        model_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: None,
            url: url.into(),
            model_id: model_id.into(),
            task: InferenceTask::default(),
            priority: default_camera_priority(),
            max_fps: default_max_fps(),
            motion: None,
            enabled: true,
        }
    }

    pub fn with_max_fps(mut self, max_fps: Option<f64>) -> Self {
        self.max_fps = max_fps;
        self
    }

    pub fn with_motion(mut self, motion: MotionConfig) -> Self {
        self.motion = Some(motion);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Check fields that do not depend on the source implementation.
    pub fn validate(&self) -> StreamResult<()> {
        if self.id.as_str().is_empty() {
            return Err(StreamError::invalid_config("camera id is empty"));
        }
        if self.model_id.is_empty() {
            return Err(StreamError::invalid_config(format!(
                "camera {} has no model_id",
                self.id
            )));
        }
        if let Some(fps) = self.max_fps {
            if !(fps.is_finite() && fps > 0.0) {
                return Err(StreamError::invalid_config(format!(
                    "camera {} max_fps must be positive, got {}",
                    self.id, fps
                )));
            }
        }
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CameraFile {
    List(Vec<CameraConfig>),
    Wrapped { cameras: Vec<CameraConfig> },
}

/// Parse a camera list: either a JSON array or `{"cameras": [...]}`.
pub fn parse_cameras(json: &str) -> StreamResult<Vec<CameraConfig>> {
    let cameras = match serde_json::from_str(json)? {
        CameraFile::List(cameras) => cameras,
        CameraFile::Wrapped { cameras } => cameras,
    };
    for camera in &cameras {
        camera.validate()?;
    }
    Ok(cameras)
}

/// Load the camera list from a JSON file.
pub async fn load_cameras(path: impl AsRef<Path>) -> StreamResult<Vec<CameraConfig>> {
    let json = tokio::fs::read_to_string(path).await?;
    parse_cameras(&json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = StreamConfig::default();
        assert_eq!(config.backoff_base, Duration::from_secs(1));
        assert_eq!(config.backoff_max, Duration::from_secs(30));
        assert_eq!(config.max_cameras, 100);
    }

    #[test]
    fn test_parse_camera_defaults() {
        let cameras = parse_cameras(
            r#"[{"id": "lobby", "url": "stub://lobby", "model_id": "yolov8n"}]"#,
        )
        .unwrap();
        let cam = &cameras[0];
        assert_eq!(cam.priority, Priority::LOW);
        assert_eq!(cam.max_fps, Some(5.0));
        assert!(cam.motion.is_none());
        assert!(cam.enabled);
    }

    #[test]
    fn test_parse_wrapped_with_motion_and_unlimited_fps() {
        let cameras = parse_cameras(
            r#"{"cameras": [{
                "id": "dock", "url": "http://10.0.0.5/snapshot.jpg", "model_id": "yolov8n",
                "max_fps": null, "motion": {"min_changed_pixels": 100}, "enabled": false
            }]}"#,
        )
        .unwrap();
        let cam = &cameras[0];
        assert_eq!(cam.max_fps, None);
        assert_eq!(cam.motion.unwrap().pixel_threshold, 30);
        assert_eq!(cam.motion.unwrap().min_changed_pixels, 100);
        assert!(!cam.enabled);
    }

    #[test]
    fn test_validate_rejects_bad_fps() {
        let cam = CameraConfig::new("cam", "stub://cam", "m").with_max_fps(Some(0.0));
        assert!(matches!(cam.validate(), Err(StreamError::InvalidConfig(_))));
        let cam = CameraConfig::new("cam", "stub://cam", "");
        assert!(cam.validate().is_err());
    }
}
