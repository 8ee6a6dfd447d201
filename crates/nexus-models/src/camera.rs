//! Camera identifiers, session snapshots and camera events.

use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::job::JobId;

/// Identifier of a configured camera.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct CameraId(pub String);

impl CameraId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CameraId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CameraId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Connection state of a camera session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum CameraState {
    #[default]
    Disconnected,
    Connecting,
    Streaming,
    /// Waiting before the next connection attempt
    Backoff,
}

impl CameraState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CameraState::Disconnected => "disconnected",
            CameraState::Connecting => "connecting",
            CameraState::Streaming => "streaming",
            CameraState::Backoff => "backoff",
        }
    }

    /// Streaming is the only state in which frames flow.
    pub fn is_healthy(&self) -> bool {
        matches!(self, CameraState::Streaming)
    }
}

impl fmt::Display for CameraState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a camera session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CameraSession {
    pub camera_id: CameraId,
    /// Connection target (stream URL)
    pub target: String,
    pub state: CameraState,
    /// Consecutive failed attempts since the last sustained streaming period
    pub retry_count: u32,
    pub last_frame_at: Option<DateTime<Utc>>,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub frames_received: u64,
    pub frames_submitted: u64,
    /// Frames rejected by queue admission (backpressure)
    pub frames_dropped: u64,
    /// Frames skipped by the per-camera rate limiter
    pub frames_skipped: u64,
    pub reconnects: u64,
}

impl CameraSession {
    /// Snapshot for a camera that has no running session.
    pub fn disconnected(camera_id: CameraId, target: impl Into<String>) -> Self {
        Self {
            camera_id,
            target: target.into(),
            state: CameraState::Disconnected,
            retry_count: 0,
            last_frame_at: None,
            connected_at: None,
            last_error: None,
            frames_received: 0,
            frames_submitted: 0,
            frames_dropped: 0,
            frames_skipped: 0,
            reconnects: 0,
        }
    }
}

/// Events derived from camera activity, handed to the result sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CameraEvent {
    StateChanged {
        from: CameraState,
        to: CameraState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        at: DateTime<Utc>,
    },
    Motion {
        changed_pixels: u64,
        at: DateTime<Utc>,
    },
    Detections {
        job_id: JobId,
        count: usize,
        labels: Vec<String>,
        at: DateTime<Utc>,
    },
}

impl CameraEvent {
    pub fn state_changed(from: CameraState, to: CameraState, reason: Option<String>) -> Self {
        Self::StateChanged {
            from,
            to,
            reason,
            at: Utc::now(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CameraEvent::StateChanged { .. } => "state_changed",
            CameraEvent::Motion { .. } => "motion",
            CameraEvent::Detections { .. } => "detections",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_event_tagged_serialization() {
        let event = CameraEvent::Motion {
            changed_pixels: 42,
            at: Utc::now(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "motion");
        assert_eq!(value["changed_pixels"], 42);
    }

    #[test]
    fn test_disconnected_snapshot() {
        let snap = CameraSession::disconnected(CameraId::from("cam"), "stub://cam");
        assert_eq!(snap.state, CameraState::Disconnected);
        assert_eq!(snap.retry_count, 0);
        assert!(!snap.state.is_healthy());
    }
}
