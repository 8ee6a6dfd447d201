//! Stream error types.
//!
//! Connection errors never leave the stream manager; they only show up in the
//! session snapshot. The lifecycle errors here are returned to callers of the
//! manager and registry.

use std::time::Duration;

use nexus_models::CameraId;
use thiserror::Error;

pub type StreamResult<T> = Result<T, StreamError>;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Camera not found: {0}")]
    CameraNotFound(CameraId),

    #[error("Camera already registered: {0}")]
    CameraExists(CameraId),

    #[error("Camera limit reached ({max})")]
    TooManyCameras { max: usize },

    #[error("Unsupported stream URL '{0}'")]
    UnsupportedScheme(String),

    #[error("RTSP stream '{0}' needs a build with the `rtsp-gstreamer` feature")]
    RtspUnavailable(String),

    #[error("Invalid camera configuration: {0}")]
    InvalidConfig(String),

    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    #[error("No frame within {0:?}")]
    FrameTimeout(Duration),

    #[error("Stream ended")]
    StreamEnded,

    #[error("Not connected")]
    NotConnected,

    #[error("Frame decode failed: {0}")]
    Decode(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StreamError {
    pub fn connect_failed(msg: impl Into<String>) -> Self {
        Self::ConnectFailed(msg.into())
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }
}
