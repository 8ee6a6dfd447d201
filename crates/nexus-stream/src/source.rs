//! Frame source contract and scheme-based source selection.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::config::CameraConfig;
use crate::error::{StreamError, StreamResult};
use crate::frame::Frame;
use crate::snapshot::SnapshotSource;
use crate::synthetic::SyntheticSource;

/// One camera connection. Owned by exactly one session.
///
/// `close` must be safe to call in any state, including before `connect` and
/// more than once.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Open the stream at `target`.
    async fn connect(&mut self, target: &str) -> StreamResult<()>;

    /// Wait up to `timeout` for the next frame.
    async fn next_frame(&mut self, timeout: Duration) -> StreamResult<Frame>;

    /// Release the connection.
    async fn close(&mut self);

    fn is_connected(&self) -> bool;
}

/// Builds the frame source for a camera.
pub trait FrameSourceFactory: Send + Sync {
    fn create(&self, camera: &CameraConfig) -> StreamResult<Box<dyn FrameSource>>;
}

/// Concrete source implementations, keyed by URL scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// `stub://`: generated frames
    Synthetic,
    /// `http://`, `https://`: JPEG snapshot polling
    Snapshot,
    /// `rtsp://`, `rtsps://`: live video, needs the `rtsp-gstreamer` feature
    Rtsp,
}

impl SourceKind {
    pub fn for_url(url: &str) -> StreamResult<Self> {
        let parsed =
            url::Url::parse(url).map_err(|_| StreamError::UnsupportedScheme(url.to_string()))?;
        match parsed.scheme() {
            "stub" => Ok(SourceKind::Synthetic),
            "http" | "https" => Ok(SourceKind::Snapshot),
            "rtsp" | "rtsps" => Ok(SourceKind::Rtsp),
            _ => Err(StreamError::UnsupportedScheme(url.to_string())),
        }
    }
}

/// Default factory: picks the source from the camera URL scheme.
pub struct SourceFactory {
    http: Client,
}

impl SourceFactory {
    pub fn new() -> StreamResult<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self { http })
    }

    pub fn with_client(http: Client) -> Self {
        Self { http }
    }
}

impl FrameSourceFactory for SourceFactory {
    fn create(&self, camera: &CameraConfig) -> StreamResult<Box<dyn FrameSource>> {
        let kind = SourceKind::for_url(&camera.url)?;
        debug!(camera_id = %camera.id, ?kind, "Creating frame source");
        match kind {
            SourceKind::Synthetic => Ok(Box::new(SyntheticSource::from_url(&camera.url)?)),
            SourceKind::Snapshot => {
                let interval = camera
                    .max_fps
                    .map(|fps| Duration::from_secs_f64(1.0 / fps))
                    .unwrap_or(Duration::from_secs(1));
                Ok(Box::new(SnapshotSource::new(self.http.clone(), interval)))
            }
            #[cfg(feature = "rtsp-gstreamer")]
            SourceKind::Rtsp => Ok(Box::new(crate::rtsp::RtspSource::new())),
            #[cfg(not(feature = "rtsp-gstreamer"))]
            SourceKind::Rtsp => Err(StreamError::RtspUnavailable(camera.url.clone())),
        }
    }
}
