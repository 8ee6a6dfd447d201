//! Camera stream management.
//!
//! This crate provides:
//! - `FrameSource`, one live camera connection, with synthetic (`stub://`),
//!   HTTP snapshot (`http(s)://`) and, behind the `rtsp-gstreamer` feature,
//!   RTSP (`rtsp://`) implementations selected by URL scheme
//! - Per-camera sessions: connect, stream, back off, reconnect
//! - Per-camera rate limiting and drop-on-backpressure frame submission
//! - Motion detection by frame differencing
//! - `CameraRegistry` and `StreamManager`, owning every session

pub mod backoff;
pub mod config;
pub mod error;
pub mod frame;
pub mod limiter;
pub mod manager;
pub mod metrics;
pub mod motion;
pub mod registry;
#[cfg(feature = "rtsp-gstreamer")]
pub mod rtsp;
pub mod session;
pub mod snapshot;
pub mod source;
pub mod synthetic;

pub use backoff::BackoffPolicy;
pub use config::{load_cameras, parse_cameras, CameraConfig, MotionConfig, StreamConfig};
pub use error::{StreamError, StreamResult};
pub use frame::{Frame, FrameFormat};
pub use limiter::FrameLimiter;
pub use manager::{CameraStats, StreamManager};
pub use motion::MotionDetector;
pub use registry::CameraRegistry;
#[cfg(feature = "rtsp-gstreamer")]
pub use rtsp::RtspSource;
pub use session::FrameSubmitter;
pub use snapshot::SnapshotSource;
pub use source::{FrameSource, FrameSourceFactory, SourceFactory, SourceKind};
pub use synthetic::SyntheticSource;
