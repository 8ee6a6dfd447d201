//! Synthetic frame source for `stub://` URLs.
//!
//! Query parameters script the camera's behaviour:
//!
//! | parameter         | effect                                                   |
//! |-------------------|----------------------------------------------------------|
//! | `width`, `height` | frame size (default 64x48)                                |
//! | `fps`             | frame rate (default 10)                                   |
//! | `fail_connects`   | the first N connect attempts fail                         |
//! | `connect_delay_ms`| each connect attempt takes this long                      |
//! | `drop_after`      | the stream ends after N frames per connection            |
//! | `stall_after`     | no more frames after N frames per connection             |
//! | `motion_every`    | the scene flips every N frames                            |

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{StreamError, StreamResult};
use crate::frame::{Frame, FrameFormat};
use crate::source::FrameSource;

/// Counters shared with tests and diagnostics.
#[derive(Debug, Clone, Default)]
pub struct SyntheticCounters {
    connects: Arc<AtomicU64>,
    closes: Arc<AtomicU64>,
    open: Arc<AtomicUsize>,
}

impl SyntheticCounters {
    /// Successful connects.
    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> u64 {
        self.closes.load(Ordering::SeqCst)
    }

    /// Connections currently open.
    pub fn open(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }
}

/// Generates gray frames on a timer.
#[derive(Debug)]
pub struct SyntheticSource {
    width: u32,
    height: u32,
    interval: Duration,
    fail_connects: u32,
    connect_delay: Duration,
    drop_after: Option<u64>,
    stall_after: Option<u64>,
    motion_every: Option<u64>,

    connect_attempts: u32,
    connected: bool,
    frames_this_connection: u64,
    sequence: u64,
    scene: u8,
    counters: SyntheticCounters,
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self {
            width: 64,
            height: 48,
            interval: Duration::from_millis(100),
            fail_connects: 0,
            connect_delay: Duration::ZERO,
            drop_after: None,
            stall_after: None,
            motion_every: None,
            connect_attempts: 0,
            connected: false,
            frames_this_connection: 0,
            sequence: 0,
            scene: 0,
            counters: SyntheticCounters::default(),
        }
    }
}

impl SyntheticSource {
    /// Build from a `stub://` URL and its query parameters.
    pub fn from_url(url: &str) -> StreamResult<Self> {
        let parsed =
            url::Url::parse(url).map_err(|e| StreamError::invalid_config(format!("{}: {}", url, e)))?;
        if parsed.scheme() != "stub" {
            return Err(StreamError::UnsupportedScheme(url.to_string()));
        }

        let mut source = Self::default();
        for (key, value) in parsed.query_pairs() {
            let number = || -> StreamResult<u64> {
                value.parse().map_err(|_| {
                    StreamError::invalid_config(format!("{}: bad value for '{}'", url, key))
                })
            };
            match key.as_ref() {
                "width" => source.width = number()? as u32,
                "height" => source.height = number()? as u32,
                "fps" => {
                    let fps: f64 = value.parse().map_err(|_| {
                        StreamError::invalid_config(format!("{}: bad fps", url))
                    })?;
                    if !(fps.is_finite() && fps > 0.0) {
                        return Err(StreamError::invalid_config(format!("{}: bad fps", url)));
                    }
                    source.interval = Duration::from_secs_f64(1.0 / fps);
                }
                "fail_connects" => source.fail_connects = number()? as u32,
                "connect_delay_ms" => source.connect_delay = Duration::from_millis(number()?),
                "drop_after" => source.drop_after = Some(number()?),
                "stall_after" => source.stall_after = Some(number()?),
                "motion_every" => source.motion_every = Some(number()?.max(1)),
                other => debug!("Ignoring unknown stub parameter '{}'", other),
            }
        }
        if source.width == 0 || source.height == 0 {
            return Err(StreamError::invalid_config(format!("{}: empty frame size", url)));
        }
        Ok(source)
    }

    pub fn counters(&self) -> SyntheticCounters {
        self.counters.clone()
    }

    fn release(&mut self) {
        if self.connected {
            self.connected = false;
            self.counters.open.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn render(&mut self) -> Frame {
        self.sequence += 1;
        self.frames_this_connection += 1;
        if let Some(every) = self.motion_every {
            if self.sequence % every == 0 {
                self.scene = if self.scene == 0 { 200 } else { 0 };
            }
        }
        let pixels = vec![self.scene; (self.width * self.height) as usize];
        Frame::new(pixels, self.width, self.height, FrameFormat::Gray8, self.sequence)
    }
}

impl Drop for SyntheticSource {
    fn drop(&mut self) {
        self.release();
    }
}

#[async_trait]
impl FrameSource for SyntheticSource {
    async fn connect(&mut self, target: &str) -> StreamResult<()> {
        self.release();
        self.connect_attempts += 1;
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        if self.connect_attempts <= self.fail_connects {
            return Err(StreamError::connect_failed(format!(
                "{}: connection refused (attempt {})",
                target, self.connect_attempts
            )));
        }

        self.connected = true;
        self.frames_this_connection = 0;
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        self.counters.open.fetch_add(1, Ordering::SeqCst);
        debug!("Synthetic source connected to {}", target);
        Ok(())
    }

    async fn next_frame(&mut self, timeout: Duration) -> StreamResult<Frame> {
        if !self.connected {
            return Err(StreamError::NotConnected);
        }
        if self
            .drop_after
            .is_some_and(|n| self.frames_this_connection >= n)
        {
            self.release();
            return Err(StreamError::StreamEnded);
        }
        let stalled = self
            .stall_after
            .is_some_and(|n| self.frames_this_connection >= n);
        if stalled || self.interval > timeout {
            tokio::time::sleep(timeout).await;
            return Err(StreamError::FrameTimeout(timeout));
        }

        tokio::time::sleep(self.interval).await;
        Ok(self.render())
    }

    async fn close(&mut self) {
        if self.connected {
            self.counters.closes.fetch_add(1, Ordering::SeqCst);
        }
        self.release();
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
